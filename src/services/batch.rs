//! Batch scheduler: list, filter, fan out one task per candidate, and join
//! exactly the tasks that were launched.

use crate::{
    errors::{BatchError, ProcessError},
    models::{
        object::ObjectInfo,
        report::{BatchReport, ItemFailure, OptimizedImage},
    },
    services::{object_store::ObjectStore, processor::Processor},
};
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{error, info};

/// Keep only JPEG objects strictly larger than `max_image_size`.
pub fn select_candidates(objects: Vec<ObjectInfo>, max_image_size: u64) -> Vec<ObjectInfo> {
    objects
        .into_iter()
        .filter(|obj| obj.is_candidate(max_image_size))
        .collect()
}

#[derive(Clone)]
pub struct BatchService {
    store: Arc<dyn ObjectStore>,
    processor: Processor,
    prefix: String,
    /// Cap on simultaneously running items; `None` dispatches everything at once.
    max_concurrency: Option<usize>,
}

impl BatchService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        processor: Processor,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            processor,
            prefix: prefix.into(),
            max_concurrency: None,
        }
    }

    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|n| n.max(1));
        self
    }

    /// Run the batch once.
    ///
    /// Only a listing failure is returned as an error. Every dispatched item
    /// ends up in exactly one of `succeeded` or `failed`.
    pub async fn run(&self) -> Result<BatchReport, BatchError> {
        let objects = self
            .store
            .list_objects(&self.prefix)
            .await
            .map_err(|source| BatchError::Listing {
                prefix: self.prefix.clone(),
                source,
            })?;
        let listed = objects.len();
        let max_image_size = self.processor.settings().max_image_size;
        let candidates = select_candidates(objects, max_image_size);
        info!(
            listed,
            candidates = candidates.len(),
            max_image_size,
            "dispatching optimization tasks"
        );

        let limiter = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let handles: Vec<(String, JoinHandle<Result<OptimizedImage, ProcessError>>)> = candidates
            .into_iter()
            .map(|candidate| {
                let processor = self.processor.clone();
                let limiter = limiter.clone();
                let key = candidate.key.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match limiter {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };
                    processor.process(&candidate.key).await
                });
                (key, handle)
            })
            .collect();

        // The expected outcome count is the number of handles, fixed here.
        let mut report = BatchReport {
            listed,
            dispatched: handles.len(),
            ..BatchReport::default()
        };

        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(ProcessError::Aborted(join_err)),
            };
            match outcome {
                Ok(image) => report.succeeded.push(image),
                Err(err) => {
                    error!(key = %key, "error during image processing: {}", err);
                    report.failed.push(ItemFailure {
                        key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug_assert!(report.is_complete());
        Ok(report)
    }
}
