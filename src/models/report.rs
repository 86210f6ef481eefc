//! Terminal outcome of a batch run.

/// Statistics for one image that was optimized and published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptimizedImage {
    pub key: String,

    /// Size of the staged original in bytes.
    pub original_bytes: u64,

    /// Size of the published encoding in bytes.
    pub final_bytes: u64,

    /// Quality of the published encoding.
    pub quality: u8,

    /// Number of encodes performed, including the initial one.
    pub attempts: u32,

    /// False when the quality floor was reached without meeting the budget.
    pub within_budget: bool,
}

/// One candidate that could not be optimized. The original object is untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: String,
    pub reason: String,
}

/// Aggregated outcome of every dispatched task.
///
/// `dispatched` is fixed when the tasks are launched; after the run
/// `succeeded.len() + failed.len() == dispatched` always holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub listed: usize,
    pub dispatched: usize,
    pub succeeded: Vec<OptimizedImage>,
    pub failed: Vec<ItemFailure>,
}

impl BatchReport {
    /// Number of outcomes observed so far.
    pub fn observed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.observed() == self.dispatched
    }

    /// Bytes saved across all published images.
    pub fn bytes_saved(&self) -> u64 {
        self.succeeded
            .iter()
            .map(|img| img.original_bytes.saturating_sub(img.final_bytes))
            .sum()
    }

    pub fn over_budget(&self) -> impl Iterator<Item = &OptimizedImage> {
        self.succeeded.iter().filter(|img| !img.within_budget)
    }
}
