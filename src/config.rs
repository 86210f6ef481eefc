use crate::services::{
    processor::{
        DEFAULT_MAX_HEIGHT, DEFAULT_MAX_IMAGE_SIZE, DEFAULT_MAX_WIDTH, DEFAULT_STAGING_DIR,
        ProcessorSettings,
    },
    s3_store::{S3Settings, StaticCredentials},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_REGION: &str = "us-east-1";

/// Where the images to optimize live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    S3(S3Settings),
    /// Directory treated as a bucket; keys are relative paths.
    Local(PathBuf),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StoreBackend,
    /// Only keys starting with this prefix are listed.
    pub prefix: String,
    pub processor: ProcessorSettings,
    pub max_concurrency: Option<usize>,
}

/// Command-line overrides. Running the binary always runs the batch once.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Shrink oversized JPEGs in an object store")]
pub struct Args {
    /// Size budget in bytes (overrides IMAGE_MAX_SIZE)
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Bucket name (overrides S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides AWS_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Key prefix to scan (overrides S3_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Endpoint of an S3-compatible store (overrides S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Optimize a local directory instead of a bucket (overrides LOCAL_STORE_DIR)
    #[arg(long)]
    pub local_store: Option<PathBuf>,

    /// Scratch directory for staged downloads (overrides IMAGE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Bounding box width (overrides IMAGE_MAX_WIDTH)
    #[arg(long)]
    pub max_width: Option<u32>,

    /// Bounding box height (overrides IMAGE_MAX_HEIGHT)
    #[arg(long)]
    pub max_height: Option<u32>,

    /// Upper bound on images processed at once (overrides IMAGE_MAX_CONCURRENCY)
    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables returned by `lookup`.
    ///
    /// Blank variables count as unset.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let max_image_size = match args.max_size {
            Some(0) => bail!("--max-size must be greater than zero"),
            Some(size) => size,
            None => match var("IMAGE_MAX_SIZE").map(|value| value.trim().parse::<u64>()) {
                Some(Ok(size)) if size > 0 => size,
                other => {
                    tracing::warn!(
                        "IMAGE_MAX_SIZE missing or invalid ({:?}), using {} instead",
                        other,
                        DEFAULT_MAX_IMAGE_SIZE
                    );
                    DEFAULT_MAX_IMAGE_SIZE
                }
            },
        };

        let max_width = positive(args.max_width, var("IMAGE_MAX_WIDTH"), "IMAGE_MAX_WIDTH")?
            .unwrap_or(DEFAULT_MAX_WIDTH);
        let max_height = positive(args.max_height, var("IMAGE_MAX_HEIGHT"), "IMAGE_MAX_HEIGHT")?
            .unwrap_or(DEFAULT_MAX_HEIGHT);
        let max_concurrency = positive(
            args.max_concurrency,
            var("IMAGE_MAX_CONCURRENCY"),
            "IMAGE_MAX_CONCURRENCY",
        )?;

        let staging_dir = args
            .staging_dir
            .or_else(|| var("IMAGE_STAGING_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR));
        let prefix = args.prefix.or_else(|| var("S3_PREFIX")).unwrap_or_default();

        let backend = match args
            .local_store
            .or_else(|| var("LOCAL_STORE_DIR").map(PathBuf::from))
        {
            Some(root) => StoreBackend::Local(root),
            None => {
                let Some(bucket) = args.bucket.or_else(|| var("S3_BUCKET")) else {
                    bail!("S3_BUCKET is not set and no local store directory was given");
                };
                let credentials = match (var("AWS_ACCESS_KEY"), var("AWS_SECRET_KEY")) {
                    (Some(access_key), Some(secret_key)) => Some(StaticCredentials {
                        access_key,
                        secret_key,
                    }),
                    (None, None) => None,
                    _ => bail!("AWS_ACCESS_KEY and AWS_SECRET_KEY must be set together"),
                };
                StoreBackend::S3(S3Settings {
                    bucket,
                    region: args
                        .region
                        .or_else(|| var("AWS_REGION"))
                        .unwrap_or_else(|| DEFAULT_REGION.into()),
                    credentials,
                    endpoint: args.endpoint.or_else(|| var("S3_ENDPOINT")),
                })
            }
        };

        Ok(Self {
            backend,
            prefix,
            processor: ProcessorSettings {
                max_image_size,
                staging_dir,
                max_width,
                max_height,
                ..ProcessorSettings::default()
            },
            max_concurrency,
        })
    }
}

/// Pick the CLI value, else parse the env value; zero is rejected.
fn positive<T>(cli: Option<T>, env_value: Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = match (cli, env_value) {
        (Some(value), _) => value,
        (None, Some(raw)) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, raw))?,
        (None, None) => return Ok(None),
    };
    if value == T::default() {
        bail!("{} must be greater than zero", name);
    }
    Ok(Some(value))
}
