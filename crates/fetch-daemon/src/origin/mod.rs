//! Origins - read-only sources the cache fetches misses from
//!
//! An origin answers `get(name)` with the object's declared size and a byte
//! stream. It holds no caching logic and does not retry; the store calls it
//! from its worker thread, one request at a time per shard, but every origin
//! must tolerate concurrent calls because shards share one origin.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use fetch_core::{OriginConfig, OriginError};

mod dir;
mod memory;
mod s3;

pub use dir::DirOrigin;
pub use memory::MemoryOrigin;
pub use s3::S3Origin;

/// An object fetched from an origin
pub struct OriginObject {
    /// Declared size in bytes
    pub size: u64,
    /// Object contents
    pub body: Box<dyn Read + Send>,
}

impl OriginObject {
    pub fn new(size: u64, body: impl Read + Send + 'static) -> Self {
        Self {
            size,
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for OriginObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginObject")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Read-only data source
pub trait Origin: Send + Sync {
    /// Fetch `name`, returning its declared size and contents
    fn get(&self, name: &str) -> Result<OriginObject, OriginError>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Build the configured origin
///
/// Must be called from within a tokio runtime: the S3 origin keeps a handle
/// to it to drive requests from the store's worker threads.
pub async fn from_config(config: &OriginConfig) -> Result<Arc<dyn Origin>, OriginError> {
    let origin: Arc<dyn Origin> = match config {
        OriginConfig::Dir { path } => Arc::new(DirOrigin::new(path)?),
        OriginConfig::S3 {
            bucket,
            region,
            endpoint,
            force_path_style,
            timeout_secs,
        } => {
            let timeout = (*timeout_secs > 0).then(|| Duration::from_secs(*timeout_secs));
            Arc::new(
                S3Origin::connect(
                    bucket.clone(),
                    region.clone(),
                    endpoint.clone(),
                    *force_path_style,
                    timeout,
                )
                .await,
            )
        }
    };

    info!("Using origin {}", origin.describe());
    Ok(origin)
}
