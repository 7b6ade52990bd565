//! Read-only access to the bucket holding the published e-file indices and
//! raw XML documents.
//!
//! The public IRS bucket is reached over plain HTTPS; a local directory with
//! the same key layout works as a mirror and in tests.

mod error;
mod http;
mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use error::StoreError;
pub use http::HttpBucket;
pub use local::LocalBucket;

/// Public bucket of IRS Form 990 e-files.
pub const DEFAULT_BUCKET_URL: &str = "https://s3.amazonaws.com/irs-form-990";

/// A key/value object store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full content of an object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Open a bucket from a URL or filesystem path.
///
/// `http://` and `https://` locations are fetched over the network; anything
/// else (including `file://`) is treated as a local directory.
pub fn open_bucket(
    location: &str,
    timeout: Duration,
    user_agent: &str,
) -> Result<Arc<dyn BlobStore>, StoreError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Arc::new(HttpBucket::new(location, timeout, user_agent)?));
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Arc::new(LocalBucket::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_bucket_http() {
        let bucket = open_bucket(DEFAULT_BUCKET_URL, Duration::from_secs(5), "test").unwrap();
        assert_eq!(bucket.location(), "https://s3.amazonaws.com/irs-form-990/");
    }

    #[test]
    fn test_open_bucket_local() {
        let bucket = open_bucket("file:///srv/irs", Duration::from_secs(5), "test").unwrap();
        assert_eq!(bucket.location(), "/srv/irs");
    }
}
