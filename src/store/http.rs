//! Bucket reached over anonymous HTTP(S).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::{BlobStore, StoreError};

/// Bucket whose objects live at `<base>/<key>`.
#[derive(Clone)]
pub struct HttpBucket {
    client: Client,
    base: Url,
}

impl HttpBucket {
    /// `stall_timeout` bounds connecting and each wait for more body data.
    /// A transfer that keeps making progress is never cut off; whole fetches
    /// are bounded by the caller's phase deadline instead.
    pub fn new(base: &str, stall_timeout: Duration, user_agent: &str) -> Result<Self, StoreError> {
        // Url::join replaces the last segment unless the base ends with '/'.
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let base =
            Url::parse(&normalized).map_err(|e| StoreError::InvalidLocation(e.to_string()))?;

        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(stall_timeout)
            .read_timeout(stall_timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, base })
    }

    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        if key.is_empty() || key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.base
            .join(key)
            .map_err(|_| StoreError::InvalidKey(key.to_string()))
    }
}

fn status_error(key: &str, status: StatusCode) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound {
            key: key.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Access {
            key: key.to_string(),
            status: status.as_u16(),
        },
        _ => StoreError::Status {
            key: key.to_string(),
            status: status.as_u16(),
        },
    }
}

#[async_trait]
impl BlobStore for HttpBucket {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.object_url(key)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(key, status));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.object_url(key)?;
        debug!("HEAD {}", url);

        let status = self.client.head(url).send().await?.status();
        if status.is_success() {
            return Ok(true);
        }

        // Public S3 buckets answer 403 rather than 404 for missing keys when
        // listing is disabled.
        match status {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(false),
            other => Err(status_error(key, other)),
        }
    }

    fn location(&self) -> String {
        self.base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one response whose body arrives a byte at a time, `gap` apart.
    async fn trickle_server(body: &'static [u8], gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for byte in body {
                tokio::time::sleep(gap).await;
                if socket.write_all(&[*byte]).await.is_err() {
                    return;
                }
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_slow_body_outlasting_stall_timeout_succeeds() {
        let base = trickle_server(b"shard", Duration::from_millis(150)).await;
        let b = HttpBucket::new(&base, Duration::from_millis(500), "test").unwrap();

        // Five bytes at 150ms each take longer than the stall timeout in total.
        assert_eq!(b.get("index_2011.json").await.unwrap(), b"shard");
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let base = trickle_server(b"x", Duration::from_secs(3)).await;
        let b = HttpBucket::new(&base, Duration::from_millis(200), "test").unwrap();

        assert!(matches!(
            b.get("index_2011.json").await,
            Err(StoreError::Transport(_))
        ));
    }

    fn bucket(base: &str) -> HttpBucket {
        HttpBucket::new(base, Duration::from_secs(5), "test").unwrap()
    }

    #[test]
    fn test_object_url_joins_under_base() {
        let b = bucket("https://s3.amazonaws.com/irs-form-990");
        assert_eq!(
            b.object_url("index_2011.json").unwrap().as_str(),
            "https://s3.amazonaws.com/irs-form-990/index_2011.json"
        );
    }

    #[test]
    fn test_object_url_rejects_escapes() {
        let b = bucket("https://s3.amazonaws.com/irs-form-990/");
        assert!(matches!(
            b.object_url("../secret"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(b.object_url("/abs"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(b.object_url(""), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error("k", StatusCode::NOT_FOUND).is_not_found());
        assert!(matches!(
            status_error("k", StatusCode::FORBIDDEN),
            StoreError::Access { status: 403, .. }
        ));
        assert!(matches!(
            status_error("k", StatusCode::INTERNAL_SERVER_ERROR),
            StoreError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_invalid_base() {
        assert!(matches!(
            HttpBucket::new("not a url", Duration::from_secs(5), "test"),
            Err(StoreError::InvalidLocation(_))
        ));
    }
}
