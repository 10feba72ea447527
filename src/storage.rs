//! Object storage upload for finished artifacts.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::StorageError;

/// Upload boundary. Returns the public URL of the stored object; any
/// failure is an error, never a missing URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Bucket-over-HTTP store: `PUT {endpoint}/{bucket}/{key}` with an
/// optional bearer token.
pub struct HttpBucketStore {
    client: reqwest::Client,
    endpoint: String,
    public_base: String,
    token: Option<String>,
}

impl HttpBucketStore {
    pub fn new(endpoint: &str, public_base: &str, token: Option<&str>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpBucketStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let url = object_url(&self.endpoint, bucket, key);
        debug!("uploading {} bytes to {url}", bytes.len());

        let mut request = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(200).collect();
            return Err(StorageError::Status {
                key: format!("{bucket}/{key}"),
                status,
                detail,
            });
        }

        let public = object_url(&self.public_base, bucket, key);
        info!("uploaded {bucket}/{key}");
        Ok(public)
    }
}

fn object_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{bucket}/{key}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_joins_without_double_slashes() {
        assert_eq!(
            object_url("https://cdn.example.test/", "programs", "daily-2025-06-01.m4a"),
            "https://cdn.example.test/programs/daily-2025-06-01.m4a"
        );
    }

    #[test]
    fn bucket_store_constructs_and_trims_endpoints() {
        let store = HttpBucketStore::new("http://localhost:9000/", "http://cdn.local/", None, 5);
        assert_eq!(store.endpoint, "http://localhost:9000");
        assert_eq!(store.public_base, "http://cdn.local");
    }
}
