//! Sensor picture cache.
//!
//! Pictures are stored as `<dir>/<mac>` with the MAC colons replaced by
//! dashes. A `<file>.url` sidecar remembers the source URL so a changed
//! reference is downloaded again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use fleetsync_types::MacId;

/// Errors from picture downloads.
#[derive(Debug, Error)]
pub enum PictureError {
    #[error("Picture download failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Picture server returned status {0}")]
    Status(u16),

    #[error("Failed to write picture: {0}")]
    Io(#[from] std::io::Error),
}

/// Local store of sensor pictures.
#[async_trait]
pub trait PictureCache: Send + Sync {
    /// Whether the picture at `url` is cached for this sensor.
    async fn is_cached(&self, mac_id: &MacId, url: &str) -> bool;

    /// Download and cache the picture at `url`. Returns the cached file.
    async fn fetch(&self, mac_id: &MacId, url: &str) -> Result<PathBuf, PictureError>;
}

/// [`PictureCache`] writing into a directory.
#[derive(Debug, Clone)]
pub struct DiskPictureCache {
    dir: PathBuf,
    client: Client,
}

impl DiskPictureCache {
    /// Create a cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PictureError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(dir, client))
    }

    /// Create a cache with a custom reqwest Client.
    pub fn with_client(dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            dir: dir.into(),
            client,
        }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cached picture of a sensor.
    pub fn path_for(&self, mac_id: &MacId) -> PathBuf {
        self.dir.join(mac_id.as_str().replace(':', "-"))
    }

    fn sidecar_for(&self, mac_id: &MacId) -> PathBuf {
        let mut path = self.path_for(mac_id).into_os_string();
        path.push(".url");
        PathBuf::from(path)
    }
}

#[async_trait]
impl PictureCache for DiskPictureCache {
    async fn is_cached(&self, mac_id: &MacId, url: &str) -> bool {
        if !tokio::fs::try_exists(self.path_for(mac_id))
            .await
            .unwrap_or(false)
        {
            return false;
        }
        match tokio::fs::read_to_string(self.sidecar_for(mac_id)).await {
            Ok(cached_url) => cached_url == url,
            Err(_) => false,
        }
    }

    async fn fetch(&self, mac_id: &MacId, url: &str) -> Result<PathBuf, PictureError> {
        debug!("Fetching picture for {} from {}", mac_id, url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Picture download for {} failed with {}", mac_id, status);
            return Err(PictureError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(mac_id);
        tokio::fs::write(&path, &bytes).await?;
        tokio::fs::write(self.sidecar_for(mac_id), url).await?;

        debug!("Cached {} bytes for {} at {:?}", bytes.len(), mac_id, path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn mac() -> MacId {
        MacId::parse("AA:BB:CC:DD:EE:01").unwrap()
    }

    #[test]
    fn test_path_replaces_colons() {
        let cache = DiskPictureCache::new("/tmp/pics").unwrap();
        assert_eq!(
            cache.path_for(&mac()),
            PathBuf::from("/tmp/pics/AA-BB-CC-DD-EE-01")
        );
    }

    #[tokio::test]
    async fn test_fetch_then_cached() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/p/1.jpg");
                then.status(200).body("jpeg-bytes");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = DiskPictureCache::new(dir.path().join("pictures")).unwrap();
        let url = format!("{}/p/1.jpg", server.base_url());

        assert!(!cache.is_cached(&mac(), &url).await);
        let path = cache.fetch(&mac(), &url).await.unwrap();
        mock.assert_async().await;

        assert_eq!(std::fs::read_to_string(path).unwrap(), "jpeg-bytes");
        assert!(cache.is_cached(&mac(), &url).await);

        // A new reference is not considered cached
        let other = format!("{}/p/2.jpg", server.base_url());
        assert!(!cache.is_cached(&mac(), &other).await);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.jpg");
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = DiskPictureCache::new(dir.path()).unwrap();
        let url = format!("{}/missing.jpg", server.base_url());

        let err = cache.fetch(&mac(), &url).await.unwrap_err();
        assert!(matches!(err, PictureError::Status(404)));
        assert!(!cache.is_cached(&mac(), &url).await);
    }
}
