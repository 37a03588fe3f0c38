//! Asset readers handing raw model bytes to the native module
//!
//! Readers never fail: any error is logged and surfaces as an empty buffer,
//! which the native loader then reports as a load failure.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::{AssetSource, Live2dConfig};

/// Reads the bytes behind an asset path
pub trait AssetReader: Send + Sync {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Vec<u8>>;
}

/// Build the reader for the configured deployment mode
pub fn reader_for(config: &Live2dConfig) -> Arc<dyn AssetReader> {
    match &config.source {
        AssetSource::File => Arc::new(FileAssetReader),
        AssetSource::Http { base_url } => Arc::new(HttpAssetReader::new(base_url)),
    }
}

/// Reads assets from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAssetReader;

impl AssetReader for FileAssetReader {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to read asset {}: {}", path, e);
                    Vec::new()
                }
            }
        })
    }
}

/// Fetches assets over HTTP relative to a base URL
#[derive(Debug, Clone)]
pub struct HttpAssetReader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAssetReader {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL for an asset path
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl AssetReader for HttpAssetReader {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let url = self.url_for(path);
            match self.fetch(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to fetch asset {}: {}", url, e);
                    Vec::new()
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
struct MemoryAsset {
    bytes: Arc<Vec<u8>>,
    delay: Option<Duration>,
}

/// Serves assets from memory, for embedding hosts and tests
#[derive(Debug, Default)]
pub struct MemoryAssetReader {
    assets: RwLock<HashMap<String, MemoryAsset>>,
}

impl MemoryAssetReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.insert_entry(path, bytes.into(), None);
    }

    /// Insert an asset whose read completes only after `delay`
    pub fn insert_delayed(&self, path: &str, bytes: impl Into<Vec<u8>>, delay: Duration) {
        self.insert_entry(path, bytes.into(), Some(delay));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.assets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
            .is_some()
    }

    fn insert_entry(&self, path: &str, bytes: Vec<u8>, delay: Option<Duration>) {
        let asset = MemoryAsset {
            bytes: Arc::new(bytes),
            delay,
        };
        self.assets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), asset);
    }
}

impl AssetReader for MemoryAssetReader {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let asset = self
                .assets
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(path)
                .cloned();

            match asset {
                Some(asset) => {
                    if let Some(delay) = asset.delay {
                        tokio::time::sleep(delay).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                    asset.bytes.as_ref().clone()
                }
                None => {
                    tracing::error!("Asset not found: {}", path);
                    Vec::new()
                }
            }
        })
    }
}
