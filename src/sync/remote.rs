use reqwest::{Client, Url};
use rocket::async_trait;
use serde_json::Value;

#[cfg(test)]
use std::sync::{Arc, Mutex};

use crate::config::RemoteConfig;

use super::SyncError;

/// A remote JSON document that can only be read and written wholesale.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Reads the whole document; `None` when the remote holds nothing.
    async fn fetch(&self) -> Result<Option<Value>, SyncError>;

    /// Overwrites the whole document.
    async fn put(&self, document: &Value) -> Result<(), SyncError>;
}

/// A document stored behind a REST endpoint of the form
/// `<url>/<path>.json?auth=<access key>`.
pub struct RestRemote {
    client: Client,
    document_url: Url,
}

impl RestRemote {
    pub fn new(config: &RemoteConfig) -> Result<RestRemote, SyncError> {
        if config.url.trim().is_empty() || config.access_key.trim().is_empty() {
            return Err(SyncError::Config("url and access_key are both required".into()));
        }

        let base = format!(
            "{}/{}.json",
            config.url.trim().trim_end_matches('/'),
            config.path.trim_matches('/')
        );
        let mut document_url =
            Url::parse(&base).map_err(|e| SyncError::Config(format!("{}: {}", base, e)))?;
        document_url
            .query_pairs_mut()
            .append_pair("auth", config.access_key.trim());

        let client = Client::builder().build()?;

        Ok(RestRemote {
            client,
            document_url,
        })
    }
}

#[async_trait]
impl Remote for RestRemote {
    async fn fetch(&self) -> Result<Option<Value>, SyncError> {
        let response = self.client.get(self.document_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }

        let document: Value = response.json().await?;
        Ok(match document {
            Value::Null => None,
            document => Some(document),
        })
    }

    async fn put(&self, document: &Value) -> Result<(), SyncError> {
        let response = self
            .client
            .put(self.document_url.clone())
            .json(document)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}

/// A remote held in memory. Clones share the same document, which lets two
/// trackers in one process behave like two devices.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryRemote {
    document: Arc<Mutex<Option<Value>>>,
    offline: Arc<Mutex<bool>>,
}

#[cfg(test)]
impl MemoryRemote {
    pub fn new() -> MemoryRemote {
        MemoryRemote::default()
    }

    pub fn with_document(document: Value) -> MemoryRemote {
        let remote = MemoryRemote::default();
        *remote.document.lock().unwrap_or_else(|e| e.into_inner()) = Some(document);
        remote
    }

    pub fn document(&self) -> Option<Value> {
        self.document
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Makes every following call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|e| e.into_inner()) = offline;
    }

    fn check(&self) -> Result<(), SyncError> {
        if *self.offline.lock().unwrap_or_else(|e| e.into_inner()) {
            Err(SyncError::Unavailable("memory remote switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Remote for MemoryRemote {
    async fn fetch(&self) -> Result<Option<Value>, SyncError> {
        self.check()?;
        Ok(self.document())
    }

    async fn put(&self, document: &Value) -> Result<(), SyncError> {
        self.check()?;
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = Some(document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(url: &str, key: &str) -> RemoteConfig {
        RemoteConfig {
            url: url.to_string(),
            access_key: key.to_string(),
            path: "/polData/".to_string(),
            poll_interval_secs: 5,
        }
    }

    #[test]
    fn rest_remote_builds_the_document_url() {
        let remote = RestRemote::new(&config("https://demo.firebaseio.com/", "k3y")).unwrap();
        assert_eq!(
            remote.document_url.as_str(),
            "https://demo.firebaseio.com/polData.json?auth=k3y"
        );
    }

    #[test]
    fn rest_remote_needs_url_and_key() {
        assert!(matches!(
            RestRemote::new(&config("", "k3y")),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            RestRemote::new(&config("https://demo.firebaseio.com", " ")),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            RestRemote::new(&config("not a url", "k3y")),
            Err(SyncError::Config(_))
        ));
    }

    #[rocket::async_test]
    async fn memory_remote_round_trips_and_fails_on_demand() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.fetch().await.unwrap(), None);

        remote.put(&json!({"nextId": 4})).await.unwrap();
        assert_eq!(remote.fetch().await.unwrap(), Some(json!({"nextId": 4})));

        remote.set_offline(true);
        assert!(remote.fetch().await.is_err());
        assert!(remote.put(&json!({})).await.is_err());
        assert_eq!(remote.document(), Some(json!({"nextId": 4})));
    }
}
