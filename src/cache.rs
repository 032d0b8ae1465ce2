use std::{collections::HashMap, io::ErrorKind, path::PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

pub const RESPONSE_CACHE_TTL_SECONDS: i64 = 60 * 60;
const MAX_RESPONSE_CACHE_ENTRIES: usize = 5_000;

struct CachedResponse {
    stored_at: DateTime<Utc>,
    payload: Value,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, normalized_url: &str) -> Option<Value> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        match entries.get(normalized_url) {
            Some(cached) if now - cached.stored_at < Duration::seconds(RESPONSE_CACHE_TTL_SECONDS) => {
                Some(cached.payload.clone())
            }
            Some(_) => {
                entries.remove(normalized_url);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, normalized_url: &str, payload: Value) {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, cached| {
            now - cached.stored_at < Duration::seconds(RESPONSE_CACHE_TTL_SECONDS)
        });
        entries.insert(
            normalized_url.to_string(),
            CachedResponse {
                stored_at: now,
                payload,
            },
        );

        if entries.len() > MAX_RESPONSE_CACHE_ENTRIES {
            let overflow = entries.len() - MAX_RESPONSE_CACHE_ENTRIES;
            let mut oldest = entries
                .iter()
                .map(|(url, cached)| (url.clone(), cached.stored_at))
                .collect::<Vec<_>>();
            oldest.sort_by_key(|(_, stored_at)| *stored_at);
            for (url, _) in oldest.into_iter().take(overflow) {
                entries.remove(&url);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDownloadUrl {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub token: String,
    pub proxied_path: String,
    pub filename: String,
    pub quality: String,
    pub format: String,
    pub title: String,
    pub original_video_url: String,
    pub original_media_url: String,
}

type DownloadUrlMap = HashMap<String, CachedDownloadUrl>;

pub struct DownloadUrlCache {
    entries: Mutex<DownloadUrlMap>,
    path: Option<PathBuf>,
}

impl DownloadUrlCache {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<DownloadUrlMap>(&contents) {
                Ok(map) => map,
                Err(error) => {
                    warn!("Discarding unreadable download url cache at {path:?}: {error}");
                    HashMap::new()
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(error) => {
                warn!("Could not open download url cache at {path:?}: {error}");
                HashMap::new()
            }
        };

        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    #[cfg(test)]
    pub fn with_unwritable_store(path: PathBuf) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: Some(path),
        }
    }

    pub async fn get(&self, original_media_url: &str) -> Option<CachedDownloadUrl> {
        self.entries.lock().await.get(original_media_url).cloned()
    }

    pub async fn insert(&self, record: CachedDownloadUrl) -> Result<(), ApiError> {
        let snapshot = {
            let mut entries = self.entries.lock().await;
            entries.insert(record.original_media_url.clone(), record);
            self.path.as_ref().map(|_| entries.clone())
        };

        if let (Some(path), Some(snapshot)) = (self.path.as_ref(), snapshot) {
            let payload = serde_json::to_string_pretty(&snapshot).map_err(|error| {
                ApiError::internal(format!("Could not serialize download url cache: {error}"))
            })?;
            tokio::fs::write(path, payload).await.map_err(|error| {
                ApiError::internal(format!(
                    "Could not persist download url cache to {path:?}: {error}"
                ))
            })?;
        }

        Ok(())
    }
}
