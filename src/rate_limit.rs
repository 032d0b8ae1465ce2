use std::{collections::HashMap, io::ErrorKind, path::PathBuf};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::warn;

type RateLimitMap = HashMap<String, Vec<DateTime<Utc>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    Proxy,
    ProxyStrict,
}

impl RateLimitPolicy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::ProxyStrict => "proxy_strict",
        }
    }

    pub fn limit(self) -> usize {
        match self {
            Self::Proxy => 200,
            Self::ProxyStrict => 50,
        }
    }

    fn window(self) -> Duration {
        Duration::hours(1)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub reset_at: DateTime<Utc>,
    pub retry_after_seconds: u64,
}

pub struct RateLimiter {
    entries: Mutex<RateLimitMap>,
    path: Option<PathBuf>,
}

impl RateLimiter {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<RateLimitMap>(&contents) {
                Ok(mut map) => {
                    let now = Utc::now();
                    map.retain(|key, timestamps| {
                        let window = policy_for_key(key).window();
                        timestamps.sort();
                        timestamps.retain(|timestamp| now - *timestamp < window);
                        !timestamps.is_empty()
                    });
                    map
                }
                Err(error) => {
                    warn!("Discarding unreadable rate limit state at {path:?}: {error}");
                    HashMap::new()
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(error) => {
                warn!("Could not open rate limit state at {path:?}: {error}");
                HashMap::new()
            }
        };

        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    pub async fn check(&self, identity: &str, policy: RateLimitPolicy) -> RateLimitDecision {
        self.check_at(identity, policy, Utc::now()).await
    }

    async fn check_at(
        &self,
        identity: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let key = format!("{}:{identity}", policy.name());
        let limit = policy.limit();
        let window = policy.window();

        let (decision, snapshot) = {
            let mut entries = self.entries.lock().await;
            let stamps = entries.entry(key).or_default();
            stamps.sort();
            stamps.retain(|timestamp| now - *timestamp < window);

            let decision = if stamps.len() >= limit {
                let reset_at = stamps
                    .first()
                    .map(|oldest| *oldest + window)
                    .unwrap_or_else(|| now + window);
                RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_at,
                    retry_after_seconds: (reset_at - now).num_seconds().max(1) as u64,
                }
            } else {
                stamps.push(now);
                let reset_at = stamps
                    .first()
                    .map(|oldest| *oldest + window)
                    .unwrap_or_else(|| now + window);
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit - stamps.len(),
                    reset_at,
                    retry_after_seconds: 0,
                }
            };

            (decision, self.path.as_ref().map(|_| entries.clone()))
        };

        if let (Some(path), Some(snapshot)) = (self.path.as_ref(), snapshot) {
            persist(path, &snapshot).await;
        }

        decision
    }
}

fn policy_for_key(key: &str) -> RateLimitPolicy {
    if key.starts_with(RateLimitPolicy::ProxyStrict.name()) {
        RateLimitPolicy::ProxyStrict
    } else {
        RateLimitPolicy::Proxy
    }
}

async fn persist(path: &PathBuf, entries: &RateLimitMap) {
    let payload = match serde_json::to_string_pretty(entries) {
        Ok(payload) => payload,
        Err(error) => {
            warn!("Could not serialize rate limit state: {error}");
            return;
        }
    };

    if let Err(error) = tokio::fs::write(path, payload).await {
        warn!("Could not persist rate limit state to {path:?}: {error}");
    }
}
