use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

const SUSTAINED_LIMIT: usize = 50;
const SUSTAINED_WINDOW_SECONDS: i64 = 600;
const BURST_LIMIT: usize = 12;
const BURST_WINDOW_SECONDS: i64 = 10;
const MAX_TRACKED_CLIENTS: usize = 20_000;

type BotTrackMap = HashMap<String, Vec<DateTime<Utc>>>;

#[derive(Debug, Clone)]
pub struct BotVerdict {
    pub is_bot: bool,
    pub reason: Option<String>,
}

impl BotVerdict {
    fn clean() -> Self {
        Self {
            is_bot: false,
            reason: None,
        }
    }

    fn flagged(reason: String) -> Self {
        Self {
            is_bot: true,
            reason: Some(reason),
        }
    }
}

pub struct BotTracker {
    hits: Mutex<BotTrackMap>,
}

impl BotTracker {
    pub fn new() -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub async fn track(&self, identity: &str) -> BotVerdict {
        self.track_at(identity, Utc::now()).await
    }

    async fn track_at(&self, identity: &str, now: DateTime<Utc>) -> BotVerdict {
        let sustained_window = Duration::seconds(SUSTAINED_WINDOW_SECONDS);
        let burst_window = Duration::seconds(BURST_WINDOW_SECONDS);

        let mut hits = self.hits.lock().await;
        let stamps = hits.entry(identity.to_string()).or_default();
        stamps.push(now);
        stamps.retain(|timestamp| now - *timestamp < sustained_window);

        let sustained = stamps.len();
        let burst = stamps
            .iter()
            .filter(|timestamp| now - **timestamp < burst_window)
            .count();

        let verdict = if sustained >= SUSTAINED_LIMIT {
            BotVerdict::flagged(format!(
                "{sustained} requests in {} minutes",
                SUSTAINED_WINDOW_SECONDS / 60
            ))
        } else if burst >= BURST_LIMIT {
            BotVerdict::flagged(format!("{burst} requests in {BURST_WINDOW_SECONDS} seconds"))
        } else {
            BotVerdict::clean()
        };

        if hits.len() > MAX_TRACKED_CLIENTS {
            trim_tracked_clients(&mut hits);
        }

        verdict
    }
}

fn trim_tracked_clients(hits: &mut BotTrackMap) {
    let overflow = hits.len() - MAX_TRACKED_CLIENTS;
    let mut stalest = hits
        .iter()
        .map(|(identity, stamps)| (identity.clone(), stamps.last().copied()))
        .collect::<Vec<_>>();
    stalest.sort_by_key(|(_, latest)| *latest);

    for (identity, _) in stalest.into_iter().take(overflow) {
        hits.remove(&identity);
    }
}
