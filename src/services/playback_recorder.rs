//! Consumer-side effect: log each playback start and keep a per-user history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::bus::{EventHandler, ProcessingError};
use crate::playback::{PlaybackEvent, UserId};

/// One received playback start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackRecord {
    pub movie_id: String,
    pub received_at: DateTime<Utc>,
}

/// Playback starts received per user, oldest first.
#[derive(Clone, Default)]
pub struct PlaybackHistory {
    records: Arc<RwLock<HashMap<UserId, Vec<PlaybackRecord>>>>,
}

impl PlaybackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_user(&self, user_id: UserId) -> Vec<PlaybackRecord> {
        self.records
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, user_id: UserId, record: PlaybackRecord) {
        self.records
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(record);
    }
}

/// [`EventHandler`] run by the user service for every playback event.
pub struct PlaybackRecorder {
    history: PlaybackHistory,
}

impl PlaybackRecorder {
    pub fn new(history: PlaybackHistory) -> Self {
        Self { history }
    }
}

impl EventHandler for PlaybackRecorder {
    fn handle(&self, event: PlaybackEvent) -> BoxFuture<'static, Result<(), ProcessingError>> {
        let history = self.history.clone();
        Box::pin(async move {
            info!(
                user_id = event.user_id(),
                movie_id = %event.movie_id(),
                "Playback event received"
            );
            let record = PlaybackRecord {
                movie_id: event.movie_id().to_string(),
                received_at: Utc::now(),
            };
            history.append(event.user_id(), record).await;
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "playback-recorder"
    }
}
