//! In-memory lookup for tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LookupError, Presence, ResourceLookup};

/// Lookup that answers from a fixed set of ids and records every call.
#[derive(Clone, Default)]
pub struct InMemoryLookup {
    state: Arc<RwLock<LookupState>>,
}

#[derive(Default)]
struct LookupState {
    known: HashSet<String>,
    requested: Vec<String>,
    unavailable: bool,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = LookupState {
            known: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn insert(&self, id: impl Into<String>) {
        self.state.write().await.known.insert(id.into());
    }

    /// Make every check fail as if the peer were unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Number of checks made so far.
    pub async fn calls(&self) -> usize {
        self.state.read().await.requested.len()
    }

    /// Ids checked so far, in order.
    pub async fn requested(&self) -> Vec<String> {
        self.state.read().await.requested.clone()
    }
}

#[async_trait]
impl ResourceLookup for InMemoryLookup {
    async fn check(&self, id: &str) -> Result<Presence, LookupError> {
        let mut state = self.state.write().await;
        state.requested.push(id.to_string());

        if state.unavailable {
            return Err(LookupError::Transport {
                url: format!("memory://{}", id),
                message: "Mock peer unavailable".to_string(),
            });
        }

        if state.known.contains(id) {
            Ok(Presence::Found)
        } else {
            Ok(Presence::Missing { status: 404 })
        }
    }

    fn describe(&self) -> String {
        "memory://lookup".to_string()
    }
}
