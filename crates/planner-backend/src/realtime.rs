//! Per-user change notifications.
//!
//! Every mutation publishes a [`ChangeEvent`]; the `/api/changes` endpoint
//! streams the caller's events as Server-Sent Events and clients refetch on
//! any of them.

use futures::stream::{self, Stream};
use planner_types::{ChangeEvent, ChangeKind, ChangeTable};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire and forget. Having no listeners is not an error.
    pub fn publish(&self, user_id: Uuid, table: ChangeTable, kind: ChangeKind) {
        let event = ChangeEvent {
            user_id,
            table,
            kind,
        };
        if self.tx.send(event).is_err() {
            tracing::trace!("No change listeners for {:?}", table);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Events for one user. A lagging receiver yields a single synthetic
    /// task update so the client refetches instead of missing changes.
    pub fn user_stream(&self, user_id: Uuid) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        stream::unfold(self.subscribe(), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.user_id == user_id => return Some((event, rx)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Change stream for {} lagged by {}", user_id, skipped);
                        let resync = ChangeEvent {
                            user_id,
                            table: ChangeTable::Tasks,
                            kind: ChangeKind::Update,
                        };
                        return Some((resync, rx));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}
