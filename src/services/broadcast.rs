//! Owner broadcast: best-effort fan-out to every known user.

use std::sync::Arc;

use futures::{stream, StreamExt};

use crate::error::AppResult;
use crate::platform::ChatTransport;

use super::packs::PackStore;

const FANOUT_CONCURRENCY: usize = 8;

pub struct BroadcastService {
    store: Arc<PackStore>,
    transport: Arc<dyn ChatTransport>,
}

impl BroadcastService {
    pub fn new(store: Arc<PackStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { store, transport }
    }

    /// Sends `text` to every known user; returns how many sends succeeded.
    /// Individual failures (blocked bot, deleted account) are skipped.
    pub async fn broadcast_text(&self, text: &str) -> AppResult<usize> {
        let user_ids = self.store.list_user_ids().await?;
        let total = user_ids.len();

        let sent = stream::iter(user_ids)
            .map(|user_id| {
                let transport = self.transport.clone();
                let text = text.to_string();
                async move {
                    match transport.send_message(user_id, &text).await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::debug!(user_id, error = %e, "broadcast delivery skipped");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(FANOUT_CONCURRENCY)
            .filter(|delivered| futures::future::ready(*delivered))
            .count()
            .await;

        tracing::info!(sent, total, "broadcast finished");
        Ok(sent)
    }
}
