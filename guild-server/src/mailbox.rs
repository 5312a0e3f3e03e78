//! Outbound delivery for the development server.
//!
//! Without a client framing layer, per-session notifications are parked in a
//! bounded mailbox the HTTP API can drain. Script events, stronghold
//! broadcasts and defender refreshes have no consumer here and are logged.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use guild_core::ports::Notification;
use guild_core::types::SessionId;

use crate::bridge::OutboundEvent;

/// Notifications kept per session before the oldest are dropped
pub const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Default)]
pub struct Mailbox {
    queues: Mutex<HashMap<SessionId, VecDeque<Notification>>>,
}

impl Mailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deliver(&self, session: SessionId, notification: Notification) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(session).or_default();
        if queue.len() >= MAILBOX_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(notification);
    }

    /// Take everything queued for `session`, oldest first
    pub fn drain(&self, session: SessionId) -> Vec<Notification> {
        self.queues
            .lock()
            .remove(&session)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending(&self, session: SessionId) -> usize {
        self.queues.lock().get(&session).map_or(0, VecDeque::len)
    }
}

/// Consume engine output until the channel closes
pub async fn pump_outbound(mut events: mpsc::UnboundedReceiver<OutboundEvent>, mailbox: Arc<Mailbox>) {
    while let Some(event) = events.recv().await {
        match event {
            OutboundEvent::Notify {
                session,
                notification,
            } => mailbox.deliver(session, notification),
            OutboundEvent::ScriptEvent(name) => info!(event = %name, "Script event fired"),
            OutboundEvent::StrongholdBroadcast(suffix) => {
                info!(suffix = %suffix, "Stronghold broadcast fired")
            }
            OutboundEvent::DefenderRefresh { zone, owner } => {
                debug!(%zone, owner, "Defender affiliation refresh")
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_in_order_and_empties() {
        let mailbox = Mailbox::default();
        mailbox.deliver(1, Notification::Joined { guild_id: 3 });
        mailbox.deliver(1, Notification::Left { guild_id: 3 });
        assert_eq!(
            mailbox.drain(1),
            vec![Notification::Joined { guild_id: 3 }, Notification::Left { guild_id: 3 }]
        );
        assert_eq!(mailbox.pending(1), 0);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mailbox = Mailbox::default();
        for guild_id in 0..(MAILBOX_CAPACITY as u32 + 2) {
            mailbox.deliver(9, Notification::Joined { guild_id });
        }
        let drained = mailbox.drain(9);
        assert_eq!(drained.len(), MAILBOX_CAPACITY);
        assert_eq!(drained[0], Notification::Joined { guild_id: 2 });
    }

    #[tokio::test]
    async fn test_pump_routes_notifications() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox::new();
        tx.send(OutboundEvent::Notify {
            session: 4,
            notification: Notification::Created { guild_id: 1 },
        })
        .unwrap();
        tx.send(OutboundEvent::ScriptEvent("::OnAgitInit".into())).unwrap();
        drop(tx);

        pump_outbound(rx, mailbox.clone()).await;
        assert_eq!(mailbox.drain(4), vec![Notification::Created { guild_id: 1 }]);
    }
}
