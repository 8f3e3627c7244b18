//! Signal router.
//!
//! Maps instance ids to the mailboxes of their running control loops. The
//! router only delivers; deciding whether a signal may change state is up to
//! the receiving instance, which records every signal it consumes.

use crate::model::SignalEnvelope;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct SignalRouter {
    routes: Arc<DashMap<Uuid, mpsc::UnboundedSender<SignalEnvelope>>>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, instance_id: Uuid) -> mpsc::UnboundedReceiver<SignalEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(instance_id, tx);
        rx
    }

    /// Stops routing to `instance_id`. Signals already queued stay in the
    /// instance's mailbox.
    pub(crate) fn deregister(&self, instance_id: Uuid) {
        self.routes.remove(&instance_id);
    }

    pub fn is_routed(&self, instance_id: Uuid) -> bool {
        self.routes.contains_key(&instance_id)
    }

    /// Number of instances currently accepting signals.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Queues `envelope` for `instance_id`.
    ///
    /// Hands the envelope back if the instance is not accepting signals.
    pub fn route(
        &self,
        instance_id: Uuid,
        envelope: SignalEnvelope,
    ) -> Result<(), SignalEnvelope> {
        let Some(sender) = self.routes.get(&instance_id) else {
            return Err(envelope);
        };
        debug!(
            "Routing signal: instance={}, signal={}, actor={}",
            instance_id,
            envelope.signal.kind(),
            envelope.signal.actor()
        );
        sender.send(envelope).map_err(|returned| returned.0)
    }
}
