//! Best-effort fan-out to the members of a room.

use crate::registry::ConnectionRegistry;
use crate::room::RoomId;
use roomcast_protocol::{codec, ProtocolError, ServerMessage};
use roomcast_transport::ConnectionId;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{trace, warn};

/// Counter of members dropped after a failed send.
pub const DELIVERY_FAILURES_TOTAL: &str = "roomcast_delivery_failures_total";

/// Outcome of a single delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of members the payload was handed to.
    pub delivered: usize,
    /// Members whose send failed; they have been removed from the room.
    pub failed: Vec<ConnectionId>,
}

impl DeliveryReport {
    /// Number of members targeted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Delivers messages to every connection registered in a room.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastEngine {
    /// Create an engine over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Get the registry this engine delivers through.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Wait for the room's turn to broadcast.
    ///
    /// Holding the guard across store-then-deliver keeps every member's view
    /// of the room in one order. Returns `None` if the room has no sequencer,
    /// which means it has no members either.
    pub async fn sequence(&self, room: &RoomId) -> Option<OwnedMutexGuard<()>> {
        let lock = self.registry.sequencer(room)?;
        Some(lock.lock_owned().await)
    }

    /// Encode a message once and deliver it to the room.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be encoded; send failures
    /// are reported in the [`DeliveryReport`].
    pub async fn deliver(
        &self,
        room: &RoomId,
        message: &ServerMessage,
    ) -> Result<DeliveryReport, ProtocolError> {
        let payload: Arc<str> = Arc::from(codec::encode(message)?);
        trace!(room = %room, kind = message.kind(), "Delivering");
        Ok(self.deliver_raw(room, payload).await)
    }

    /// Deliver pre-encoded text to the room.
    ///
    /// Targets are the members at the moment delivery starts. A member whose
    /// send fails is treated as disconnected: it is removed from the room and
    /// delivery continues with the rest.
    pub async fn deliver_raw(&self, room: &RoomId, payload: Arc<str>) -> DeliveryReport {
        let members = self.registry.members_of(room);
        let mut report = DeliveryReport::default();

        for member in members {
            match member.sink.send(payload.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        room = %room,
                        connection = %member.id,
                        error = %e,
                        "Delivery failed, dropping member"
                    );
                    self.registry.leave(room, &member.id);
                    counter!(DELIVERY_FAILURES_TOTAL).increment(1);
                    report.failed.push(member.id);
                }
            }
        }

        trace!(
            room = %room,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Delivered"
        );

        report
    }
}
