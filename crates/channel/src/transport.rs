//! Transport seam between the connection layer and the concrete channel
//! provider. The real provider wraps the vendor socket; `LogTransport` is a
//! stub that logs sends and returns receipt ids, so the engine runs
//! end-to-end without a channel account.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use reclaim_core::types::{InboundEvent, Receipt};
use reclaim_core::ReclaimResult;

use crate::session::SessionCredentials;

/// Outcome of starting a handshake.
#[derive(Debug, Clone)]
pub enum HandshakeStart {
    /// Stored credentials were accepted; no pairing needed.
    Restored(SessionCredentials),
    /// A fresh pairing artifact must be presented to the operator.
    PairingRequired { code: String },
}

/// Why the transport dropped the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Explicit logout; the session is gone for good, do not reconnect.
    LoggedOut,
    /// Anything else: socket closed, provider restart, network loss.
    TransportClosed,
}

/// Events pushed up from the transport to the connection layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A message not authored by this session.
    Inbound(InboundEvent),
    Dropped(DisconnectCause),
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Start the handshake, preferring stored credentials when present.
    async fn begin_handshake(
        &self,
        stored: Option<&SessionCredentials>,
    ) -> ReclaimResult<HandshakeStart>;

    /// Block until the operator completes pairing. The connection layer
    /// wraps this in the handshake timeout.
    async fn await_pairing(&self) -> ReclaimResult<SessionCredentials>;

    async fn send_text(&self, to: &str, body: &str) -> ReclaimResult<Receipt>;

    /// Next inbound or lifecycle event; `None` when the transport is done.
    async fn next_event(&self) -> Option<TransportEvent>;
}

/// Development transport: every handshake succeeds, sends are logged and
/// acknowledged with a generated receipt, no events are ever produced.
pub struct LogTransport;

#[async_trait]
impl ChannelTransport for LogTransport {
    async fn begin_handshake(
        &self,
        stored: Option<&SessionCredentials>,
    ) -> ReclaimResult<HandshakeStart> {
        match stored {
            Some(creds) => Ok(HandshakeStart::Restored(creds.clone())),
            None => Ok(HandshakeStart::PairingRequired {
                code: Uuid::new_v4().to_string(),
            }),
        }
    }

    async fn await_pairing(&self) -> ReclaimResult<SessionCredentials> {
        // Instant pairing: the stub operator always scans immediately.
        Ok(SessionCredentials {
            device_id: Uuid::new_v4().to_string(),
            auth_blob: "log-transport".to_string(),
        })
    }

    async fn send_text(&self, to: &str, body: &str) -> ReclaimResult<Receipt> {
        info!(to = to, body_len = body.len(), "sending channel message");
        Ok(Receipt {
            message_id: Uuid::new_v4().to_string(),
            accepted_at: Utc::now(),
        })
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        std::future::pending().await
    }
}
