//! The channel connection — single logical owner of the transport. All
//! sends are serialized through it; reconnection after an unexpected drop
//! is automatic with backoff, bounded by a configured attempt cap.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{error, info, warn};

use reclaim_core::alerts::{make_alert, AlertSeverity, AlertSink};
use reclaim_core::config::ChannelConfig;
use reclaim_core::types::{InboundEvent, OutboundSender, Receipt};
use reclaim_core::{ReclaimError, ReclaimResult};

use crate::session::{CredentialStore, SessionState};
use crate::transport::{ChannelTransport, DisconnectCause, HandshakeStart, TransportEvent};

/// Connection-state transitions broadcast to dependents.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A fresh pairing artifact must be presented to the operator.
    AuthChallenge { code: String },
    Connected,
    Disconnected,
    /// Reconnect attempts exhausted; auto-retry halted until manual restart.
    ConnectionLost { attempts: u32 },
}

pub struct ChannelConnection {
    transport: Arc<dyn ChannelTransport>,
    config: ChannelConfig,
    state: parking_lot::Mutex<SessionState>,
    store: CredentialStore,
    events: broadcast::Sender<ChannelEvent>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    alerts: Arc<dyn AlertSink>,
}

impl ChannelConnection {
    /// Creates the connection plus the single typed inbound channel the
    /// response router consumes.
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        config: ChannelConfig,
        alerts: Arc<dyn AlertSink>,
    ) -> (Arc<Self>, mpsc::Receiver<InboundEvent>) {
        let store = CredentialStore::new(&config.session_path, &config.session_id);
        let (events, _) = broadcast::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let conn = Arc::new(Self {
            transport,
            config,
            state: parking_lot::Mutex::new(SessionState::Unauthenticated),
            store,
            events,
            inbound_tx,
            alerts,
        });
        (conn, inbound_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Performs the handshake, pairing first if no stored credentials are
    /// accepted. Pairing is bounded by the configured timeout.
    pub async fn connect(&self) -> ReclaimResult<()> {
        *self.state.lock() = SessionState::AwaitingHandshake;
        let stored = self.store.load();

        let creds = match self.transport.begin_handshake(stored.as_ref()).await {
            Ok(HandshakeStart::Restored(creds)) => creds,
            Ok(HandshakeStart::PairingRequired { code }) => {
                info!(session = %self.config.session_id, "pairing required, presenting challenge");
                let _ = self.events.send(ChannelEvent::AuthChallenge { code });

                let wait = Duration::from_secs(self.config.handshake_timeout_secs);
                match timeout(wait, self.transport.await_pairing()).await {
                    Ok(Ok(creds)) => creds,
                    Ok(Err(e)) => {
                        *self.state.lock() = SessionState::Disconnected;
                        return Err(e);
                    }
                    Err(_) => {
                        *self.state.lock() = SessionState::Disconnected;
                        return Err(ReclaimError::AuthTimeout(self.config.handshake_timeout_secs));
                    }
                }
            }
            Err(e) => {
                *self.state.lock() = SessionState::Disconnected;
                return Err(e);
            }
        };

        // Credentials persist so a process restart skips re-pairing. A
        // write failure costs one re-pair later, not the session.
        if let Err(e) = self.store.save(&creds) {
            warn!(error = %e, "failed to persist session credentials");
        }

        *self.state.lock() = SessionState::Connected;
        let _ = self.events.send(ChannelEvent::Connected);
        metrics::counter!("channel.connected").increment(1);
        info!(session = %self.config.session_id, device = %creds.device_id, "channel connected");
        Ok(())
    }

    /// Sends one message. Hard precondition: the session is Connected.
    pub async fn send(&self, to: &str, body: &str) -> ReclaimResult<Receipt> {
        if self.state() != SessionState::Connected {
            return Err(ReclaimError::NotConnected);
        }

        let receipt = self.transport.send_text(to, body).await?;
        metrics::counter!("channel.sends").increment(1);
        Ok(receipt)
    }

    /// Event pump: forwards inbound messages and drives reconnection.
    /// Runs until logout, reconnect exhaustion, or transport end.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.transport.next_event().await {
                Some(TransportEvent::Inbound(event)) => {
                    metrics::counter!("channel.inbound").increment(1);
                    if self.inbound_tx.send(event).await.is_err() {
                        warn!("inbound consumer gone, dropping message");
                    }
                }
                Some(TransportEvent::Dropped(cause)) => {
                    *self.state.lock() = SessionState::Disconnected;
                    let _ = self.events.send(ChannelEvent::Disconnected);
                    metrics::counter!("channel.disconnects").increment(1);

                    match cause {
                        DisconnectCause::LoggedOut => {
                            info!("session logged out, tearing down");
                            self.store.clear();
                            return;
                        }
                        DisconnectCause::TransportClosed => {
                            warn!("transport dropped, starting reconnect");
                            if !self.reconnect_with_backoff().await {
                                return;
                            }
                        }
                    }
                }
                None => {
                    info!("transport event stream ended");
                    return;
                }
            }
        }
    }

    /// Retries `connect` with backoff `base * attempt`, up to the cap.
    /// Exceeding the cap emits exactly one `ConnectionLost`.
    async fn reconnect_with_backoff(&self) -> bool {
        let max = self.config.max_reconnect_attempts;
        for attempt in 1..=max {
            let delay = Duration::from_secs(self.config.reconnect_base_secs * u64::from(attempt));
            warn!(attempt, max, delay_secs = delay.as_secs(), "reconnect attempt scheduled");
            tokio::time::sleep(delay).await;

            match self.connect().await {
                Ok(()) => {
                    metrics::counter!("channel.reconnects").increment(1);
                    info!(attempt, "reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        error!(attempts = max, "reconnect attempts exhausted, halting auto-retry");
        let _ = self.events.send(ChannelEvent::ConnectionLost { attempts: max });
        self.alerts.raise(make_alert(
            AlertSeverity::Critical,
            "channel",
            format!("connection lost after {max} reconnect attempts"),
        ));
        metrics::counter!("channel.connection_lost").increment(1);
        false
    }
}

#[async_trait]
impl OutboundSender for ChannelConnection {
    async fn send(&self, to: &str, body: &str) -> ReclaimResult<Receipt> {
        ChannelConnection::send(self, to, body).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::SessionCredentials;
    use chrono::Utc;
    use parking_lot::Mutex;
    use reclaim_core::alerts::capture_sink;
    use std::collections::VecDeque;
    use uuid::Uuid;

    struct MockTransport {
        handshakes: Mutex<VecDeque<ReclaimResult<HandshakeStart>>>,
        pairings: Mutex<VecDeque<SessionCredentials>>,
        events: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
    }

    impl MockTransport {
        fn new(
            handshakes: Vec<ReclaimResult<HandshakeStart>>,
        ) -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            let transport = Arc::new(Self {
                handshakes: Mutex::new(handshakes.into()),
                pairings: Mutex::new(VecDeque::new()),
                events: tokio::sync::Mutex::new(rx),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl ChannelTransport for MockTransport {
        async fn begin_handshake(
            &self,
            _stored: Option<&SessionCredentials>,
        ) -> ReclaimResult<HandshakeStart> {
            self.handshakes
                .lock()
                .pop_front()
                .unwrap_or(Err(ReclaimError::Channel("no scripted handshake".into())))
        }

        async fn await_pairing(&self) -> ReclaimResult<SessionCredentials> {
            // Guard must not be held across the await below.
            let next = self.pairings.lock().pop_front();
            match next {
                Some(creds) => Ok(creds),
                // Operator never scans; caller's timeout fires.
                None => std::future::pending().await,
            }
        }

        async fn send_text(&self, _to: &str, _body: &str) -> ReclaimResult<Receipt> {
            Ok(Receipt {
                message_id: Uuid::new_v4().to_string(),
                accepted_at: Utc::now(),
            })
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            self.events.lock().await.recv().await
        }
    }

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            session_path: std::env::temp_dir()
                .join(format!("reclaim-chan-{}", Uuid::new_v4()))
                .to_str()
                .unwrap()
                .to_string(),
            session_id: "test".to_string(),
            handshake_timeout_secs: 60,
            reconnect_base_secs: 3,
            max_reconnect_attempts: 5,
        }
    }

    fn creds() -> SessionCredentials {
        SessionCredentials {
            device_id: "device-1".to_string(),
            auth_blob: "blob".to_string(),
        }
    }

    fn restored() -> ReclaimResult<HandshakeStart> {
        Ok(HandshakeStart::Restored(creds()))
    }

    fn transport_error() -> ReclaimResult<HandshakeStart> {
        Err(ReclaimError::Channel("socket closed".into()))
    }

    async fn drain_events(rx: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_persists_credentials() {
        let (transport, _tx) = MockTransport::new(vec![restored()]);
        let (conn, _inbound) =
            ChannelConnection::new(transport, test_config(), reclaim_core::alerts::noop_sink());

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), SessionState::Connected);
        assert_eq!(conn.store.load(), Some(creds()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_timeout_yields_auth_timeout() {
        let (transport, _tx) = MockTransport::new(vec![Ok(HandshakeStart::PairingRequired {
            code: "PAIR-123".to_string(),
        })]);
        let (conn, _inbound) =
            ChannelConnection::new(transport, test_config(), reclaim_core::alerts::noop_sink());
        let mut events = conn.subscribe();

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ReclaimError::AuthTimeout(60)));
        assert_eq!(conn.state(), SessionState::Disconnected);

        let seen = drain_events(&mut events).await;
        assert!(matches!(
            seen.first(),
            Some(ChannelEvent::AuthChallenge { code }) if code == "PAIR-123"
        ));
    }

    #[tokio::test]
    async fn test_send_requires_connected_state() {
        let (transport, _tx) = MockTransport::new(vec![]);
        let (conn, _inbound) =
            ChannelConnection::new(transport, test_config(), reclaim_core::alerts::noop_sink());

        let err = conn.send("5511999990000", "oi").await.unwrap_err();
        assert!(matches!(err, ReclaimError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_emits_one_connection_lost() {
        // First handshake connects; the five retries after the drop fail.
        let mut script = vec![restored()];
        script.extend((0..5).map(|_| transport_error()));
        let (transport, tx) = MockTransport::new(script);

        let alerts = capture_sink();
        let (conn, _inbound) = ChannelConnection::new(transport, test_config(), alerts.clone());
        conn.connect().await.unwrap();
        let mut events = conn.subscribe();

        let pump = tokio::spawn(conn.clone().run());
        tx.send(TransportEvent::Dropped(DisconnectCause::TransportClosed))
            .await
            .unwrap();
        pump.await.unwrap();

        let seen = drain_events(&mut events).await;
        let lost = seen
            .iter()
            .filter(|e| matches!(e, ChannelEvent::ConnectionLost { .. }))
            .count();
        assert_eq!(lost, 1);
        assert!(matches!(
            seen.iter().find(|e| matches!(e, ChannelEvent::ConnectionLost { .. })),
            Some(ChannelEvent::ConnectionLost { attempts: 5 })
        ));
        assert_eq!(conn.state(), SessionState::Disconnected);
        assert_eq!(alerts.count_severity(AlertSeverity::Critical), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_recovers_after_transient_failures() {
        let script = vec![restored(), transport_error(), transport_error(), restored()];
        let (transport, tx) = MockTransport::new(script);

        let (conn, _inbound) =
            ChannelConnection::new(transport, test_config(), reclaim_core::alerts::noop_sink());
        conn.connect().await.unwrap();

        let pump = tokio::spawn(conn.clone().run());
        tx.send(TransportEvent::Dropped(DisconnectCause::TransportClosed))
            .await
            .unwrap();

        // Give the pump time to walk the backoff schedule (virtual time).
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(conn.state(), SessionState::Connected);

        drop(tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_tears_down_without_retry() {
        let (transport, tx) = MockTransport::new(vec![restored()]);
        let (conn, _inbound) =
            ChannelConnection::new(transport, test_config(), reclaim_core::alerts::noop_sink());
        conn.connect().await.unwrap();

        let pump = tokio::spawn(conn.clone().run());
        tx.send(TransportEvent::Dropped(DisconnectCause::LoggedOut))
            .await
            .unwrap();
        pump.await.unwrap();

        assert_eq!(conn.state(), SessionState::Disconnected);
        // Logout wipes stored credentials.
        assert!(conn.store.load().is_none());
    }

    #[tokio::test]
    async fn test_inbound_events_forwarded() {
        let (transport, tx) = MockTransport::new(vec![restored()]);
        let (conn, mut inbound) =
            ChannelConnection::new(transport, test_config(), reclaim_core::alerts::noop_sink());
        conn.connect().await.unwrap();

        let _pump = tokio::spawn(conn.clone().run());
        tx.send(TransportEvent::Inbound(InboundEvent {
            from: "r1".to_string(),
            text: "quero voltar".to_string(),
            timestamp: Utc::now(),
        }))
        .await
        .unwrap();

        let event = inbound.recv().await.unwrap();
        assert_eq!(event.from, "r1");
        assert_eq!(event.text, "quero voltar");
    }
}
