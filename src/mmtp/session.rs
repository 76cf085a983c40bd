//! Long-lived MMTP session with the edge router.
//!
//! The session owns one link at a time. A background receive loop handles inbound frames and,
//! when the link drops abnormally, redials with a fixed backoff. Running out of attempts is
//! reported through [`TransportSession::wait_fatal`]; the binary turns that into a process exit.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::ports::MessagePublisher;
use crate::config::MmtpConfig;
use crate::constants::NORMAL_CLOSE_CODE;
use crate::error::SessionError;
use crate::mmtp::wire::{mmtp_message, MmtpMessage, ResponseEnum, ResponseMessage};
use crate::observability::metrics;

const ABNORMAL_CLOSE_CODE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSE_CODE,
            reason: String::new(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSE_CODE,
            reason: reason.into(),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSE_CODE
    }
}

#[derive(Debug)]
pub enum LinkEvent {
    Frame(Vec<u8>),
    Closed(CloseReason),
}

/// One established connection to a router.
///
/// Frames pushed into `outbound` are written to the router in order; dropping `outbound`
/// closes the connection. `inbound` yields received frames and ends with a `Closed` event.
pub struct Link {
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Link, SessionError>;
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub own_mrn: String,
    pub reconnect_backoff: Duration,
    pub max_reconnect_attempts: u32,
    pub disconnect_grace: Duration,
}

impl From<&MmtpConfig> for SessionSettings {
    fn from(config: &MmtpConfig) -> Self {
        Self {
            own_mrn: config.own_mrn.clone(),
            reconnect_backoff: config.reconnect_backoff(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            disconnect_grace: config.disconnect_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub reconnect_attempts: u64,
    pub mismatched_responses: u64,
    pub error_responses: u64,
}

struct Shared {
    settings: SessionSettings,
    dialer: Arc<dyn Dialer>,
    state: watch::Sender<SessionState>,
    // Held across each write so sends are serialized and `last_sent` matches the wire order.
    writer: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    last_sent: StdMutex<Option<String>>,
    shutting_down: AtomicBool,
    shutdown: Notify,
    fatal: watch::Sender<Option<String>>,
    reconnect_attempts: AtomicU64,
    mismatched_responses: AtomicU64,
    error_responses: AtomicU64,
}

pub struct TransportSession {
    shared: Arc<Shared>,
    receiver: StdMutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    pub fn new(settings: SessionSettings, dialer: Arc<dyn Dialer>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (fatal, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                settings,
                dialer,
                state,
                writer: Mutex::new(None),
                last_sent: StdMutex::new(None),
                shutting_down: AtomicBool::new(false),
                shutdown: Notify::new(),
                fatal,
                reconnect_attempts: AtomicU64::new(0),
                mismatched_responses: AtomicU64::new(0),
                error_responses: AtomicU64::new(0),
            }),
            receiver: StdMutex::new(None),
        }
    }

    /// Dials the router, sends CONNECT and starts the receive loop.
    pub async fn start(&self) -> Result<(), SessionError> {
        let inbound = self.shared.establish().await?;
        let handle = tokio::spawn(run_receiver(self.shared.clone(), inbound));
        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Correlation id of the most recent frame written to the router.
    pub fn last_sent(&self) -> Option<String> {
        self.shared.last_sent()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
            mismatched_responses: self.shared.mismatched_responses.load(Ordering::Relaxed),
            error_responses: self.shared.error_responses.load(Ordering::Relaxed),
        }
    }

    /// Writes `message` to the router. Only permitted while connected.
    pub async fn send(&self, message: MmtpMessage) -> Result<String, SessionError> {
        let writer = self.shared.writer.lock().await;
        let state = self.state();
        let outbound = match writer.as_ref() {
            Some(outbound) if state == SessionState::Connected => outbound,
            _ => return Err(SessionError::SessionUnavailable(state)),
        };

        outbound
            .send(message.to_frame())
            .await
            .map_err(|_| SessionError::SessionUnavailable(SessionState::Disconnected))?;
        self.shared.record_sent(&message.uuid);
        debug!(uuid = %message.uuid, "Sent MMTP message");
        Ok(message.uuid)
    }

    /// Resolves once reconnection has been abandoned, with a description of the failure.
    pub async fn wait_fatal(&self) -> String {
        let mut fatal = self.shared.fatal.subscribe();
        loop {
            if let Some(message) = fatal.borrow_and_update().clone() {
                return message;
            }
            if fatal.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sends DISCONNECT, waits out the grace period and closes the link. Suppresses reconnection.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.notify_one();

        let outbound = self.shared.writer.lock().await.take();
        if let Some(outbound) = outbound {
            self.shared.set_state(SessionState::Closing);
            let disconnect = MmtpMessage::disconnect();
            match outbound.send(disconnect.to_frame()).await {
                Ok(()) => {
                    self.shared.record_sent(&disconnect.uuid);
                    info!("Sent DISCONNECT to edge router");
                }
                Err(_) => warn!("Link already closed; DISCONNECT not sent"),
            }
            tokio::time::sleep(self.shared.settings.disconnect_grace).await;
            drop(outbound);
        }

        self.shared.set_state(SessionState::Disconnected);
        if let Some(handle) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        info!("Transport session closed");
    }
}

#[async_trait]
impl MessagePublisher for TransportSession {
    async fn publish(&self, message: MmtpMessage) -> Result<String, SessionError> {
        self.send(message).await
    }
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn record_sent(&self, uuid: &str) {
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner) = Some(uuid.to_string());
    }

    fn last_sent(&self) -> Option<String> {
        self.last_sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn establish(&self) -> Result<mpsc::Receiver<LinkEvent>, SessionError> {
        self.set_state(SessionState::Connecting);
        let result = self.connect_link().await;
        if result.is_err() {
            self.set_state(SessionState::Disconnected);
        }
        result
    }

    async fn connect_link(&self) -> Result<mpsc::Receiver<LinkEvent>, SessionError> {
        let Link { outbound, inbound } = self.dialer.dial().await?;
        let connect = MmtpMessage::connect(&self.settings.own_mrn);

        let mut writer = self.writer.lock().await;
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        outbound
            .send(connect.to_frame())
            .await
            .map_err(|_| SessionError::Connect("link closed before CONNECT was sent".into()))?;
        self.record_sent(&connect.uuid);
        *writer = Some(outbound);
        self.set_state(SessionState::Connected);

        metrics::session::connected();
        info!(own_mrn = %self.settings.own_mrn, "Connected to edge router");
        Ok(inbound)
    }

    async fn detach_writer(&self) {
        self.writer.lock().await.take();
    }

    /// Redials until connected, out of attempts, or shutting down.
    async fn reconnect(&self) -> Option<mpsc::Receiver<LinkEvent>> {
        let max_attempts = self.settings.max_reconnect_attempts;
        let mut attempts = 0;

        while attempts < max_attempts && !self.is_shutting_down() {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
                _ = self.shutdown.notified() => {}
            }
            if self.is_shutting_down() {
                break;
            }

            attempts += 1;
            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            metrics::session::reconnect_attempt();
            match self.establish().await {
                Ok(inbound) => {
                    info!(attempts, "Reconnected to edge router");
                    return Some(inbound);
                }
                Err(SessionError::ShuttingDown) => break,
                Err(e) => {
                    error!(attempt = attempts, max_attempts, error = %e, "Couldn't connect to edge router, trying again");
                }
            }
        }

        if !self.is_shutting_down() {
            let failure = SessionError::ReconnectExhausted(attempts).to_string();
            error!(error = %failure, "Giving up on the edge router");
            self.fatal.send_replace(Some(failure));
        }
        None
    }

    fn handle_frame(&self, frame: &[u8]) {
        let message = match MmtpMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Received a frame that is not an MMTP message");
                return;
            }
        };

        match message.body {
            Some(mmtp_message::Body::ResponseMessage(response)) => self.handle_response(&response),
            Some(mmtp_message::Body::ProtocolMessage(protocol)) => {
                warn!(
                    kind = ?protocol.protocol_msg_type(),
                    "Received a protocol message from the edge router that cannot be handled"
                );
            }
            None => debug!(uuid = %message.uuid, "Received an MMTP message without a body"),
        }
    }

    fn handle_response(&self, response: &ResponseMessage) {
        let last_sent = self.last_sent();
        if last_sent.as_deref() != Some(response.response_to_uuid.as_str()) {
            self.mismatched_responses.fetch_add(1, Ordering::Relaxed);
            metrics::session::response_mismatch();
            error!(
                response_to = %response.response_to_uuid,
                last_sent = ?last_sent,
                "Received a response to the wrong message"
            );
        }

        if response.response() != ResponseEnum::Good {
            self.error_responses.fetch_add(1, Ordering::Relaxed);
            metrics::session::error_response();
            error!(
                response = ?response.response(),
                reason = response.reason_text.as_deref().unwrap_or(""),
                "Edge router answered with an error"
            );
        } else {
            debug!(response_to = %response.response_to_uuid, "Edge router acknowledged message");
        }
    }
}

async fn run_receiver(shared: Arc<Shared>, mut inbound: mpsc::Receiver<LinkEvent>) {
    loop {
        let close = loop {
            match inbound.recv().await {
                Some(LinkEvent::Frame(frame)) => shared.handle_frame(&frame),
                Some(LinkEvent::Closed(reason)) => break reason,
                None => break CloseReason::abnormal("link dropped without a close frame"),
            }
        };
        shared.detach_writer().await;

        if shared.is_shutting_down() || close.is_normal() {
            shared.set_state(SessionState::Disconnected);
            info!(code = close.code, reason = %close.reason, "Edge router connection closed");
            return;
        }

        error!(code = close.code, reason = %close.reason, "Edge router connection lost");
        shared.set_state(SessionState::Disconnected);
        match shared.reconnect().await {
            Some(next) => inbound = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmtp::wire::{protocol_message, ApplicationMessage, ProtocolMessageType};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;

    const OWN_MRN: &str = "urn:mrn:mcp:device:idp1:org1:gateway";

    /// The router end of a scripted link.
    struct FakeRouter {
        frames: mpsc::Receiver<Vec<u8>>,
        events: mpsc::Sender<LinkEvent>,
    }

    impl FakeRouter {
        async fn next_message(&mut self) -> MmtpMessage {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("link closed");
            MmtpMessage::from_frame(&frame).unwrap()
        }

        async fn respond(&self, to: &str, response: ResponseEnum) {
            let frame = MmtpMessage::response(to, response, None).to_frame();
            self.events.send(LinkEvent::Frame(frame)).await.unwrap();
        }

        async fn close(&self, reason: CloseReason) {
            self.events.send(LinkEvent::Closed(reason)).await.unwrap();
        }
    }

    struct ScriptedDialer {
        attempts: AtomicU32,
        failing: HashSet<u32>,
        routers: mpsc::UnboundedSender<FakeRouter>,
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self) -> Result<Link, SessionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.contains(&attempt) {
                return Err(SessionError::Connect(format!("attempt {attempt} refused")));
            }
            let (outbound, frames) = mpsc::channel(16);
            let (events, inbound) = mpsc::channel(16);
            let _ = self.routers.send(FakeRouter { frames, events });
            Ok(Link { outbound, inbound })
        }
    }

    fn session(
        failing: impl IntoIterator<Item = u32>,
        max_reconnect_attempts: u32,
    ) -> (TransportSession, Arc<ScriptedDialer>, mpsc::UnboundedReceiver<FakeRouter>) {
        let (routers, router_rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(ScriptedDialer {
            attempts: AtomicU32::new(0),
            failing: failing.into_iter().collect(),
            routers,
        });
        let settings = SessionSettings {
            own_mrn: OWN_MRN.to_string(),
            reconnect_backoff: Duration::from_millis(10),
            max_reconnect_attempts,
            disconnect_grace: Duration::from_millis(10),
        };
        (TransportSession::new(settings, dialer.clone()), dialer, router_rx)
    }

    async fn wait_for_state(session: &TransportSession, wanted: SessionState) {
        let mut states = session.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    async fn next_router(routers: &mut mpsc::UnboundedReceiver<FakeRouter>) -> FakeRouter {
        tokio::time::timeout(Duration::from_secs(5), routers.recv())
            .await
            .expect("timed out waiting for a dial")
            .unwrap()
    }

    fn protocol_kind(message: &MmtpMessage) -> ProtocolMessageType {
        message.protocol_message().unwrap().protocol_msg_type()
    }

    fn payload() -> MmtpMessage {
        MmtpMessage::send(ApplicationMessage::new("subject", 0, OWN_MRN, b"x".to_vec(), vec![]))
    }

    #[tokio::test]
    async fn connect_is_the_first_frame() {
        let (session, _, mut routers) = session([], 3);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;

        let connect = router.next_message().await;
        assert_eq!(protocol_kind(&connect), ProtocolMessageType::ConnectMessage);
        match connect.protocol_message().unwrap().body.as_ref().unwrap() {
            protocol_message::Body::ConnectMessage(c) => assert_eq!(c.own_mrn.as_deref(), Some(OWN_MRN)),
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.last_sent(), Some(connect.uuid));
    }

    #[tokio::test]
    async fn send_requires_a_connection() {
        let (session, _, _routers) = session([], 3);
        let result = session.send(payload()).await;
        assert!(matches!(
            result,
            Err(SessionError::SessionUnavailable(SessionState::Disconnected))
        ));
    }

    #[tokio::test]
    async fn failed_initial_dial_is_reported() {
        let (session, _, _routers) = session([1], 3);
        assert!(matches!(session.start().await, Err(SessionError::Connect(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn send_records_the_correlation_id() {
        let (session, _, mut routers) = session([], 3);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;
        router.next_message().await;

        let message = payload();
        let uuid = message.uuid.clone();
        assert_eq!(session.send(message).await.unwrap(), uuid);
        assert_eq!(session.last_sent().as_deref(), Some(uuid.as_str()));
        assert_eq!(router.next_message().await.uuid, uuid);
    }

    #[tokio::test]
    async fn mismatched_response_is_logged_and_tolerated() {
        let (session, _, mut routers) = session([], 3);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;
        router.next_message().await;

        let sent = session.send(payload()).await.unwrap();
        router.respond("00000000-0000-0000-0000-000000000000", ResponseEnum::Good).await;
        router.respond(&sent, ResponseEnum::Good).await;
        router.respond(&sent, ResponseEnum::Error).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.stats().error_responses < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = session.stats();
        assert_eq!(stats.mismatched_responses, 1);
        assert_eq!(stats.error_responses, 1);
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.send(payload()).await.is_ok());
    }

    #[tokio::test]
    async fn abnormal_close_reconnects_after_failed_attempts() {
        // dial 1 connects; reconnect attempts 1 and 2 fail, attempt 3 succeeds
        let (session, dialer, mut routers) = session([2, 3], 10);
        session.start().await.unwrap();
        let mut first = next_router(&mut routers).await;
        first.next_message().await;

        first.close(CloseReason::abnormal("connection reset")).await;

        let mut second = next_router(&mut routers).await;
        let connect = second.next_message().await;
        assert_eq!(protocol_kind(&connect), ProtocolMessageType::ConnectMessage);
        wait_for_state(&session, SessionState::Connected).await;

        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(session.stats().reconnect_attempts, 3);
        assert!(session.send(payload()).await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_reconnects_signal_fatal() {
        let (session, dialer, mut routers) = session([2, 3, 4], 3);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;
        router.next_message().await;

        router.close(CloseReason::abnormal("router went away")).await;

        let failure = tokio::time::timeout(Duration::from_secs(5), session.wait_fatal())
            .await
            .unwrap();
        assert!(failure.contains("3 attempts"));
        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn normal_close_does_not_reconnect() {
        let (session, dialer, mut routers) = session([], 3);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;
        router.next_message().await;

        router.close(CloseReason::normal()).await;
        wait_for_state(&session, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(session.stats().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn shutdown_sends_disconnect_and_stops_sending() {
        let (session, _, mut routers) = session([], 3);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;
        router.next_message().await;

        session.shutdown().await;

        let disconnect = router.next_message().await;
        assert_eq!(protocol_kind(&disconnect), ProtocolMessageType::DisconnectMessage);
        assert_eq!(session.last_sent(), Some(disconnect.uuid));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.send(payload()).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_interrupts_reconnection() {
        let (session, dialer, mut routers) = session(2..=100, 100);
        session.start().await.unwrap();
        let mut router = next_router(&mut routers).await;
        router.next_message().await;

        router.close(CloseReason::abnormal("reset")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        session.shutdown().await;
        let attempts = dialer.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(dialer.attempts.load(Ordering::SeqCst), attempts);
        assert!(attempts < 100);
        assert!(tokio::time::timeout(Duration::from_millis(50), session.wait_fatal())
            .await
            .is_err());
    }
}
