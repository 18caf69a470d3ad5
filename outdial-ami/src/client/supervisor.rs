//! Connection supervisor.
//!
//! The supervisor owns at most one live [`AmiClient`] and is the only
//! path to it. It is responsible for:
//! - Lazily (re-)establishing the connection with retrying backoff
//! - Rotating in a fresh connection, disconnecting the prior one first
//! - The process-wide handler registry, so handlers survive rotation
//! - Retrying sends that fail on a dead socket
//! - The idle keep-alive probe

use super::{AmiClient, AmiConfig, AmiEventHandler, HandlerList};
use crate::error::AmiError;
use crate::proto::AmiAction;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Connect attempts per (re-)establishment.
const CONNECT_MAX_RETRIES: u32 = 3;
/// First connect retry delay; doubles per attempt.
const CONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Send attempts before giving up.
const SEND_MAX_ATTEMPTS: u32 = 3;
/// First send retry delay; doubles per attempt.
const SEND_INITIAL_DELAY: Duration = Duration::from_millis(100);
/// Idle seconds after which the keep-alive probe fires.
const KEEPALIVE_IDLE_SECS: i64 = 45;

/// Owns the control-channel connection and its handler registry.
pub struct AmiSupervisor {
    config: AmiConfig,
    client: Mutex<Option<AmiClient>>,
    handlers: HandlerList,
}

impl AmiSupervisor {
    pub fn new(config: AmiConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            handlers: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Register an event handler.
    ///
    /// Handlers live in the supervisor's registry, not on a connection,
    /// so a rotated connection starts with every previously registered
    /// handler attached. Duplicate names are ignored.
    pub fn add_handler(&self, handler: Arc<dyn AmiEventHandler>) {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|h| h.name() == handler.name()) {
            debug!(handler = handler.name(), "handler already registered");
            return;
        }
        info!(handler = handler.name(), total = handlers.len() + 1, "event handler registered");
        handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn is_connected(&self) -> bool {
        self.client
            .lock()
            .await
            .as_ref()
            .is_some_and(AmiClient::is_connected)
    }

    /// No-op when the connection is live; otherwise rotate in a fresh
    /// one with the default retry policy.
    pub async fn ensure_connected(&self) -> Result<(), AmiError> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().is_some_and(AmiClient::is_connected) {
            return Ok(());
        }
        self.rotate_locked(&mut guard, CONNECT_MAX_RETRIES, CONNECT_INITIAL_DELAY)
            .await
    }

    /// Force a fresh connection, disconnecting any prior one first.
    pub async fn rotate(&self) -> Result<(), AmiError> {
        let mut guard = self.client.lock().await;
        self.rotate_locked(&mut guard, CONNECT_MAX_RETRIES, CONNECT_INITIAL_DELAY)
            .await
    }

    /// Connect with an explicit retry limit. Exponential backoff
    /// (`delay *= 2`) between attempts; the error after exhaustion is a
    /// value, never a panic.
    pub async fn connect(&self, max_retries: u32, initial_delay: Duration) -> Result<(), AmiError> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().is_some_and(AmiClient::is_connected) {
            return Ok(());
        }
        self.rotate_locked(&mut guard, max_retries, initial_delay).await
    }

    async fn rotate_locked(
        &self,
        guard: &mut Option<AmiClient>,
        max_retries: u32,
        initial_delay: Duration,
    ) -> Result<(), AmiError> {
        if let Some(old) = guard.take() {
            debug!(connection_id = %old.connection_id(), "disconnecting prior connection");
            old.disconnect().await;
        }

        let mut delay = initial_delay;
        let mut last_error = AmiError::NotConnected { attempts: 0 };
        for attempt in 1..=max_retries.max(1) {
            match AmiClient::connect(&self.config, Arc::clone(&self.handlers)).await {
                Ok(client) => {
                    info!(
                        connection_id = %client.connection_id(),
                        attempt,
                        handlers = self.handler_count(),
                        "control channel established"
                    );
                    *guard = Some(client);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_retries, error = %e, "connect attempt failed");
                    last_error = e;
                    if attempt < max_retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Send one action, transparently re-establishing the connection.
    ///
    /// Up to three attempts with growing delay; a socket error marks the
    /// connection down so the next attempt reconnects.
    pub async fn send_action(&self, action: &AmiAction) -> Result<(), AmiError> {
        let mut delay = SEND_INITIAL_DELAY;
        let mut last_error = AmiError::NotConnected { attempts: 0 };

        for attempt in 1..=SEND_MAX_ATTEMPTS {
            match self.ensure_connected().await {
                Ok(()) => {
                    let guard = self.client.lock().await;
                    if let Some(client) = guard.as_ref() {
                        match client.send_action(action).await {
                            Ok(()) => return Ok(()),
                            Err(e) => {
                                warn!(
                                    attempt,
                                    action = %action.name(),
                                    error = %e,
                                    "send failed, connection marked down"
                                );
                                last_error = e;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt, action = %action.name(), error = %e, "no connection for send");
                    last_error = e;
                }
            }
            if attempt < SEND_MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_error)
    }

    /// Probe an idle connection. A failed probe marks the connection
    /// down; the next send re-establishes it.
    pub async fn heartbeat(&self) {
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else { return };
        if client.is_connected() && client.idle_secs() > KEEPALIVE_IDLE_SECS {
            debug!(connection_id = %client.connection_id(), "sending keep-alive probe");
            if let Err(e) = client.send_action(&AmiAction::ping()).await {
                warn!(connection_id = %client.connection_id(), error = %e, "keep-alive probe failed");
            }
        }
    }

    /// Disconnect and drop the current connection, if any.
    pub async fn shutdown(&self) {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            client.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::proto::AmiEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct CountingHandler {
        seen: Arc<AtomicUsize>,
    }

    impl AmiEventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn on_event(&self, _event: &AmiEvent) -> Result<(), super::super::HandlerError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Minimal fake PBX endpoint: greets, accepts any login, then sends
    /// the given event blocks and closes.
    async fn fake_pbx(events: Vec<&'static str>) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                socket
                    .write_all(b"Asterisk Call Manager/5.0.2\r\n")
                    .await
                    .unwrap();
                // Consume the login block.
                let mut buf = vec![0u8; 4096];
                let mut login = String::new();
                while !login.contains("\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    login.push_str(&String::from_utf8_lossy(&buf[..n]));
                }
                socket
                    .write_all(b"Response: Success\r\nMessage: Authentication accepted\r\n\r\n")
                    .await
                    .unwrap();
                for block in &events {
                    socket.write_all(block.as_bytes()).await.unwrap();
                }
                // Linger briefly so the client can read before EOF.
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn connects_dispatches_and_detects_eof() {
        let (addr, server) = fake_pbx(vec![
            "Event: Newstate\r\nChannelStateDesc: Ringing\r\nUniqueid: 9.1\r\n\r\n",
        ])
        .await;

        let supervisor = AmiSupervisor::new(AmiConfig::new(
            addr.ip().to_string(),
            addr.port(),
            "dialer",
            "secret",
        ));
        let seen = Arc::new(AtomicUsize::new(0));
        supervisor.add_handler(Arc::new(CountingHandler { seen: Arc::clone(&seen) }));

        supervisor.ensure_connected().await.unwrap();
        assert!(supervisor.is_connected().await);

        // The event arrives on the listener task.
        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Peer closes; the listener marks the connection down, and a
        // later send transparently reconnects with handlers intact.
        for _ in 0..100 {
            if !supervisor.is_connected().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!supervisor.is_connected().await);

        supervisor.send_action(&AmiAction::ping()).await.unwrap();
        assert!(supervisor.is_connected().await);
        assert_eq!(supervisor.handler_count(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn connect_failure_is_an_error_value() {
        // Nothing listens on this address.
        let supervisor = AmiSupervisor::new(AmiConfig::new("127.0.0.1", 1, "dialer", "secret"));
        let result = supervisor
            .connect(2, Duration::from_millis(10))
            .await;
        assert!(result.is_err());
        assert!(!supervisor.is_connected().await);
    }

    #[tokio::test]
    async fn duplicate_handlers_are_ignored() {
        let supervisor = AmiSupervisor::new(AmiConfig::new("127.0.0.1", 1, "dialer", "secret"));
        let seen = Arc::new(AtomicUsize::new(0));
        supervisor.add_handler(Arc::new(CountingHandler { seen: Arc::clone(&seen) }));
        supervisor.add_handler(Arc::new(CountingHandler { seen }));
        assert_eq!(supervisor.handler_count(), 1);
    }
}
