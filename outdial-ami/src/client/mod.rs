//! The AMI control-channel client.
//!
//! [`AmiClient`] is one live connection: it performs the greeting/login
//! handshake, then runs a background listener task that parses inbound
//! blocks and dispatches events to the registered handlers. A client is
//! never repaired in place — when the socket dies the listener marks the
//! connection down and the [`AmiSupervisor`] builds a replacement.

pub mod supervisor;

pub use supervisor::AmiSupervisor;

use crate::error::AmiError;
use crate::proto::frame::{BLOCK_TERMINATOR, drain_blocks};
use crate::proto::{AmiAction, AmiEvent};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Idle read timeout for the listener loop. Short so that a disconnect
/// request is noticed promptly.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection parameters for the control channel.
#[derive(Debug, Clone)]
pub struct AmiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Socket connect timeout. The login wait itself is unbounded — it
    /// is terminated by the protocol, not by time.
    pub connect_timeout: Duration,
}

impl AmiConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Error returned by an event handler.
///
/// A failing handler is logged and skipped; it never aborts dispatch to
/// the remaining handlers or the listener loop.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// A consumer of the asynchronous event stream.
pub trait AmiEventHandler: Send + Sync {
    /// Stable name, used for de-duplication and logging.
    fn name(&self) -> &'static str;

    fn on_event(&self, event: &AmiEvent) -> Result<(), HandlerError>;
}

/// Shared handler registry. The supervisor owns the canonical list;
/// every client holds the same `Arc`, so handlers registered after a
/// connection was built still receive its events, and a replacement
/// connection starts with the full list re-attached.
pub type HandlerList = Arc<StdMutex<Vec<Arc<dyn AmiEventHandler>>>>;

/// One live control-channel connection.
pub struct AmiClient {
    connection_id: String,
    writer: Mutex<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    last_activity: Arc<AtomicI64>,
    listener: JoinHandle<()>,
}

impl AmiClient {
    /// Open a connection and perform the handshake: greeting banner,
    /// login block, terminated login response. On success the listener
    /// task is started and the client is live.
    pub async fn connect(config: &AmiConfig, handlers: HandlerList) -> Result<Self, AmiError> {
        let connection_id = short_id();
        let addr = format!("{}:{}", config.host, config.port);

        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| AmiError::ConnectTimeout(config.connect_timeout))??;
        let (mut read_half, mut write_half) = stream.into_split();

        // Greeting banner.
        let mut buf = vec![0u8; 1024];
        let n = timeout(config.connect_timeout, read_half.read(&mut buf))
            .await
            .map_err(|_| AmiError::ConnectTimeout(config.connect_timeout))??;
        if n == 0 {
            return Err(AmiError::ClosedDuring("greeting"));
        }
        let greeting = String::from_utf8_lossy(&buf[..n]).into_owned();
        if !greeting.contains("Asterisk Call Manager") {
            return Err(AmiError::UnexpectedGreeting(greeting.trim().to_string()));
        }
        debug!(connection_id = %connection_id, greeting = %greeting.trim(), "greeting accepted");

        // Login. The response wait is unbounded; the block terminator
        // ends it.
        let login = AmiAction::login(&config.username, &config.secret);
        write_half.write_all(login.serialize().as_bytes()).await?;

        let mut response = String::new();
        let mut chunk = vec![0u8; 4096];
        while !response.contains(BLOCK_TERMINATOR) {
            let n = read_half.read(&mut chunk).await?;
            if n == 0 {
                return Err(AmiError::ClosedDuring("login"));
            }
            response.push_str(&String::from_utf8_lossy(&chunk[..n]));
        }

        // Only the first block is the login response; anything after it
        // already belongs to the event stream.
        let split_at = response
            .find(BLOCK_TERMINATOR)
            .map(|pos| pos + BLOCK_TERMINATOR.len())
            .unwrap_or(response.len());
        let leftover = response.split_off(split_at);

        if !(response.contains("Response: Success") && response.contains("Authentication accepted"))
        {
            return Err(AmiError::LoginRejected(response.trim().to_string()));
        }
        info!(connection_id = %connection_id, username = %config.username, "control channel authenticated");

        let connected = Arc::new(AtomicBool::new(true));
        let last_activity = Arc::new(AtomicI64::new(now_ts()));
        let listener = tokio::spawn(listener_loop(
            read_half,
            leftover,
            handlers,
            Arc::clone(&connected),
            Arc::clone(&last_activity),
            connection_id.clone(),
        ));

        Ok(Self {
            connection_id,
            writer: Mutex::new(write_half),
            connected,
            last_activity,
            listener,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Seconds since the last inbound or outbound activity.
    pub fn idle_secs(&self) -> i64 {
        now_ts().saturating_sub(self.last_activity.load(Ordering::SeqCst))
    }

    /// Serialize and write one action block.
    ///
    /// A write failure marks the connection down; re-establishment is
    /// the supervisor's job.
    pub async fn send_action(&self, action: &AmiAction) -> Result<(), AmiError> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected { attempts: 0 });
        }
        let mut writer = self.writer.lock().await;
        match writer.write_all(action.serialize().as_bytes()).await {
            Ok(()) => {
                self.last_activity.store(now_ts(), Ordering::SeqCst);
                trace!(connection_id = %self.connection_id, action = %action.name(), "action sent");
                Ok(())
            }
            Err(e) => {
                warn!(connection_id = %self.connection_id, action = %action.name(), error = %e, "action write failed");
                self.connected.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Mark the connection down, send a best-effort logoff, and stop the
    /// listener.
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer
                .write_all(AmiAction::logoff().serialize().as_bytes())
                .await
            {
                debug!(connection_id = %self.connection_id, error = %e, "logoff write failed");
            }
            let _ = writer.shutdown().await;
        }
        self.listener.abort();
        debug!(connection_id = %self.connection_id, "disconnected");
    }
}

/// Background listener: read with a short timeout, buffer, split blocks,
/// dispatch events to a snapshot of the handler list.
async fn listener_loop(
    mut read_half: OwnedReadHalf,
    mut buffer: String,
    handlers: HandlerList,
    connected: Arc<AtomicBool>,
    last_activity: Arc<AtomicI64>,
    connection_id: String,
) {
    debug!(connection_id = %connection_id, "event listener started");
    // Blocks that arrived piggybacked on the login response.
    dispatch_buffered(&mut buffer, &handlers, &last_activity, &connection_id);

    let mut chunk = vec![0u8; 4096];
    while connected.load(Ordering::SeqCst) {
        match timeout(READ_TIMEOUT, read_half.read(&mut chunk)).await {
            // Idle timeout: loop around and re-check the connected flag.
            Err(_) => continue,
            Ok(Ok(0)) => {
                info!(connection_id = %connection_id, "peer closed the control channel");
                break;
            }
            Ok(Ok(n)) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                dispatch_buffered(&mut buffer, &handlers, &last_activity, &connection_id);
            }
            Ok(Err(e)) => {
                warn!(connection_id = %connection_id, error = %e, "control channel read failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    debug!(connection_id = %connection_id, "event listener terminated");
}

fn dispatch_buffered(
    buffer: &mut String,
    handlers: &HandlerList,
    last_activity: &AtomicI64,
    connection_id: &str,
) {
    for frame in drain_blocks(buffer) {
        let Some(event) = AmiEvent::from_frame(frame) else {
            // Action responses and noise; nothing listens for these.
            continue;
        };
        last_activity.store(now_ts(), Ordering::SeqCst);

        // Snapshot so concurrent (de)registration cannot corrupt an
        // in-flight dispatch.
        let snapshot: Vec<Arc<dyn AmiEventHandler>> = handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        trace!(
            connection_id = %connection_id,
            event = %event.event_type(),
            handlers = snapshot.len(),
            "dispatching event"
        );
        for handler in snapshot {
            if let Err(e) = handler.on_event(&event) {
                warn!(
                    connection_id = %connection_id,
                    handler = handler.name(),
                    event = %event.event_type(),
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }
}

fn now_ts() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
