//! Persistent event listener
//!
//! [`AmiListener::run`] drives connect → authenticate → read loop forever,
//! backing off for a fixed delay and reconnecting after any failure, until
//! its [`StopHandle`] is triggered. Events are dispatched to the
//! [`HandlerRegistry`] in wire order on the same task that reads them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, trace, warn};

use crate::{
    action::Action,
    connection::{AmiClient, ConnectOptions},
    constants::{
        DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS,
        DEFAULT_RECONNECT_DELAY_MS,
    },
    dispatch::HandlerRegistry,
    error::{AmiError, AmiResult},
    packet::Packet,
    protocol::Frame,
};

/// Listener lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ListenerState {
    /// Created, `run()` not called yet.
    Idle,
    /// Opening TCP and waiting for the greeting.
    Connecting,
    /// Login sent, waiting for the verdict.
    Authenticating,
    /// Reading and dispatching events.
    Listening,
    /// Waiting out the reconnect delay.
    Backoff,
    /// `run()` has returned or is about to.
    Stopped,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ListenerState::Idle => "idle",
            ListenerState::Connecting => "connecting",
            ListenerState::Authenticating => "authenticating",
            ListenerState::Listening => "listening",
            ListenerState::Backoff => "backoff",
            ListenerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct StopInner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cooperative stop request shared between the listener and its owner.
///
/// The listener checks it at the top of each loop and wakes on it while
/// reading or backing off. A stop during a read abandons the read and sends
/// a best-effort `Logoff`, whose wait is bounded by the read timeout, so stop
/// latency while listening is at most one read timeout.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.inner
            .requested
            .store(true, Ordering::SeqCst);
        self.inner
            .notify
            .notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner
            .requested
            .load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self
                .inner
                .notify
                .notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Everything the listener needs to reach and log in to Asterisk.
#[derive(Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub connect_timeout: Duration,
    /// Bounds each read and the `Logoff` wait on stop.
    pub read_timeout: Duration,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Sent as an `Events` action after login when set.
    pub event_mask: Option<String>,
}

impl std::fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("event_mask", &self.event_mask)
            .finish()
    }
}

impl ListenerConfig {
    /// Config with default port and timeouts.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_AMI_PORT,
            username: username.into(),
            secret: secret.into(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            event_mask: None,
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            ..ConnectOptions::default()
        }
    }
}

/// Counters accumulated over the listener's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Times the listener entered Connecting.
    pub connect_attempts: u64,
    /// Sessions that reached Listening.
    pub sessions: u64,
    /// Events handed to the registry.
    pub events_dispatched: u64,
    /// Handler invocations that failed.
    pub handler_failures: u64,
}

/// Self-healing AMI event listener.
///
/// ```rust,no_run
/// use asterisk_ami_tokio::{AmiListener, HandlerRegistry, ListenerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let mut registry = HandlerRegistry::new();
///     registry.register("Hangup", |event| async move {
///         println!("hangup on {:?}", event.channel());
///         Ok(())
///     });
///
///     let config = ListenerConfig::new("127.0.0.1", "crm", "s3cret");
///     let listener = AmiListener::new(config, registry);
///     let stop = listener.stop_handle();
///     tokio::spawn(async move {
///         let _ = tokio::signal::ctrl_c().await;
///         stop.stop();
///     });
///     listener.run().await;
/// }
/// ```
pub struct AmiListener {
    config: ListenerConfig,
    registry: HandlerRegistry,
    stop: StopHandle,
    state_tx: watch::Sender<ListenerState>,
}

impl std::fmt::Debug for AmiListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiListener")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

impl AmiListener {
    /// Create a listener owning a fully populated registry.
    pub fn new(config: ListenerConfig, registry: HandlerRegistry) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Idle);
        Self {
            config,
            registry,
            stop: StopHandle::new(),
            state_tx,
        }
    }

    /// Use an externally created stop handle (e.g. one shared with a signal task).
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that stops this listener.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop
            .clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state_tx
            .subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ListenerState {
        *self
            .state_tx
            .borrow()
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    fn set_state(&self, state: ListenerState) {
        let previous = self
            .state_tx
            .send_replace(state);
        if previous != state {
            trace!("[LISTEN] {} -> {}", previous, state);
        }
    }

    /// Run until stopped.
    ///
    /// Never returns an error: connection, authentication and read failures
    /// are logged and followed by a reconnect after the configured delay.
    pub async fn run(self) -> ListenerStats {
        let mut stats = ListenerStats::default();
        info!(
            "[LISTEN] Starting AMI listener for {}:{}",
            self.config.host, self.config.port
        );

        loop {
            if self
                .stop
                .is_stopped()
            {
                break;
            }

            self.set_state(ListenerState::Connecting);
            stats.connect_attempts += 1;

            match self
                .session(&mut stats)
                .await
            {
                Ok(()) => break,
                Err(e) => warn!(
                    "[LISTEN] Session failed: {}; reconnecting in {}ms",
                    e,
                    self.config
                        .reconnect_delay
                        .as_millis()
                ),
            }

            if self
                .stop
                .is_stopped()
            {
                break;
            }

            self.set_state(ListenerState::Backoff);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.stop.stopped() => {
                    debug!("[LISTEN] Stop requested during backoff");
                    break;
                }
            }
        }

        self.set_state(ListenerState::Stopped);
        info!(
            "[LISTEN] Stopped after {} connection attempts, {} events",
            stats.connect_attempts, stats.events_dispatched
        );
        stats
    }

    /// One connection's lifetime. `Ok` means a stop was observed.
    async fn session(&self, stats: &mut ListenerStats) -> AmiResult<()> {
        let mut client = AmiClient::connect_with_options(
            &self.config.host,
            self.config.port,
            self.config
                .connect_options(),
        )
        .await?;

        self.set_state(ListenerState::Authenticating);
        match self
            .listen(&mut client, stats)
            .await
        {
            Ok(()) => {
                client
                    .disconnect()
                    .await;
                Ok(())
            }
            Err(e) => {
                client.close();
                Err(e)
            }
        }
    }

    async fn deliver(&self, event: &Packet, stats: &mut ListenerStats) {
        stats.events_dispatched += 1;
        let report = self
            .registry
            .dispatch(event)
            .await;
        stats.handler_failures += report.failed as u64;
    }

    async fn listen(&self, client: &mut AmiClient, stats: &mut ListenerStats) -> AmiResult<()> {
        client
            .authenticate(&self.config.username, &self.config.secret)
            .await?;

        if let Some(mask) = &self.config.event_mask {
            let (response, early) = client
                .send_action_with_events(Action::events(mask)?)
                .await?;
            for event in &early {
                self.deliver(event, stats)
                    .await;
            }
            if !response.is_success() {
                return Err(AmiError::auth_failed(format!(
                    "event mask {:?} rejected: {}",
                    mask,
                    response
                        .message()
                        .unwrap_or("no message")
                )));
            }
        }

        self.set_state(ListenerState::Listening);
        stats.sessions += 1;
        info!("[LISTEN] Listening for events on {}", client.address());

        loop {
            if self
                .stop
                .is_stopped()
            {
                debug!("[LISTEN] Stop requested, leaving read loop");
                return Ok(());
            }

            let frame = tokio::select! {
                frame = client.read_frame() => frame?,
                _ = self.stop.stopped() => {
                    debug!("[LISTEN] Stop requested during read");
                    return Ok(());
                }
            };

            match frame {
                Frame::Packet(packet) if packet.is_event() => {
                    self.deliver(&packet, stats)
                        .await;
                }
                Frame::Packet(packet) => {
                    trace!(
                        "[LISTEN] Discarding non-event packet: {:?}",
                        packet.response()
                    );
                }
                Frame::NoData => {}
                Frame::Closed => return Err(AmiError::ConnectionClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_handle_wakes_waiters() {
        let stop = StopHandle::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        tokio::task::yield_now().await;
        assert!(!stop.is_stopped());
        stop.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_returns_immediately_when_already_stopped() {
        let stop = StopHandle::new();
        stop.stop();
        stop.stop();
        tokio::time::timeout(Duration::from_millis(100), stop.stopped())
            .await
            .expect("already stopped");
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let config = ListenerConfig::new("pbx", "crm", "hunter2");
        let dbg = format!("{:?}", config);
        assert!(!dbg.contains("hunter2"));
        assert_eq!(config.port, 5038);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_before_run_never_connects() {
        let listener = AmiListener::new(
            ListenerConfig::new("127.0.0.1", "crm", "x"),
            HandlerRegistry::new(),
        );
        assert_eq!(listener.state(), ListenerState::Idle);
        listener
            .stop_handle()
            .stop();
        let states = listener.subscribe_state();
        let stats = listener
            .run()
            .await;
        assert_eq!(stats.connect_attempts, 0);
        assert_eq!(*states.borrow(), ListenerState::Stopped);
    }
}
