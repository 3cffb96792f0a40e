//! Connection management for AMI
//!
//! [`AmiClient`] owns one TCP connection and issues one action at a time,
//! awaiting the matching response before the next action can be sent.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::{
    action::{Action, ActionIdGenerator, Originate},
    constants::{
        DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS, GREETING_PREFIX, SOCKET_BUF_SIZE,
    },
    error::{AmiError, AmiResult},
    headers::Field,
    packet::Packet,
    protocol::{read_frame, read_line, AmiParser, Frame},
};

/// Connection state of an [`AmiClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Socket open and greeting consumed.
    Connected,
    /// Login accepted.
    Authenticated,
}

/// Options fixed at connection time.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound on TCP connect. Default: 2s.
    pub connect_timeout: Duration,
    /// Bound on each socket read. Default: 5s.
    pub read_timeout: Duration,
    /// Bound on waiting for an action's response. Default: the read timeout.
    pub action_timeout: Option<Duration>,
    /// Match responses to actions by `ActionID`, skipping unrelated packets.
    ///
    /// When `false` the first packet read after sending is taken as the
    /// response, which is only correct on a connection that never carries
    /// unsolicited events. Default: `true`.
    pub correlate_responses: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            action_timeout: None,
            correlate_responses: true,
        }
    }
}

impl ConnectOptions {
    fn effective_action_timeout(&self) -> Duration {
        self.action_timeout
            .unwrap_or(self.read_timeout)
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> AmiResult<TcpStream> {
    let address = format!("{}:{}", host, port);
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect to {} failed: {}", address, e);
            Err(AmiError::connection_failed(address, e.to_string()))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect to {} timed out after {}ms",
                address,
                connect_timeout.as_millis()
            );
            Err(AmiError::connection_failed(
                address,
                format!("timed out after {}ms", connect_timeout.as_millis()),
            ))
        }
    }
}

/// One-shot AMI client.
///
/// ```rust,no_run
/// use asterisk_ami_tokio::{AmiClient, AmiError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), AmiError> {
///     let mut client = AmiClient::connect("127.0.0.1", 5038).await?;
///     if client.login("crm", "s3cret").await? {
///         let reply = client.hangup("SIP/8001-00000001", None).await?;
///         println!("{:?}", reply.response());
///     }
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct AmiClient {
    stream: Option<TcpStream>,
    parser: AmiParser,
    read_buffer: Box<[u8]>,
    ids: ActionIdGenerator,
    state: ConnectionState,
    greeting: Option<String>,
    address: String,
    options: ConnectOptions,
}

impl std::fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiClient")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

impl AmiClient {
    /// Connect with default options and consume the greeting.
    pub async fn connect(host: &str, port: u16) -> AmiResult<Self> {
        Self::connect_with_options(host, port, ConnectOptions::default()).await
    }

    /// Connect with custom options and consume the greeting.
    ///
    /// Any failure to open the socket or to receive the greeting line within
    /// the read timeout is reported as [`AmiError::Connection`].
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        options: ConnectOptions,
    ) -> AmiResult<Self> {
        info!("Connecting to Asterisk at {}:{}", host, port);

        let mut stream = tcp_connect_with_timeout(host, port, options.connect_timeout).await?;
        let mut parser = AmiParser::new();
        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE].into_boxed_slice();
        let address = format!("{}:{}", host, port);

        let greeting = read_line(
            &mut stream,
            &mut parser,
            &mut read_buffer,
            options.read_timeout,
        )
        .await
        .map_err(|e| AmiError::connection_failed(address.clone(), format!("no greeting: {}", e)))?;

        if greeting.starts_with(GREETING_PREFIX) {
            debug!("[CONNECT] Greeting: {}", greeting);
        } else {
            warn!("[CONNECT] Unexpected greeting: {:?}", greeting);
        }

        Ok(Self {
            stream: Some(stream),
            parser,
            read_buffer,
            ids: ActionIdGenerator::new(),
            state: ConnectionState::Connected,
            greeting: Some(greeting),
            address,
            options,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a socket is open.
    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Banner line received on connect (e.g. `Asterisk Call Manager/5.0.0`).
    pub fn greeting(&self) -> Option<&str> {
        self.greeting
            .as_deref()
    }

    /// `host:port` this client connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Options the connection was opened with.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Number of actions sent on this connection.
    pub fn actions_sent(&self) -> u64 {
        self.ids
            .issued()
    }

    /// Read the next frame from the connection.
    ///
    /// Used by the listener's read loop; one-shot callers normally go through
    /// [`send_action`](Self::send_action).
    pub async fn read_frame(&mut self) -> AmiResult<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(AmiError::NotConnected)?;
        let result = read_frame(
            stream,
            &mut self.parser,
            &mut self.read_buffer,
            self.options.read_timeout,
        )
        .await;
        match result {
            Ok(Frame::Closed) => {
                self.teardown();
                Ok(Frame::Closed)
            }
            Err(e) => Err(self.fail(e)),
            other => other,
        }
    }

    /// Send an action and wait for its response.
    ///
    /// An `ActionID` is assigned automatically. With response correlation on
    /// (the default), packets that are not the response to this action are
    /// skipped; otherwise the first packet read is returned.
    pub async fn send_action(&mut self, action: Action) -> AmiResult<Packet> {
        self.send_action_inner(action, None)
            .await
    }

    /// Like [`send_action`](Self::send_action), but events that arrive
    /// before the response are returned in wire order instead of dropped.
    ///
    /// The listener uses this for actions sent on a connection that is
    /// already receiving events.
    pub async fn send_action_with_events(
        &mut self,
        action: Action,
    ) -> AmiResult<(Packet, Vec<Packet>)> {
        let mut events = Vec::new();
        let response = self
            .send_action_inner(action, Some(&mut events))
            .await?;
        Ok((response, events))
    }

    async fn send_action_inner(
        &mut self,
        action: Action,
        interleaved: Option<&mut Vec<Packet>>,
    ) -> AmiResult<Packet> {
        if self
            .stream
            .is_none()
        {
            return Err(AmiError::NotConnected);
        }

        let action_id = self
            .ids
            .next_id();
        let wire = action.to_wire_format(&action_id)?;
        if action
            .get(Field::Secret)
            .is_some()
        {
            debug!("Sending action: {} {} [REDACTED]", action.name(), action_id);
        } else {
            debug!("Sending action: {:?}", action);
        }

        if let Err(e) = self
            .write_all(wire.as_bytes())
            .await
        {
            return Err(self.fail(e));
        }

        match self
            .await_response(&action_id, interleaved)
            .await
        {
            Ok(packet) => {
                debug!(
                    "Received response to {}: {:?}",
                    action_id,
                    packet.response()
                );
                Ok(packet)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> AmiResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(AmiError::NotConnected)?;
        stream
            .write_all(bytes)
            .await?;
        stream
            .flush()
            .await?;
        Ok(())
    }

    async fn await_response(
        &mut self,
        action_id: &str,
        mut interleaved: Option<&mut Vec<Packet>>,
    ) -> AmiResult<Packet> {
        let action_timeout = self
            .options
            .effective_action_timeout();
        let deadline = Instant::now() + action_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AmiError::Timeout {
                    timeout_ms: action_timeout.as_millis() as u64,
                });
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or(AmiError::NotConnected)?;
            let frame = read_frame(
                stream,
                &mut self.parser,
                &mut self.read_buffer,
                remaining.min(self.options.read_timeout),
            )
            .await?;

            match frame {
                Frame::Packet(packet) => {
                    if !self
                        .options
                        .correlate_responses
                    {
                        return Ok(packet);
                    }
                    let matches = packet.is_response()
                        && packet
                            .action_id()
                            .map_or(true, |id| id == action_id);
                    if matches {
                        return Ok(packet);
                    }
                    match interleaved.as_mut() {
                        Some(events) if packet.is_event() => {
                            trace!(
                                "[RECV] Holding event {:?} received while awaiting {}",
                                packet.event(),
                                action_id
                            );
                            events.push(packet);
                        }
                        _ => debug!(
                            "Skipping packet while awaiting {}: event={:?} action_id={:?}",
                            action_id,
                            packet.event(),
                            packet.action_id()
                        ),
                    }
                }
                Frame::NoData => trace!("[RECV] No data yet for {}", action_id),
                Frame::Closed => return Err(AmiError::ConnectionClosed),
            }
        }
    }

    /// Send an action whose results arrive as an event list and collect it.
    ///
    /// Reads events carrying the action's `ActionID` until one marks the end
    /// of the list (`EventList: Complete` or an event name ending in
    /// `Complete`). The initial response must be a success.
    pub async fn collect_events(&mut self, action: Action) -> AmiResult<Vec<Packet>> {
        let response = self
            .send_action(action)
            .await?;
        if !response.is_success() {
            return Err(AmiError::protocol_error(format!(
                "list action rejected: {}",
                response
                    .message()
                    .unwrap_or("no message")
            )));
        }
        let action_id = response
            .action_id()
            .map(str::to_string);

        let action_timeout = self
            .options
            .effective_action_timeout();
        let mut deadline = Instant::now() + action_timeout;
        let mut events = Vec::new();
        loop {
            if Instant::now() >= deadline {
                return Err(AmiError::Timeout {
                    timeout_ms: action_timeout.as_millis() as u64,
                });
            }
            match self
                .read_frame()
                .await?
            {
                Frame::Packet(packet) if packet.is_event() => {
                    if action_id.is_some() && packet.action_id() != action_id.as_deref() {
                        debug!("Skipping unrelated event {:?}", packet.event());
                        continue;
                    }
                    deadline = Instant::now() + action_timeout;
                    let complete = packet
                        .get("EventList")
                        .is_some_and(|v| v.eq_ignore_ascii_case("complete"))
                        || packet
                            .event()
                            .is_some_and(|e| e.ends_with("Complete"));
                    if complete {
                        return Ok(events);
                    }
                    events.push(packet);
                }
                Frame::Packet(_) | Frame::NoData => {}
                Frame::Closed => return Err(AmiError::ConnectionClosed),
            }
        }
    }

    /// Send `Login` and report whether it was accepted.
    ///
    /// `true` iff the response's `Response` field equals `Success` ignoring
    /// case. Transport failures are returned as errors.
    pub async fn login(&mut self, username: &str, secret: &str) -> AmiResult<bool> {
        debug!("[AUTH] Logging in as {}", username);
        let response = self
            .send_action(Action::login(username, secret)?)
            .await?;

        if response.is_success() {
            self.state = ConnectionState::Authenticated;
            debug!("Authentication successful");
            Ok(true)
        } else {
            info!(
                "[AUTH] Login rejected: {}",
                response
                    .message()
                    .unwrap_or("no message")
            );
            Ok(false)
        }
    }

    /// Like [`login`](Self::login) but a rejection is an
    /// [`AmiError::AuthenticationFailed`].
    pub async fn authenticate(&mut self, username: &str, secret: &str) -> AmiResult<()> {
        if self
            .login(username, secret)
            .await?
        {
            Ok(())
        } else {
            Err(AmiError::auth_failed(format!(
                "login rejected for user {}",
                username
            )))
        }
    }

    /// Log off and close the socket.
    ///
    /// `Logoff` is best effort: any failure sending it is ignored. The socket
    /// is closed regardless. Calling this on a closed client does nothing.
    pub async fn disconnect(&mut self) {
        if self
            .stream
            .is_none()
        {
            trace!("disconnect() on closed client");
            return;
        }

        info!("Disconnecting from {}", self.address);
        if let Err(e) = self
            .send_action(Action::logoff())
            .await
        {
            debug!("Logoff failed, closing anyway: {}", e);
        }

        if let Some(mut stream) = self
            .stream
            .take()
        {
            let _ = stream
                .shutdown()
                .await;
        }
        self.teardown();
    }

    /// Drop the socket without sending anything.
    pub fn close(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.stream = None;
        self.parser = AmiParser::new();
        self.state = ConnectionState::Disconnected;
    }

    /// Tear the connection down if `error` means it is no longer usable.
    fn fail(&mut self, error: AmiError) -> AmiError {
        if matches!(
            error,
            AmiError::Io(_) | AmiError::ConnectionClosed | AmiError::ProtocolError { .. }
        ) {
            warn!("Connection to {} lost: {}", self.address, error);
            self.teardown();
        }
        error
    }

    /// `Originate` a call.
    pub async fn originate(&mut self, originate: Originate) -> AmiResult<Packet> {
        self.send_action(originate.into_action()?)
            .await
    }

    /// `Hangup` a channel; the cause defaults to 16 (normal clearing).
    pub async fn hangup(&mut self, channel: &str, cause: Option<u16>) -> AmiResult<Packet> {
        self.send_action(Action::hangup(channel, cause)?)
            .await
    }

    /// `Redirect` a channel; context defaults to `default`, priority to 1.
    pub async fn redirect(
        &mut self,
        channel: &str,
        exten: &str,
        context: Option<&str>,
        priority: Option<u32>,
    ) -> AmiResult<Packet> {
        self.send_action(Action::redirect(channel, exten, context, priority)?)
            .await
    }

    /// `Park` a channel; the parking lot defaults to `default`.
    pub async fn park(
        &mut self,
        channel: &str,
        announce_channel: &str,
        parking_lot: Option<&str>,
    ) -> AmiResult<Packet> {
        self.send_action(Action::park(channel, announce_channel, parking_lot)?)
            .await
    }

    /// `Status` for one channel or all; returns the initial response.
    ///
    /// Use [`collect_events`](Self::collect_events) with
    /// [`Action::status`] to gather the per-channel events as well.
    pub async fn channel_status(&mut self, channel: Option<&str>) -> AmiResult<Packet> {
        self.send_action(Action::status(channel)?)
            .await
    }

    /// `CoreShowChannels`; returns the initial response.
    pub async fn list_channels(&mut self) -> AmiResult<Packet> {
        self.send_action(Action::core_show_channels())
            .await
    }

    /// `Ping` keepalive.
    pub async fn ping(&mut self) -> AmiResult<Packet> {
        self.send_action(Action::ping())
            .await
    }

    /// Set the event mask for this session (`on`, `off`, `call,agent`, ...).
    pub async fn events(&mut self, mask: &str) -> AmiResult<Packet> {
        self.send_action(Action::events(mask)?)
            .await
    }

    /// Run an Asterisk CLI command.
    pub async fn command(&mut self, command: &str) -> AmiResult<Packet> {
        self.send_action(Action::command(command)?)
            .await
    }
}
