//! Connection management for the Manager Interface.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    action::ManagerAction,
    constants::{
        DEFAULT_ACTION_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS,
        MAX_SOCKET_READ_TIMEOUT_MS, SOCKET_BUF_SIZE,
    },
    dispatcher::{EventDispatcher, EventListener, Interest, ListenerGuard, ListenerPriority},
    error::{AmiError, AmiResult},
    event::{ManagerEvent, DISCONNECT_EVENT},
    framer::{read_line, LineDelimiter, LineFramer},
    headers::ManagerHeader,
    protocol::{ActionRegistry, EventList, ManagerMessage, ManagerResponse, MessageDecoder, ResponseShape},
    transport::{TimedReader, TimedSocket, TimedWriter},
    version::ProtocolBanner,
};

/// Default capacity of the passive event stream channel.
const DEFAULT_EVENT_QUEUE_SIZE: usize = 1000;

/// ActionID used for the login handshake, before the counter exists.
const LOGIN_ACTION_ID: &str = "login-1";

/// Connection status for the manager client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// Manager session is active.
    Connected,
    /// Manager session ended.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Clean EOF from the peer.
    EndOfStream,
    /// The read budget expired without any inbound traffic.
    ReadTimeout,
    /// TCP I/O error (io::Error is not Clone, so we store the message).
    IoError(String),
    /// Unrecoverable framing or protocol failure.
    ProtocolError(String),
    /// Client called disconnect().
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::EndOfStream => write!(f, "connection closed"),
            DisconnectReason::ReadTimeout => write!(f, "read timeout expired"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Options fixed at connection time.
#[derive(Debug, Clone)]
pub struct ManagerConnectOptions {
    /// TCP connect budget. Default: 10 seconds.
    pub connect_timeout: Duration,
    /// Per-read budget. Default: 70 minutes — held connections idle for a
    /// very long time between events.
    pub read_timeout: Duration,
    /// Per-write budget. Default: 10 seconds.
    pub write_timeout: Duration,
    /// Budget for an action's response. Default: 5 seconds.
    pub action_timeout: Duration,
    /// Capacity of the passive event stream channel. Default: 1000.
    pub event_queue_size: usize,
    /// Response-shape registry consulted by [`ManagerClient::execute`].
    pub registry: ActionRegistry,
}

impl Default for ManagerConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(MAX_SOCKET_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            action_timeout: Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            registry: ActionRegistry::with_defaults(),
        }
    }
}

/// Terminal outcome of a submitted action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// A single response block.
    Response(ManagerResponse),
    /// A response plus its begin/item*/complete event sequence.
    List(EventList),
}

/// Accumulates a list sequence between its start response and completion
/// event.
struct ListBuilder {
    response: ManagerResponse,
    items: Vec<ManagerEvent>,
}

/// One in-flight action awaiting its terminal response.
struct PendingAction {
    name: String,
    shape: ResponseShape,
    tx: oneshot::Sender<AmiResult<ActionOutcome>>,
    list: Option<ListBuilder>,
    /// Flip the framer to gzip when this action succeeds.
    compress_on_success: bool,
}

/// Shared state between the client handles and the reader task.
struct SharedState {
    pending: parking_lot::Mutex<HashMap<String, PendingAction>>,
    dispatcher: Arc<EventDispatcher>,
    registry: ActionRegistry,
    banner: Option<ProtocolBanner>,
    action_timeout_ms: AtomicU64,
    action_seq: AtomicU64,
    id_prefix: String,
}

impl SharedState {
    fn next_action_id(&self) -> String {
        let seq = self.action_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.id_prefix, seq)
    }
}

/// Manager client handle (Clone + Send).
///
/// Actions from any task are serialized through the writer mutex so one
/// action's bytes are never interleaved with another's; responses are
/// correlated back by ActionID, so concurrent actions are fine.
#[derive(Clone)]
pub struct ManagerClient {
    writer: Arc<Mutex<TimedWriter>>,
    shared: Arc<SharedState>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for ManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Passive event stream (!Clone).
///
/// A `Low`-priority wildcard listener feeding an mpsc channel; activities
/// with narrower interests are unaffected by a slow consumer here. When the
/// channel is full events are dropped with a warning.
pub struct ManagerEventStream {
    rx: mpsc::Receiver<ManagerEvent>,
    status_rx: watch::Receiver<ConnectionStatus>,
    _guard: ListenerGuard,
}

impl std::fmt::Debug for ManagerEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerEventStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct StreamListener {
    tx: mpsc::Sender<ManagerEvent>,
}

impl EventListener for StreamListener {
    fn on_event(&self, event: &ManagerEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("event stream full, dropping {}", event.name());
            }
        }
    }
}

/// Authenticate on the not-yet-split socket.
async fn login(
    socket: &mut TimedSocket,
    framer: &mut LineFramer,
    decoder: &mut MessageDecoder,
    read_buffer: &mut [u8],
    username: &str,
    secret: &str,
) -> AmiResult<()> {
    let mut action = ManagerAction::login(username, secret);
    action.set_param(ManagerHeader::ActionId, LOGIN_ACTION_ID);
    debug!("Sending action: Login [REDACTED]");
    socket.write_all(action.to_wire()?.as_bytes()).await?;

    loop {
        let line = read_line(socket, framer, read_buffer)
            .await?
            .ok_or(AmiError::ConnectionClosed)?;
        match decoder.feed_line(&line) {
            Ok(Some(ManagerMessage::Response(response))) => {
                // An unsolicited response here can only be ours; tolerate a
                // server that drops the ActionID from the login reply.
                if matches!(response.action_id(), Some(LOGIN_ACTION_ID) | None) {
                    if response.is_success() {
                        debug!("Authentication successful");
                        return Ok(());
                    }
                    return Err(AmiError::auth_failed(
                        response.message().unwrap_or("Authentication failed"),
                    ));
                }
                warn!("unexpected response during login: {:?}", response.action_id());
            }
            Ok(Some(ManagerMessage::Event(event))) => {
                trace!("event during login: {}", event.name());
            }
            Ok(None) => {}
            Err(e) => warn!("discarding malformed block during login: {}", e),
        }
    }
}

fn disconnect_reason(error: &AmiError) -> DisconnectReason {
    match error {
        AmiError::ReadTimeout { .. } => DisconnectReason::ReadTimeout,
        AmiError::OversizedLine { .. }
        | AmiError::Decompress(_)
        | AmiError::AlreadyCompressed => DisconnectReason::ProtocolError(error.to_string()),
        _ => DisconnectReason::IoError(error.to_string()),
    }
}

/// Tear the connection down: fail every pending action, flip the status and
/// dispatch the synthetic `Disconnect` event so every waiting activity
/// observes the death. No further events can ever arrive.
fn finish(shared: &SharedState, status_tx: &watch::Sender<ConnectionStatus>, reason: DisconnectReason) {
    let drained: Vec<PendingAction> = {
        let mut pending = shared.pending.lock();
        pending.drain().map(|(_, entry)| entry).collect()
    };
    for entry in drained {
        debug!("failing pending action {} on disconnect", entry.name);
        let _ = entry.tx.send(Err(AmiError::ConnectionClosed));
    }
    let _ = status_tx.send(ConnectionStatus::Disconnected(reason));
    shared.dispatcher.dispatch(&ManagerEvent::new(DISCONNECT_EVENT));
    // Registrations are now dead weight; dropping them also closes the
    // passive event stream once its queue drains.
    shared.dispatcher.clear();
}

/// Background reader loop.
async fn reader_loop(
    reader: TimedReader,
    framer: LineFramer,
    decoder: MessageDecoder,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let inner = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        framer,
        decoder,
        Arc::clone(&shared),
        status_tx.clone(),
    ));
    if futures_util::FutureExt::catch_unwind(inner).await.is_err() {
        tracing::error!("reader task panicked");
        finish(
            &shared,
            &status_tx,
            DisconnectReason::IoError("reader task panicked".to_string()),
        );
    }
}

async fn reader_loop_inner(
    mut reader: TimedReader,
    mut framer: LineFramer,
    mut decoder: MessageDecoder,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

    loop {
        let line = match read_line(&mut reader, &mut framer, &mut read_buffer).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Connection closed (EOF)");
                finish(&shared, &status_tx, DisconnectReason::EndOfStream);
                return;
            }
            // One unreadable line must not take down an otherwise-healthy
            // session; the framer already advanced past it.
            Err(AmiError::MalformedMessage { message }) => {
                warn!("skipping unreadable line: {}", message);
                continue;
            }
            Err(e) => {
                warn!("Read error: {}", e);
                finish(&shared, &status_tx, disconnect_reason(&e));
                return;
            }
        };

        let message = match decoder.feed_line(&line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!("discarding malformed message block: {}", e);
                continue;
            }
        };

        match message {
            ManagerMessage::Response(response) => {
                if let Err(reason) = route_response(&shared, &mut framer, response) {
                    finish(&shared, &status_tx, reason);
                    return;
                }
            }
            ManagerMessage::Event(event) => {
                route_event(&shared, &event);
                shared.dispatcher.dispatch(&event);
            }
        }
    }
}

/// Route a response to its pending action. Returns a fatal disconnect
/// reason only when the post-response compression switch fails.
fn route_response(
    shared: &SharedState,
    framer: &mut LineFramer,
    response: ManagerResponse,
) -> Result<(), DisconnectReason> {
    let Some(id) = response.action_id().map(str::to_string) else {
        warn!("response without ActionID: {:?}", response.message());
        return Ok(());
    };

    enum Routed {
        ListStarted,
        Completed(PendingAction),
        Unknown,
    }

    let opens_list = response.is_success() && response.is_list_start();
    let routed = {
        let mut pending = shared.pending.lock();
        let wants_list = pending
            .get(&id)
            .map(|entry| entry.shape == ResponseShape::List)
            .unwrap_or(false);
        if wants_list && opens_list {
            if let Some(entry) = pending.get_mut(&id) {
                entry.list = Some(ListBuilder {
                    response: response.clone(),
                    items: Vec::new(),
                });
            }
            Routed::ListStarted
        } else if let Some(entry) = pending.remove(&id) {
            Routed::Completed(entry)
        } else {
            Routed::Unknown
        }
    };

    match routed {
        Routed::ListStarted => {
            trace!("[RECV] list sequence opened for {}", id);
        }
        Routed::Completed(entry) => {
            let switch = entry.compress_on_success && response.is_success();
            trace!("[RECV] response for {} ({})", id, entry.name);
            let _ = entry.tx.send(Ok(ActionOutcome::Response(response)));
            if switch {
                // Between messages, in the only context touching framer
                // state: buffered bytes are the head of the gzip stream.
                match framer.switch_to_compressed() {
                    Ok(()) => info!("gzip compression activated"),
                    Err(e) => {
                        warn!("compression switch failed: {}", e);
                        return Err(DisconnectReason::ProtocolError(e.to_string()));
                    }
                }
            }
        }
        Routed::Unknown => {
            warn!("response for unknown ActionID {}", id);
        }
    }
    Ok(())
}

/// Fold a response event into its pending list, completing the action when
/// the `EventList: Complete` marker arrives.
fn route_event(shared: &SharedState, event: &ManagerEvent) {
    let Some(id) = event.action_id().map(str::to_string) else {
        return;
    };

    let finished = {
        let mut pending = shared.pending.lock();
        let accumulating = pending
            .get(&id)
            .map(|entry| entry.list.is_some())
            .unwrap_or(false);
        if !accumulating {
            None
        } else if event.is_list_complete() {
            pending.remove(&id).map(|entry| (entry, event.declared_list_items()))
        } else {
            if let Some(list) = pending.get_mut(&id).and_then(|entry| entry.list.as_mut()) {
                list.items.push(event.clone());
            }
            None
        }
    };

    if let Some((entry, declared)) = finished {
        if let Some(builder) = entry.list {
            let list = EventList {
                response: builder.response,
                items: builder.items,
                declared,
            };
            if let Some(mismatch) = list.count_mismatch() {
                // Recoverable: report, but still deliver the items.
                warn!("{} for {}", mismatch, entry.name);
            }
            let _ = entry.tx.send(Ok(ActionOutcome::List(list)));
        }
    }
}

impl ManagerClient {
    /// Connect and authenticate with default options.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
    ) -> AmiResult<(Self, ManagerEventStream)> {
        Self::connect_with_options(host, port, username, secret, ManagerConnectOptions::default())
            .await
    }

    /// Connect and authenticate with custom options.
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
        options: ManagerConnectOptions,
    ) -> AmiResult<(Self, ManagerEventStream)> {
        info!("Connecting to manager at {}:{}", host, port);

        let mut socket = TimedSocket::connect(
            host,
            port,
            options.connect_timeout,
            options.read_timeout,
            options.write_timeout,
        )
        .await?;
        let mut framer = LineFramer::new(LineDelimiter::CrLf);
        let mut decoder = MessageDecoder::new();
        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

        // First line from the peer identifies product and version.
        let banner_line = read_line(&mut socket, &mut framer, &mut read_buffer)
            .await?
            .ok_or(AmiError::ConnectionClosed)?;
        let banner = ProtocolBanner::parse(&banner_line);
        match &banner {
            Some(banner) => debug!("greeted by {}", banner),
            None => warn!("unrecognized greeting banner: {:?}", banner_line),
        }

        login(
            &mut socket,
            &mut framer,
            &mut decoder,
            &mut read_buffer,
            username,
            secret,
        )
        .await?;

        info!("Successfully connected and authenticated");
        Self::split_and_spawn(socket, framer, decoder, banner, options)
    }

    fn split_and_spawn(
        socket: TimedSocket,
        framer: LineFramer,
        decoder: MessageDecoder,
        banner: Option<ProtocolBanner>,
        options: ManagerConnectOptions,
    ) -> AmiResult<(Self, ManagerEventStream)> {
        let (read_half, write_half) = socket.into_split()?;

        let dispatcher = Arc::new(EventDispatcher::new());
        let shared = Arc::new(SharedState {
            pending: parking_lot::Mutex::new(HashMap::new()),
            dispatcher: Arc::clone(&dispatcher),
            registry: options.registry,
            banner,
            action_timeout_ms: AtomicU64::new(options.action_timeout.as_millis() as u64),
            action_seq: AtomicU64::new(1),
            id_prefix: format!("{:x}", std::process::id()),
        });

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let status_rx2 = status_tx.subscribe();
        let (event_tx, event_rx) = mpsc::channel(options.event_queue_size.max(1));

        let stream_handle = dispatcher.register(
            Arc::new(StreamListener { tx: event_tx }),
            ListenerPriority::Low,
            Interest::All,
        );
        let stream_guard = ListenerGuard::new(Arc::clone(&dispatcher), stream_handle);

        tokio::spawn(reader_loop(
            read_half,
            framer,
            decoder,
            Arc::clone(&shared),
            status_tx,
        ));

        let client = ManagerClient {
            writer: Arc::new(Mutex::new(write_half)),
            shared,
            status_rx,
        };
        let stream = ManagerEventStream {
            rx: event_rx,
            status_rx: status_rx2,
            _guard: stream_guard,
        };

        Ok((client, stream))
    }

    /// Send an action and wait for its terminal outcome, with the shape
    /// taken from the connection's action registry.
    pub async fn execute(&self, action: ManagerAction) -> AmiResult<ActionOutcome> {
        let shape = self.shared.registry.shape_for(action.name());
        self.submit(action, shape, false).await
    }

    /// Send an action expecting a single response block.
    pub async fn send_action(&self, action: ManagerAction) -> AmiResult<ManagerResponse> {
        match self.submit(action, ResponseShape::Single, false).await? {
            ActionOutcome::Response(response) => Ok(response),
            ActionOutcome::List(list) => Ok(list.response),
        }
    }

    /// Send a list-style action and collect its begin/item*/complete
    /// sequence. A declared-count mismatch is reported on the returned
    /// [`EventList`], not raised — the accumulated items are still
    /// delivered.
    pub async fn send_list_action(&self, action: ManagerAction) -> AmiResult<EventList> {
        match self.submit(action, ResponseShape::List, false).await? {
            ActionOutcome::List(list) => Ok(list),
            // The server answered with a plain response: an error, or a
            // degenerate empty list.
            ActionOutcome::Response(response) => {
                let response = response.into_result()?;
                Ok(EventList {
                    response,
                    items: Vec::new(),
                    declared: None,
                })
            }
        }
    }

    async fn submit(
        &self,
        mut action: ManagerAction,
        shape: ResponseShape,
        compress_on_success: bool,
    ) -> AmiResult<ActionOutcome> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }

        let name = action.name().to_string();
        let id = match action.action_id() {
            Some(id) => id.to_string(),
            None => {
                let id = self.shared.next_action_id();
                action.set_param(ManagerHeader::ActionId, id.clone());
                id
            }
        };
        let wire = action.to_wire()?;

        if name.eq_ignore_ascii_case("Login") {
            debug!("Sending action: Login [REDACTED]");
        } else {
            debug!("Sending action: {} ({})", name, id);
        }

        // Register the pending entry before writing so a fast response
        // cannot race past us.
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(
            id.clone(),
            PendingAction {
                name: name.clone(),
                shape,
                tx,
                list: None,
                compress_on_success,
            },
        );

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(wire.as_bytes()).await {
                self.shared.pending.lock().remove(&id);
                return Err(e);
            }
        }

        let timeout_ms = self.shared.action_timeout_ms.load(Ordering::Relaxed);
        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AmiError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(AmiError::ActionTimeout {
                    action: name,
                    timeout_ms,
                })
            }
        }
    }

    /// `Ping` keepalive. Requires a successful `Pong`.
    pub async fn ping(&self) -> AmiResult<()> {
        self.send_action(ManagerAction::ping())
            .await?
            .into_result()
            .map(|_| ())
    }

    /// `Logoff` gracefully. The server answers `Goodbye` and closes the
    /// connection.
    pub async fn logoff(&self) -> AmiResult<ManagerResponse> {
        self.send_action(ManagerAction::logoff()).await
    }

    /// Run a CLI command and return its raw output lines.
    pub async fn command(&self, command_text: &str) -> AmiResult<Vec<String>> {
        let response = self
            .send_action(ManagerAction::command(command_text))
            .await?
            .into_result()?;
        Ok(response.output().to_vec())
    }

    /// Hang up a channel, optionally with a cause code.
    pub async fn hangup(&self, channel: &str, cause: Option<u8>) -> AmiResult<()> {
        self.send_action(ManagerAction::hangup(channel, cause))
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Set the server-side event mask (`on`, `off`, or a comma list).
    pub async fn set_event_mask(&self, mask: &str) -> AmiResult<()> {
        self.send_action(ManagerAction::events(mask))
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Ask the peer to gzip all subsequent traffic and flip local
    /// decompression in lockstep.
    ///
    /// The reader task performs the switch between messages, so bytes
    /// already buffered behind the response are decompressed without loss.
    pub async fn activate_compression(&self) -> AmiResult<()> {
        let action = ManagerAction::proxy_compression("gzip");
        match self.submit(action, ResponseShape::Single, true).await? {
            ActionOutcome::Response(response) => {
                response.into_result()?;
                Ok(())
            }
            ActionOutcome::List(_) => {
                Err(AmiError::malformed("unexpected list reply to ProxyCompression"))
            }
        }
    }

    /// Register an event listener. The returned guard unregisters on drop.
    pub fn register_listener(
        &self,
        listener: Arc<dyn EventListener>,
        priority: ListenerPriority,
        interest: Interest,
    ) -> ListenerGuard {
        let handle = self.shared.dispatcher.register(listener, priority, interest);
        ListenerGuard::new(Arc::clone(&self.shared.dispatcher), handle)
    }

    /// The connection's event dispatcher.
    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.shared.dispatcher)
    }

    /// The greeting banner received on connect, when recognized.
    pub fn banner(&self) -> Option<&ProtocolBanner> {
        self.shared.banner.as_ref()
    }

    /// Set the action response timeout (default: 5 seconds).
    pub fn set_action_timeout(&self, duration: Duration) {
        self.shared
            .action_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Allocate a fresh correlation token.
    pub(crate) fn next_action_id(&self) -> String {
        self.shared.next_action_id()
    }

    /// Whether the connection is alive (not yet disconnected).
    pub fn is_connected(&self) -> bool {
        matches!(*self.status_rx.borrow(), ConnectionStatus::Connected)
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Disconnect by shutting down the write half. The reader observes EOF
    /// and tears the session down.
    pub async fn disconnect(&self) -> AmiResult<()> {
        info!("Client requested disconnect");
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

impl ManagerEventStream {
    /// Receive the next event, or `None` when the connection is gone and
    /// the queue is drained. The synthetic [`DISCONNECT_EVENT`] is the last
    /// event delivered.
    pub async fn recv(&mut self) -> Option<ManagerEvent> {
        self.rx.recv().await
    }

    /// Whether the connection is alive (not yet disconnected).
    pub fn is_connected(&self) -> bool {
        matches!(*self.status_rx.borrow(), ConnectionStatus::Connected)
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }
}

impl futures_util::Stream for ManagerEventStream {
    type Item = ManagerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
