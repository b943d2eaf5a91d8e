//! MgmtChannel: a lazily connecting management channel with a background
//! attempt loop.
//!
//! Channels are cheaply cloneable (state lives behind an `Arc`), so one
//! channel can be shared between the dispatcher, the topology and the
//! background tasks. `connect()` never blocks: remote channels start one
//! background task that retries the handshake until it succeeds, the
//! absolute timeout elapses or the channel is closed. Local channels skip
//! the network entirely and bind to an in-process registry.

use crate::error::ChannelError;
use crate::info::ChannelInfo;
use lattice_mgmt::{BeanName, BeanRegistry, JsonCodec, MgmtConfig, Notification, ValueCodec};
use lattice_proto::management_service_client::ManagementServiceClient;
use lattice_proto::{HandshakeRequest, NotificationMessage, SubscribeRequest};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tonic::transport::{Channel as TonicChannel, Endpoint};
use tracing::{debug, info, warn};

pub use lattice_proto::SESSION_METADATA_KEY;

/// Interval at which `connect_and_wait` polls for connectivity.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No handle installed, no attempt in flight.
    Disconnected,
    /// Background attempt loop is trying to establish a session.
    Connecting,
    /// Handle installed, invocations flow.
    Connected,
    /// Terminal. A closed channel never transitions again.
    Closed,
}

/// State of the background attempt loop, driven over a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    /// Parked, waiting for a state change.
    Suspended,
    /// Actively attempting handshakes.
    Connecting,
    /// Loop must exit.
    Stopped,
}

/// Observer of channel lifecycle events.
pub trait ChannelListener: Send + Sync {
    fn connected(&self, _info: &ChannelInfo) {}
    fn timed_out(&self, _info: &ChannelInfo) {}
    fn closed(&self, _info: &ChannelInfo) {}
}

/// Receives bean notifications dispatched through a channel.
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, notification: &Notification, handback: Option<&Value>);
}

/// Narrows which notifications reach a listener.
pub trait NotificationFilter: Send + Sync {
    fn accepts(&self, notification: &Notification) -> bool;
}

/// One notification registration.
///
/// Registrations compare structurally: listener and filter by pointer
/// identity, handback by value. This makes add and remove idempotent for
/// the same triple.
struct NotificationRegistration {
    bean: BeanName,
    listener: Arc<dyn NotificationListener>,
    filter: Option<Arc<dyn NotificationFilter>>,
    handback: Option<Value>,
}

impl NotificationRegistration {
    fn matches(
        &self,
        bean: &BeanName,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: &Option<Value>,
    ) -> bool {
        if self.bean != *bean || !Arc::ptr_eq(&self.listener, listener) {
            return false;
        }
        let same_filter = match (&self.filter, filter) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_filter && self.handback == *handback
    }
}

/// Live endpoint handle behind a connected channel.
#[derive(Clone)]
pub(crate) enum ChannelHandle {
    /// Direct binding to an in-process registry.
    Local(Arc<BeanRegistry>),
    /// Established gRPC session.
    Remote(RemoteHandle),
}

#[derive(Clone)]
pub(crate) struct RemoteHandle {
    pub client: ManagementServiceClient<TonicChannel>,
    pub session: String,
    #[allow(dead_code)]
    pub server_uuid: String,
}

impl RemoteHandle {
    /// Attach the session id to a request's metadata.
    pub fn with_session<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        match self.session.parse() {
            Ok(value) => {
                request.metadata_mut().insert(SESSION_METADATA_KEY, value);
            }
            Err(e) => {
                warn!("session id not usable as metadata: {e}");
            }
        }
        request
    }
}

struct ChannelInner {
    info: RwLock<ChannelInfo>,
    config: MgmtConfig,
    codec: Arc<dyn ValueCodec>,
    token: Option<String>,
    local_registry: Option<Arc<BeanRegistry>>,

    state: RwLock<ChannelState>,
    handle: tokio::sync::RwLock<Option<ChannelHandle>>,

    attempt_tx: watch::Sender<AttemptState>,
    attempt_task: Mutex<Option<JoinHandle<()>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
    deadline: Mutex<Option<Instant>>,

    closed: AtomicBool,
    timed_out: AtomicBool,

    listeners: Mutex<Vec<Arc<dyn ChannelListener>>>,
    registrations: Mutex<Vec<NotificationRegistration>>,
}

/// A management channel to one endpoint.
///
/// # Example
/// ```
/// use lattice_connect::{ChannelState, MgmtChannel};
/// use lattice_mgmt::{BeanRegistry, MgmtConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let registry = Arc::new(BeanRegistry::new());
/// let channel = MgmtChannel::local(registry, MgmtConfig::default());
///
/// channel.connect().await;
/// assert!(channel.connect_and_wait(Duration::from_millis(100)).await);
/// assert_eq!(channel.state(), ChannelState::Connected);
/// # }
/// ```
#[derive(Clone)]
pub struct MgmtChannel {
    inner: Arc<ChannelInner>,
}

impl MgmtChannel {
    /// Channel to a remote endpoint. Nothing is dialed until `connect()`.
    pub fn remote(info: ChannelInfo, config: MgmtConfig) -> Self {
        Self::build(info, config, None, None)
    }

    /// Remote channel presenting an auth token during the handshake.
    pub fn remote_with_token(
        info: ChannelInfo,
        config: MgmtConfig,
        token: impl Into<String>,
    ) -> Self {
        Self::build(info, config, Some(token.into()), None)
    }

    /// In-process channel bound to a local registry. `connect()` installs
    /// the binding synchronously.
    pub fn local(registry: Arc<BeanRegistry>, config: MgmtConfig) -> Self {
        let info = ChannelInfo::local(config.protocol.clone());
        Self::build(info, config, None, Some(registry))
    }

    fn build(
        info: ChannelInfo,
        config: MgmtConfig,
        token: Option<String>,
        local_registry: Option<Arc<BeanRegistry>>,
    ) -> Self {
        let (attempt_tx, _) = watch::channel(AttemptState::Suspended);
        Self {
            inner: Arc::new(ChannelInner {
                info: RwLock::new(info),
                config,
                codec: Arc::new(JsonCodec),
                token,
                local_registry,
                state: RwLock::new(ChannelState::Disconnected),
                handle: tokio::sync::RwLock::new(None),
                attempt_tx,
                attempt_task: Mutex::new(None),
                pump_task: Mutex::new(None),
                deadline: Mutex::new(None),
                closed: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                registrations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *rlock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Snapshot of the channel identity, including any refined address.
    pub fn info(&self) -> ChannelInfo {
        rlock(&self.inner.info).clone()
    }

    pub fn config(&self) -> &MgmtConfig {
        &self.inner.config
    }

    pub(crate) fn codec(&self) -> Arc<dyn ValueCodec> {
        Arc::clone(&self.inner.codec)
    }

    pub(crate) async fn handle(&self) -> Option<ChannelHandle> {
        self.inner.handle.read().await.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        lock(&self.inner.listeners).push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
        lock(&self.inner.listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Start connecting. Never blocks on the network.
    ///
    /// Connected, connecting and closed channels are left untouched. Local
    /// channels bind synchronously and fire the connected event before
    /// returning. Remote channels start (at most) one background attempt
    /// task and return immediately.
    pub async fn connect(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = wlock(&self.inner.state);
            match *state {
                ChannelState::Disconnected => *state = ChannelState::Connecting,
                _ => return,
            }
        }

        if let Some(registry) = &self.inner.local_registry {
            debug!(channel = %self.info(), "binding local channel");
            self.install_handle(ChannelHandle::Local(Arc::clone(registry)))
                .await;
            return;
        }

        // Arm the absolute deadline on the first connect only.
        {
            let mut deadline = lock(&self.inner.deadline);
            if deadline.is_none() {
                if let Some(timeout) = self.inner.config.connect_timeout() {
                    *deadline = Some(Instant::now() + timeout);
                }
            }
        }

        {
            let mut slot = lock(&self.inner.attempt_task);
            if slot.is_none() {
                let channel = self.clone();
                let rx = self.inner.attempt_tx.subscribe();
                *slot = Some(tokio::spawn(async move {
                    channel.attempt_loop(rx).await;
                }));
            }
        }
        let _ = self.inner.attempt_tx.send(AttemptState::Connecting);
    }

    /// Connect and poll for the outcome.
    ///
    /// Polls `is_connected()` at most every 10 ms for up to `timeout`
    /// (zero means unbounded) and returns the final connectivity.
    pub async fn connect_and_wait(&self, timeout: Duration) -> bool {
        self.connect().await;
        let started = Instant::now();
        loop {
            if self.is_connected() {
                return true;
            }
            if self.state() == ChannelState::Closed {
                return false;
            }
            if !timeout.is_zero() && started.elapsed() >= timeout {
                return self.is_connected();
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Drop the current handle and, when `reconnect_on_error` is set,
    /// schedule a fresh connection attempt.
    ///
    /// The broken handle is fully released before any new attempt starts.
    pub async fn reset(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        debug!(channel = %self.info(), "resetting channel");

        if let Some(pump) = lock(&self.inner.pump_task).take() {
            pump.abort();
        }
        {
            let mut handle = self.inner.handle.write().await;
            *handle = None;
        }
        {
            let mut state = wlock(&self.inner.state);
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Disconnected;
        }
        let _ = self.inner.attempt_tx.send(AttemptState::Suspended);

        if self.inner.config.reconnect_on_error {
            self.connect().await;
        }
    }

    /// Close the channel. Idempotent: the teardown body runs exactly once
    /// no matter how many callers race here.
    pub async fn close(&self) {
        self.shutdown(true).await;
    }

    async fn shutdown(&self, notify_closed: bool) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(channel = %self.info(), "closing channel");

        let _ = self.inner.attempt_tx.send(AttemptState::Stopped);
        {
            let mut state = wlock(&self.inner.state);
            *state = ChannelState::Closed;
        }
        lock(&self.inner.registrations).clear();
        if notify_closed {
            self.fire(|listener, info| listener.closed(info));
        }
        lock(&self.inner.listeners).clear();

        // Offload connector teardown so the caller never blocks on it.
        let channel = self.clone();
        tokio::spawn(async move {
            if let Some(pump) = lock(&channel.inner.pump_task).take() {
                pump.abort();
            }
            let mut handle = channel.inner.handle.write().await;
            *handle = None;
        });
    }

    /// Register a notification listener for one bean. Adding the same
    /// (listener, filter, handback) triple twice is a no-op.
    pub fn add_notification_listener(
        &self,
        bean: BeanName,
        listener: Arc<dyn NotificationListener>,
        filter: Option<Arc<dyn NotificationFilter>>,
        handback: Option<Value>,
    ) {
        let mut registrations = lock(&self.inner.registrations);
        if registrations
            .iter()
            .any(|r| r.matches(&bean, &listener, filter.as_ref(), &handback))
        {
            return;
        }
        registrations.push(NotificationRegistration {
            bean,
            listener,
            filter,
            handback,
        });
    }

    /// Remove a notification registration. Returns whether one was removed.
    pub fn remove_notification_listener(
        &self,
        bean: &BeanName,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: &Option<Value>,
    ) -> bool {
        let mut registrations = lock(&self.inner.registrations);
        let before = registrations.len();
        registrations.retain(|r| !r.matches(bean, listener, filter, handback));
        registrations.len() < before
    }

    #[cfg(test)]
    fn registration_count(&self) -> usize {
        lock(&self.inner.registrations).len()
    }

    async fn install_handle(&self, handle: ChannelHandle) {
        {
            let mut slot = self.inner.handle.write().await;
            *slot = Some(handle.clone());
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            let mut slot = self.inner.handle.write().await;
            *slot = None;
            return;
        }
        {
            let mut state = wlock(&self.inner.state);
            *state = ChannelState::Connected;
        }
        self.start_pump(handle);
        // The handle is installed before anyone hears about it.
        self.fire(|listener, info| listener.connected(info));
    }

    async fn attempt_loop(self, mut rx: watch::Receiver<AttemptState>) {
        loop {
            let state = *rx.borrow_and_update();
            match state {
                AttemptState::Stopped => break,
                AttemptState::Suspended => {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                AttemptState::Connecting => {
                    if self.deadline_expired() {
                        self.expire().await;
                        break;
                    }
                    let limit = self
                        .remaining_deadline()
                        .map(|r| r.min(self.inner.config.request_timeout()))
                        .unwrap_or_else(|| self.inner.config.request_timeout());
                    match tokio::time::timeout(limit, self.try_handshake()).await {
                        Ok(Ok(handle)) => {
                            self.install_handle(handle).await;
                            let _ = self.inner.attempt_tx.send(AttemptState::Suspended);
                        }
                        Ok(Err(e)) => {
                            debug!(channel = %self.info(), error = %e, "handshake attempt failed");
                            tokio::time::sleep(self.inner.config.attempt_backoff()).await;
                        }
                        Err(_) => {
                            debug!(channel = %self.info(), "handshake attempt timed out");
                        }
                    }
                }
            }
        }
    }

    fn deadline_expired(&self) -> bool {
        matches!(*lock(&self.inner.deadline), Some(d) if Instant::now() >= d)
    }

    fn remaining_deadline(&self) -> Option<Duration> {
        lock(&self.inner.deadline).map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The absolute timeout elapsed: fire the event once, close, stop.
    async fn expire(&self) {
        if self.inner.timed_out.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(channel = %self.info(), "connection timeout elapsed, giving up");
        self.fire(|listener, info| listener.timed_out(info));
        self.shutdown(false).await;
    }

    async fn try_handshake(&self) -> Result<ChannelHandle, ChannelError> {
        let info = self.info();
        let url = info.endpoint_url();
        let endpoint =
            Endpoint::from_shared(url.clone()).map_err(|e| ChannelError::InvalidEndpoint {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
        let transport = endpoint
            .connect()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        self.refine_address(&info).await;

        let mut client = ManagementServiceClient::new(transport);
        let request = HandshakeRequest {
            protocol: info.protocol.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            token: self.inner.token.clone().unwrap_or_default(),
            codec: self.inner.codec.id().to_string(),
        };
        let response = client
            .handshake(tonic::Request::new(request))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?
            .into_inner();

        if !response.accepted {
            let reason = if response.reason.is_empty() {
                "handshake rejected".to_string()
            } else {
                response.reason
            };
            return Err(ChannelError::HandshakeRejected(reason));
        }

        info!(
            channel = %info,
            session = %response.session_id,
            server = %response.server_uuid,
            "management session established"
        );

        Ok(ChannelHandle::Remote(RemoteHandle {
            client,
            session: response.session_id,
            server_uuid: response.server_uuid,
        }))
    }

    /// Best-effort address resolution for display. Failure is logged and
    /// never fails the connection.
    async fn refine_address(&self, info: &ChannelInfo) {
        match tokio::net::lookup_host((info.host.as_str(), info.port)).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    wlock(&self.inner.info).ip_address = Some(addr.ip().to_string());
                }
            }
            Err(e) => {
                debug!(host = %info.host, error = %e, "address resolution failed");
            }
        }
    }

    fn start_pump(&self, handle: ChannelHandle) {
        let channel = self.clone();
        let task = tokio::spawn(async move {
            match handle {
                ChannelHandle::Local(registry) => {
                    let mut rx = registry.subscribe();
                    loop {
                        match rx.recv().await {
                            Ok(notification) => channel.dispatch_notification(&notification),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "notification pump lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                ChannelHandle::Remote(remote) => {
                    let mut client = remote.client.clone();
                    let request = remote.with_session(SubscribeRequest {
                        bean: String::new(),
                    });
                    match client.subscribe(request).await {
                        Ok(response) => {
                            let mut stream = response.into_inner();
                            loop {
                                match stream.message().await {
                                    Ok(Some(message)) => {
                                        if let Some(n) = channel.decode_notification(message) {
                                            channel.dispatch_notification(&n);
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(status) => {
                                        debug!(error = %status, "notification stream ended");
                                        break;
                                    }
                                }
                            }
                        }
                        Err(status) => {
                            debug!(error = %status, "notification subscribe failed");
                        }
                    }
                }
            }
        });
        if let Some(old) = lock(&self.inner.pump_task).replace(task) {
            old.abort();
        }
    }

    fn decode_notification(&self, message: NotificationMessage) -> Option<Notification> {
        let source = match message.source.parse::<BeanName>() {
            Ok(name) => name,
            Err(e) => {
                debug!(error = %e, "dropping notification with malformed source");
                return None;
            }
        };
        let payload = if message.payload.is_empty() {
            Value::Null
        } else {
            match self.inner.codec.decode(&message.payload) {
                Ok(value) => value,
                Err(e) => {
                    debug!(error = %e, "dropping notification with undecodable payload");
                    return None;
                }
            }
        };
        Some(Notification {
            source,
            kind: message.kind,
            message: message.message,
            payload,
            sequence: message.sequence,
            timestamp_ms: message.timestamp_ms,
        })
    }

    fn dispatch_notification(&self, notification: &Notification) {
        let matching: Vec<(Arc<dyn NotificationListener>, Option<Value>)> =
            lock(&self.inner.registrations)
                .iter()
                .filter(|r| r.bean == notification.source)
                .filter(|r| {
                    r.filter
                        .as_ref()
                        .map(|f| f.accepts(notification))
                        .unwrap_or(true)
                })
                .map(|r| (Arc::clone(&r.listener), r.handback.clone()))
                .collect();
        for (listener, handback) in matching {
            listener.on_notification(notification, handback.as_ref());
        }
    }

    fn fire(&self, event: impl Fn(&dyn ChannelListener, &ChannelInfo)) {
        let info = self.info();
        let listeners: Vec<Arc<dyn ChannelListener>> = lock(&self.inner.listeners).clone();
        for listener in listeners {
            event(listener.as_ref(), &info);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn rlock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wlock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
