//! Channel lifecycle tests: connect-before-use, absolute timeout, close.

use lattice_connect::{
    ChannelError, ChannelInfo, ChannelListener, ChannelState, InvocationDispatcher, MgmtChannel,
    MgmtContext,
};
use lattice_mgmt::{BeanRegistry, MgmtConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CountingListener {
    connected: AtomicUsize,
    timed_out: AtomicUsize,
    closed: AtomicUsize,
}

impl ChannelListener for CountingListener {
    fn connected(&self, _info: &ChannelInfo) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }
    fn timed_out(&self, _info: &ChannelInfo) {
        self.timed_out.fetch_add(1, Ordering::SeqCst);
    }
    fn closed(&self, _info: &ChannelInfo) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_invocation_before_connect_is_explicit() {
    // Never connected: every dispatcher call reports NotConnected instead
    // of panicking or pretending the result is absent.
    let info = ChannelInfo::remote("lattice", "127.0.0.1", 1);
    let channel = MgmtChannel::remote(info, MgmtConfig::default());
    let dispatcher = InvocationDispatcher::new(channel, Arc::new(MgmtContext::new()));

    let got = dispatcher
        .get_attribute("lattice:type=node,name=admin", "status")
        .await;
    assert!(matches!(got, Err(ChannelError::NotConnected)));

    let set = dispatcher
        .set_attribute(
            "lattice:type=node,name=admin",
            "threshold",
            serde_json::json!(5),
        )
        .await;
    assert!(matches!(set, Err(ChannelError::NotConnected)));

    let invoked = dispatcher
        .invoke(
            "lattice:type=node,name=admin",
            "restart",
            Vec::new(),
            Vec::new(),
        )
        .await;
    assert!(matches!(invoked, Err(ChannelError::NotConnected)));
}

#[tokio::test]
async fn test_absolute_timeout_fires_once_and_closes() {
    // Port 1 refuses immediately, so the attempt loop cycles through
    // failures until the absolute timeout trips.
    let info = ChannelInfo::remote("lattice", "127.0.0.1", 1);
    let config = MgmtConfig {
        connect_timeout_ms: 300,
        attempt_backoff_ms: 50,
        ..MgmtConfig::default()
    };
    let channel = MgmtChannel::remote(info, config);
    let listener = Arc::new(CountingListener::default());
    channel.add_listener(listener.clone());

    let connected = channel.connect_and_wait(Duration::from_secs(3)).await;
    assert!(!connected);

    // Give the loop a moment to finish its teardown.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(listener.timed_out.load(Ordering::SeqCst), 1);
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(listener.connected.load(Ordering::SeqCst), 0);

    // A later connect changes nothing: the channel is terminal.
    channel.connect().await;
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(listener.timed_out.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_before_connect() {
    let info = ChannelInfo::remote("lattice", "127.0.0.1", 1);
    let channel = MgmtChannel::remote(info, MgmtConfig::default());
    let listener = Arc::new(CountingListener::default());
    channel.add_listener(listener.clone());

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(listener.closed.load(Ordering::SeqCst), 1);

    channel.connect().await;
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(listener.connected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dispatcher_works_after_local_reconnect() {
    // reset() on a local channel with reconnect enabled rebinds at once,
    // so dispatch keeps working across the reset.
    let registry = Arc::new(BeanRegistry::new());
    let channel = MgmtChannel::local(registry, MgmtConfig::default());
    channel.connect().await;

    let dispatcher = InvocationDispatcher::new(channel.clone(), Arc::new(MgmtContext::new()));

    channel.reset().await;
    assert!(channel.is_connected());

    // The bean is unknown, but the channel itself answers.
    let got = dispatcher
        .get_attribute("lattice:type=node,name=admin", "status")
        .await;
    assert!(matches!(
        got,
        Err(ChannelError::Bean(lattice_mgmt::BeanError::NotRegistered(_)))
    ));
}
