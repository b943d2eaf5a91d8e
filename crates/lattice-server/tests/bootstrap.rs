//! Bootstrap tests: port-retry semantics and loopback sessions over a real
//! listener.

use async_trait::async_trait;
use lattice_connect::{
    ChannelError, ChannelInfo, ChannelState, InvocationDispatcher, MgmtChannel, MgmtContext,
};
use lattice_core_fleet::{EndpointKind, Selector};
use lattice_mgmt::{BeanDescriptor, BeanError, BeanRegistry, ManagedBean, MgmtConfig};
use lattice_proto::management_service_client::ManagementServiceClient;
use lattice_proto::{
    EndpointOutcome, ForwardRequest, HandshakeRequest, InvokeRequest, SESSION_METADATA_KEY,
};
use lattice_server::{MgmtServer, RequestForwarder, ServerConfig, ServerError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::Status;

fn window(base: u16) -> ServerConfig {
    ServerConfig {
        bind_host: "127.0.0.1".to_string(),
        port: base,
        port_floor: base,
        port_ceiling: base + 10,
        max_bind_attempts: 8,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_bind_conflicts_walk_to_the_next_free_port() {
    let base = 41_710;
    let mut occupied = Vec::new();
    for port in base..base + 3 {
        occupied.push(TcpListener::bind(("127.0.0.1", port)).await.unwrap());
    }

    let server = MgmtServer::new(window(base), EndpointKind::Node);
    let addr = server.start(Arc::new(BeanRegistry::new())).await.unwrap();
    assert_eq!(addr.port(), base + 3);
    assert!(server.is_running().await);
    assert_eq!(server.local_addr().await, Some(addr));

    server.stop().await;
    assert!(!server.is_running().await);

    // Stopping again is a no-op.
    server.stop().await;
    drop(occupied);
}

#[tokio::test]
async fn test_non_bind_failure_aborts_immediately() {
    // 192.0.2.1 is TEST-NET-1; binding it raises AddrNotAvailable, which is
    // not a conflict and must not trigger the port walk.
    let config = ServerConfig {
        bind_host: "192.0.2.1".to_string(),
        ..window(41_730)
    };
    let server = MgmtServer::new(config, EndpointKind::Node);
    let err = server
        .start(Arc::new(BeanRegistry::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Io(_)));
    assert!(!server.is_running().await);
}

#[tokio::test]
async fn test_exhausted_window_reports_every_attempt() {
    let base = 41_750;
    let floor = TcpListener::bind(("127.0.0.1", base)).await.unwrap();
    let ceiling = TcpListener::bind(("127.0.0.1", base + 1)).await.unwrap();

    // A two-port window forces the walk to wrap and revisit the floor.
    let config = ServerConfig {
        port_ceiling: base + 1,
        max_bind_attempts: 5,
        ..window(base)
    };
    let server = MgmtServer::new(config, EndpointKind::Node);
    let err = server
        .start(Arc::new(BeanRegistry::new()))
        .await
        .unwrap_err();
    match err {
        ServerError::PortsExhausted { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected PortsExhausted, got {other}"),
    }
    drop((floor, ceiling));
}

struct StatusBean;

#[async_trait]
impl ManagedBean for StatusBean {
    async fn get_attribute(&self, name: &str) -> Result<Option<Value>, BeanError> {
        match name {
            "status" => Ok(Some(json!("serving"))),
            other => Err(BeanError::AttributeNotFound {
                bean: "status".to_string(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn set_attribute(&self, name: &str, _value: Value) -> Result<(), BeanError> {
        Err(BeanError::AttributeReadOnly {
            bean: "status".to_string(),
            attribute: name.to_string(),
        })
    }

    async fn invoke(&self, operation: &str, _params: Vec<Value>) -> Result<Option<Value>, BeanError> {
        match operation {
            "ping" => Ok(Some(json!("pong"))),
            other => Err(BeanError::OperationNotFound {
                bean: "status".to_string(),
                operation: other.to_string(),
            }),
        }
    }

    fn descriptor(&self) -> BeanDescriptor {
        BeanDescriptor::default()
            .attribute("status", false)
            .operation("ping", &[], true)
    }
}

#[tokio::test]
async fn test_loopback_channel_dispatches_through_the_server() {
    let base = 41_770;
    let registry = Arc::new(BeanRegistry::new());
    registry
        .register(
            "lattice:type=node,name=status".parse().unwrap(),
            Arc::new(StatusBean),
        )
        .unwrap();

    let config = ServerConfig {
        auth_token: Some("secret".to_string()),
        ..window(base)
    };
    let server = MgmtServer::new(config, EndpointKind::Node);
    let addr = server.start(registry).await.unwrap();

    let info = ChannelInfo::remote("lattice", "127.0.0.1", addr.port());
    let channel = MgmtChannel::remote_with_token(info, MgmtConfig::default(), "secret");
    assert!(channel.connect_and_wait(Duration::from_secs(5)).await);

    let dispatcher = InvocationDispatcher::new(channel.clone(), Arc::new(MgmtContext::new()));

    let status = dispatcher
        .get_attribute("lattice:type=node,name=status", "status")
        .await
        .unwrap();
    assert_eq!(status, Some(json!("serving")));

    let pong = dispatcher
        .invoke("lattice:type=node,name=status", "ping", Vec::new(), Vec::new())
        .await
        .unwrap();
    assert_eq!(pong, Some(json!("pong")));

    // An unknown bean surfaces as a remote error, never a transport reset.
    let err = dispatcher
        .get_attribute("lattice:type=node,name=ghost", "status")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Remote(_)));
    assert!(channel.is_connected());

    channel.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_wrong_token_never_connects() {
    let base = 41_790;
    let config = ServerConfig {
        auth_token: Some("secret".to_string()),
        ..window(base)
    };
    let server = MgmtServer::new(config, EndpointKind::Node);
    let addr = server.start(Arc::new(BeanRegistry::new())).await.unwrap();

    let info = ChannelInfo::remote("lattice", "127.0.0.1", addr.port());
    let client_config = MgmtConfig {
        connect_timeout_ms: 500,
        attempt_backoff_ms: 50,
        ..MgmtConfig::default()
    };
    let channel = MgmtChannel::remote_with_token(info, client_config, "wrong");
    assert!(!channel.connect_and_wait(Duration::from_secs(3)).await);
    assert_eq!(channel.state(), ChannelState::Closed);

    server.stop().await;
}

struct StaticForwarder;

#[async_trait]
impl RequestForwarder for StaticForwarder {
    async fn forward(
        &self,
        _selector: Selector,
        invoke: InvokeRequest,
    ) -> Result<Vec<EndpointOutcome>, Status> {
        Ok(vec![
            EndpointOutcome {
                uuid: "a".to_string(),
                ok: true,
                present: true,
                value: serde_json::to_vec(&json!({"operation": invoke.operation})).unwrap(),
                error: String::new(),
            },
            EndpointOutcome {
                uuid: "b".to_string(),
                ok: false,
                present: false,
                value: Vec::new(),
                error: "wedged".to_string(),
            },
        ])
    }
}

async fn open_session(port: u16) -> (ManagementServiceClient<tonic::transport::Channel>, String) {
    let mut client = ManagementServiceClient::connect(format!("http://127.0.0.1:{port}"))
        .await
        .unwrap();
    let response = client
        .handshake(HandshakeRequest {
            protocol: "lattice".to_string(),
            version: "test".to_string(),
            token: String::new(),
            codec: "json".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(response.accepted);
    assert_eq!(response.endpoint_kind, "node");
    (client, response.session_id)
}

fn forward_request(session: &str) -> tonic::Request<ForwardRequest> {
    let mut request = tonic::Request::new(ForwardRequest {
        selector: serde_json::to_vec(&Selector::All).unwrap(),
        invoke: Some(InvokeRequest {
            bean: "lattice:type=node,name=admin".to_string(),
            operation: "restart".to_string(),
            params: Vec::new(),
            signature: Vec::new(),
        }),
    });
    request
        .metadata_mut()
        .insert(SESSION_METADATA_KEY, session.parse().unwrap());
    request
}

#[tokio::test]
async fn test_forward_over_the_wire() {
    // Without a forwarder the call is unimplemented.
    let server = MgmtServer::new(window(41_810), EndpointKind::Node);
    let addr = server.start(Arc::new(BeanRegistry::new())).await.unwrap();
    let (mut client, session) = open_session(addr.port()).await;
    let err = client.forward(forward_request(&session)).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unimplemented);
    server.stop().await;

    // With one installed, per-endpoint outcomes come back verbatim.
    let server = MgmtServer::new(window(41_830), EndpointKind::Node);
    server.set_forwarder(Arc::new(StaticForwarder)).await;
    let addr = server.start(Arc::new(BeanRegistry::new())).await.unwrap();
    let (mut client, session) = open_session(addr.port()).await;
    let response = client
        .forward(forward_request(&session))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.outcomes.len(), 2);
    assert!(response.outcomes[0].ok);
    assert_eq!(response.outcomes[1].error, "wedged");
    server.stop().await;
}
