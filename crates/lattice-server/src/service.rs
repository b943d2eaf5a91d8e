//! The management gRPC service over a bean registry.

use crate::forward::RequestForwarder;
use lattice_core_fleet::{EndpointKind, Selector};
use lattice_mgmt::{BeanError, BeanName, BeanRegistry, JsonCodec, ValueCodec};
use lattice_proto::management_service_server::ManagementService;
use lattice_proto::{
    ForwardRequest, ForwardResponse, GetAttributeRequest, HandshakeRequest, HandshakeResponse,
    InvokeRequest, NotificationMessage, SetAttributeRequest, SetAttributeResponse,
    SubscribeRequest, ValueResponse, SESSION_METADATA_KEY,
};
use serde_json::Value;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffered notifications per subscriber before backpressure kicks in.
const SUBSCRIBE_BUFFER: usize = 64;

/// Implementation of the management service.
///
/// Every call except `Handshake` must carry a session id issued by a prior
/// handshake in its request metadata. Attribute and parameter values cross
/// the wire through the value codec negotiated at handshake time.
pub struct MgmtServiceImpl {
    registry: Arc<BeanRegistry>,
    codec: Arc<dyn ValueCodec>,
    protocol: String,
    auth_token: Option<String>,
    server_uuid: String,
    kind: EndpointKind,
    sessions: RwLock<HashSet<String>>,
    forwarder: RwLock<Option<Arc<dyn RequestForwarder>>>,
}

impl MgmtServiceImpl {
    pub fn new(
        registry: Arc<BeanRegistry>,
        protocol: impl Into<String>,
        auth_token: Option<String>,
        kind: EndpointKind,
    ) -> Self {
        Self {
            registry,
            codec: Arc::new(JsonCodec),
            protocol: protocol.into(),
            auth_token,
            server_uuid: Uuid::new_v4().to_string(),
            kind,
            sessions: RwLock::new(HashSet::new()),
            forwarder: RwLock::new(None),
        }
    }

    /// Stable identity reported to every handshaking client.
    pub fn server_uuid(&self) -> &str {
        &self.server_uuid
    }

    pub async fn install_forwarder(&self, forwarder: Arc<dyn RequestForwarder>) {
        *self.forwarder.write().await = Some(forwarder);
    }

    pub async fn clear_forwarder(&self) {
        *self.forwarder.write().await = None;
    }

    async fn validate_session<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let value = request
            .metadata()
            .get(SESSION_METADATA_KEY)
            .ok_or_else(|| Status::unauthenticated("missing session, call Handshake first"))?;
        let session = value
            .to_str()
            .map_err(|_| Status::invalid_argument("malformed session id"))?;
        if self.sessions.read().await.contains(session) {
            Ok(())
        } else {
            Err(Status::unauthenticated("unknown session id"))
        }
    }

    fn parse_name(&self, bean: &str) -> Result<BeanName, Status> {
        bean.parse()
            .map_err(|e: BeanError| Status::invalid_argument(e.to_string()))
    }

    fn encode_value(&self, value: Option<Value>) -> Result<ValueResponse, Status> {
        match value {
            Some(value) => {
                let encoded = self.codec.encode(&value).map_err(bean_status)?;
                Ok(ValueResponse {
                    present: true,
                    value: encoded,
                })
            }
            None => Ok(ValueResponse {
                present: false,
                value: Vec::new(),
            }),
        }
    }

    fn rejected(&self, reason: impl Into<String>) -> HandshakeResponse {
        HandshakeResponse {
            accepted: false,
            session_id: String::new(),
            server_uuid: self.server_uuid.clone(),
            endpoint_kind: self.kind.to_string(),
            reason: reason.into(),
        }
    }
}

fn bean_status(err: BeanError) -> Status {
    match err {
        BeanError::NotRegistered(_)
        | BeanError::AttributeNotFound { .. }
        | BeanError::OperationNotFound { .. } => Status::not_found(err.to_string()),
        BeanError::AttributeReadOnly { .. } => Status::permission_denied(err.to_string()),
        BeanError::InvalidName { .. } | BeanError::InvalidArgument { .. } => {
            Status::invalid_argument(err.to_string())
        }
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl ManagementService for MgmtServiceImpl {
    async fn handshake(
        &self,
        request: Request<HandshakeRequest>,
    ) -> Result<Response<HandshakeResponse>, Status> {
        let req = request.into_inner();
        debug!(
            protocol = %req.protocol,
            version = %req.version,
            codec = %req.codec,
            "handshake request"
        );

        if req.protocol != self.protocol {
            warn!(protocol = %req.protocol, "handshake rejected: protocol mismatch");
            return Ok(Response::new(
                self.rejected(format!("unsupported protocol '{}'", req.protocol)),
            ));
        }
        if req.codec != self.codec.id() {
            warn!(codec = %req.codec, "handshake rejected: codec mismatch");
            return Ok(Response::new(
                self.rejected(format!("unsupported codec '{}'", req.codec)),
            ));
        }
        if let Some(expected) = &self.auth_token {
            if req.token != *expected {
                warn!("handshake rejected: invalid token");
                return Ok(Response::new(self.rejected("invalid token")));
            }
        }

        let session_id = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(session_id.clone());
        info!(session = %session_id, "session established");

        Ok(Response::new(HandshakeResponse {
            accepted: true,
            session_id,
            server_uuid: self.server_uuid.clone(),
            endpoint_kind: self.kind.to_string(),
            reason: String::new(),
        }))
    }

    async fn get_attribute(
        &self,
        request: Request<GetAttributeRequest>,
    ) -> Result<Response<ValueResponse>, Status> {
        self.validate_session(&request).await?;
        let req = request.into_inner();
        let name = self.parse_name(&req.bean)?;
        let bean = self.registry.require(&name).map_err(bean_status)?;
        let value = bean
            .get_attribute(&req.attribute)
            .await
            .map_err(bean_status)?;
        Ok(Response::new(self.encode_value(value)?))
    }

    async fn set_attribute(
        &self,
        request: Request<SetAttributeRequest>,
    ) -> Result<Response<SetAttributeResponse>, Status> {
        self.validate_session(&request).await?;
        let req = request.into_inner();
        let name = self.parse_name(&req.bean)?;
        let bean = self.registry.require(&name).map_err(bean_status)?;
        let value = self.codec.decode(&req.value).map_err(bean_status)?;
        bean.set_attribute(&req.attribute, value)
            .await
            .map_err(bean_status)?;
        Ok(Response::new(SetAttributeResponse {}))
    }

    async fn invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<ValueResponse>, Status> {
        self.validate_session(&request).await?;
        let req = request.into_inner();
        let name = self.parse_name(&req.bean)?;
        let bean = self.registry.require(&name).map_err(bean_status)?;

        let mut params = Vec::with_capacity(req.params.len());
        for encoded in &req.params {
            params.push(self.codec.decode(encoded).map_err(bean_status)?);
        }

        let value = bean
            .invoke(&req.operation, params)
            .await
            .map_err(bean_status)?;
        Ok(Response::new(self.encode_value(value)?))
    }

    type SubscribeStream =
        Pin<Box<dyn Stream<Item = Result<NotificationMessage, Status>> + Send>>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        self.validate_session(&request).await?;
        let req = request.into_inner();

        // Canonicalize the filter so property order never matters.
        let filter = if req.bean.is_empty() {
            None
        } else {
            Some(self.parse_name(&req.bean)?)
        };

        let mut rx = self.registry.subscribe();
        let codec = Arc::clone(&self.codec);
        let (tx, out) = mpsc::channel(SUBSCRIBE_BUFFER);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        if let Some(filter) = &filter {
                            if notification.source != *filter {
                                continue;
                            }
                        }
                        let payload = match codec.encode(&notification.payload) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(error = %e, "dropping unencodable notification");
                                continue;
                            }
                        };
                        let message = NotificationMessage {
                            source: notification.source.to_string(),
                            kind: notification.kind,
                            message: notification.message,
                            payload,
                            sequence: notification.sequence,
                            timestamp_ms: notification.timestamp_ms,
                        };
                        if tx.send(Ok(message)).await.is_err() {
                            debug!("subscriber went away");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged behind the notification bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let stream = ReceiverStream::new(out);
        Ok(Response::new(Box::pin(stream) as Self::SubscribeStream))
    }

    async fn forward(
        &self,
        request: Request<ForwardRequest>,
    ) -> Result<Response<ForwardResponse>, Status> {
        self.validate_session(&request).await?;

        let forwarder = self.forwarder.read().await.clone();
        let Some(forwarder) = forwarder else {
            return Err(Status::unimplemented(
                "forwarding is not enabled on this endpoint",
            ));
        };

        let req = request.into_inner();
        let selector: Selector = serde_json::from_slice(&req.selector)
            .map_err(|e| Status::invalid_argument(format!("malformed selector: {e}")))?;
        let invoke = req
            .invoke
            .ok_or_else(|| Status::invalid_argument("missing invocation"))?;

        let outcomes = forwarder.forward(selector, invoke).await?;
        Ok(Response::new(ForwardResponse { outcomes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattice_mgmt::{BeanDescriptor, ManagedBean};
    use serde_json::json;

    struct EchoBean;

    #[async_trait]
    impl ManagedBean for EchoBean {
        async fn get_attribute(&self, name: &str) -> Result<Option<Value>, BeanError> {
            match name {
                "status" => Ok(Some(json!("running"))),
                "nothing" => Ok(None),
                other => Err(BeanError::AttributeNotFound {
                    bean: "echo".to_string(),
                    attribute: other.to_string(),
                }),
            }
        }

        async fn set_attribute(&self, _name: &str, _value: Value) -> Result<(), BeanError> {
            Ok(())
        }

        async fn invoke(
            &self,
            operation: &str,
            params: Vec<Value>,
        ) -> Result<Option<Value>, BeanError> {
            match operation {
                "echo" => Ok(Some(json!(params))),
                other => Err(BeanError::OperationNotFound {
                    bean: "echo".to_string(),
                    operation: other.to_string(),
                }),
            }
        }

        fn descriptor(&self) -> BeanDescriptor {
            BeanDescriptor::default()
                .attribute("status", false)
                .operation("echo", &["json"], true)
        }
    }

    fn service(token: Option<&str>) -> MgmtServiceImpl {
        let registry = Arc::new(BeanRegistry::new());
        registry
            .register("lattice:type=test,name=echo".parse().unwrap(), Arc::new(EchoBean))
            .unwrap();
        MgmtServiceImpl::new(
            registry,
            "lattice",
            token.map(str::to_string),
            EndpointKind::Node,
        )
    }

    async fn open_session(service: &MgmtServiceImpl) -> String {
        let response = service
            .handshake(Request::new(HandshakeRequest {
                protocol: "lattice".to_string(),
                version: "test".to_string(),
                token: String::new(),
                codec: "json".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.accepted);
        response.session_id
    }

    fn with_session<T>(session: &str, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.metadata_mut().insert(
            SESSION_METADATA_KEY,
            session.parse().expect("session id is ascii"),
        );
        request
    }

    #[tokio::test]
    async fn test_handshake_rejects_protocol_and_token() {
        let service = service(Some("secret"));

        let response = service
            .handshake(Request::new(HandshakeRequest {
                protocol: "other".to_string(),
                version: "test".to_string(),
                token: "secret".to_string(),
                codec: "json".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.accepted);
        assert!(response.reason.contains("protocol"));

        let response = service
            .handshake(Request::new(HandshakeRequest {
                protocol: "lattice".to_string(),
                version: "test".to_string(),
                token: "wrong".to_string(),
                codec: "json".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.accepted);
        assert_eq!(response.reason, "invalid token");
    }

    #[tokio::test]
    async fn test_calls_without_session_are_unauthenticated() {
        let service = service(None);
        let err = service
            .get_attribute(Request::new(GetAttributeRequest {
                bean: "lattice:type=test,name=echo".to_string(),
                attribute: "status".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_attribute_round_trip_preserves_absence() {
        let service = service(None);
        let session = open_session(&service).await;

        let response = service
            .get_attribute(with_session(
                &session,
                GetAttributeRequest {
                    bean: "lattice:type=test,name=echo".to_string(),
                    attribute: "status".to_string(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(response.present);
        assert_eq!(
            serde_json::from_slice::<Value>(&response.value).unwrap(),
            json!("running")
        );

        let response = service
            .get_attribute(with_session(
                &session,
                GetAttributeRequest {
                    bean: "lattice:type=test,name=echo".to_string(),
                    attribute: "nothing".to_string(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.present);
        assert!(response.value.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_bean_maps_to_not_found() {
        let service = service(None);
        let session = open_session(&service).await;

        let err = service
            .invoke(with_session(
                &session,
                InvokeRequest {
                    bean: "lattice:type=test,name=ghost".to_string(),
                    operation: "echo".to_string(),
                    params: Vec::new(),
                    signature: Vec::new(),
                },
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_forward_without_forwarder_is_unimplemented() {
        let service = service(None);
        let session = open_session(&service).await;

        let err = service
            .forward(with_session(
                &session,
                ForwardRequest {
                    selector: serde_json::to_vec(&Selector::All).unwrap(),
                    invoke: Some(InvokeRequest {
                        bean: "lattice:type=node,name=admin".to_string(),
                        operation: "restart".to_string(),
                        params: Vec::new(),
                        signature: Vec::new(),
                    }),
                },
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }
}
