//! Invocation dispatch: routes attribute reads/writes and operation calls
//! through a channel, with method-shape classification.

use crate::channel::{ChannelHandle, MgmtChannel};
use crate::context::MgmtContext;
use crate::error::ChannelError;
use lattice_proto::{GetAttributeRequest, InvokeRequest, SetAttributeRequest, ValueResponse};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Shape of a method as seen at a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodShape {
    pub name: String,
    pub param_count: usize,
    pub returns_value: bool,
}

impl MethodShape {
    pub fn new(name: impl Into<String>, param_count: usize, returns_value: bool) -> Self {
        Self {
            name: name.into(),
            param_count,
            returns_value,
        }
    }
}

/// Cache key for memoized classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: String,
    pub param_types: Vec<String>,
}

/// What a method shape means on the management surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodKind {
    /// Zero-arg value-returning `getX`/`isX`: attribute read of `x`.
    GetAttribute(String),
    /// One-arg void `setX`: attribute write of `x`.
    SetAttribute(String),
    /// Everything else: plain operation with its parameter signature.
    Operation { signature: Vec<String> },
}

/// Classify a method shape. Pure; memoization lives on `MgmtContext`.
pub(crate) fn classify_shape(shape: &MethodShape, param_types: &[String]) -> MethodKind {
    if shape.returns_value && shape.param_count == 0 {
        if let Some(attribute) = accessor_attribute(&shape.name, "get") {
            return MethodKind::GetAttribute(attribute);
        }
        if let Some(attribute) = accessor_attribute(&shape.name, "is") {
            return MethodKind::GetAttribute(attribute);
        }
    }
    if !shape.returns_value && shape.param_count == 1 {
        if let Some(attribute) = accessor_attribute(&shape.name, "set") {
            return MethodKind::SetAttribute(attribute);
        }
    }
    MethodKind::Operation {
        signature: param_types.to_vec(),
    }
}

/// `getFoo` -> `foo`, but only when the prefix is followed by an uppercase
/// letter, so `getter` stays an operation.
fn accessor_attribute(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let first = rest.chars().next()?;
    if !first.is_uppercase() {
        return None;
    }
    let mut attribute = String::with_capacity(rest.len());
    attribute.extend(first.to_lowercase());
    attribute.push_str(&rest[first.len_utf8()..]);
    Some(attribute)
}

/// Routes management calls through one channel.
///
/// When the channel has no installed handle every call returns
/// `Err(ChannelError::NotConnected)` after a warning, so callers can tell a
/// skipped invocation apart from a legitimately absent result (`Ok(None)`).
///
/// A transport failure triggers `reset()` on the owning channel and then
/// propagates as `Err(ChannelError::Transport)`, on every path alike.
pub struct InvocationDispatcher {
    channel: MgmtChannel,
    context: Arc<MgmtContext>,
}

impl InvocationDispatcher {
    pub fn new(channel: MgmtChannel, context: Arc<MgmtContext>) -> Self {
        Self { channel, context }
    }

    pub fn channel(&self) -> &MgmtChannel {
        &self.channel
    }

    pub fn context(&self) -> &Arc<MgmtContext> {
        &self.context
    }

    /// Read one attribute of a bean.
    pub async fn get_attribute(
        &self,
        bean: &str,
        attribute: &str,
    ) -> Result<Option<Value>, ChannelError> {
        let name = self.context.resolve_name(bean)?;
        match self.handle_or_warn().await? {
            ChannelHandle::Local(registry) => {
                let target = registry.require(&name)?;
                Ok(target.get_attribute(attribute).await?)
            }
            ChannelHandle::Remote(remote) => {
                let mut client = remote.client.clone();
                let request = remote.with_session(GetAttributeRequest {
                    bean: name.to_string(),
                    attribute: attribute.to_string(),
                });
                match client.get_attribute(request).await {
                    Ok(response) => self.decode_value(response.into_inner()),
                    Err(status) => Err(self.fail(status).await),
                }
            }
        }
    }

    /// Write one attribute of a bean.
    pub async fn set_attribute(
        &self,
        bean: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), ChannelError> {
        let name = self.context.resolve_name(bean)?;
        match self.handle_or_warn().await? {
            ChannelHandle::Local(registry) => {
                let target = registry.require(&name)?;
                Ok(target.set_attribute(attribute, value).await?)
            }
            ChannelHandle::Remote(remote) => {
                let encoded = self.channel.codec().encode(&value)?;
                let mut client = remote.client.clone();
                let request = remote.with_session(SetAttributeRequest {
                    bean: name.to_string(),
                    attribute: attribute.to_string(),
                    value: encoded,
                });
                match client.set_attribute(request).await {
                    Ok(_) => Ok(()),
                    Err(status) => Err(self.fail(status).await),
                }
            }
        }
    }

    /// Invoke one operation on a bean.
    pub async fn invoke(
        &self,
        bean: &str,
        operation: &str,
        params: Vec<Value>,
        signature: Vec<String>,
    ) -> Result<Option<Value>, ChannelError> {
        let name = self.context.resolve_name(bean)?;
        match self.handle_or_warn().await? {
            ChannelHandle::Local(registry) => {
                let target = registry.require(&name)?;
                Ok(target.invoke(operation, params).await?)
            }
            ChannelHandle::Remote(remote) => {
                let codec = self.channel.codec();
                let mut encoded = Vec::with_capacity(params.len());
                for param in &params {
                    encoded.push(codec.encode(param)?);
                }
                let mut client = remote.client.clone();
                let request = remote.with_session(InvokeRequest {
                    bean: name.to_string(),
                    operation: operation.to_string(),
                    params: encoded,
                    signature,
                });
                match client.invoke(request).await {
                    Ok(response) => self.decode_value(response.into_inner()),
                    Err(status) => Err(self.fail(status).await),
                }
            }
        }
    }

    async fn handle_or_warn(&self) -> Result<ChannelHandle, ChannelError> {
        match self.channel.handle().await {
            Some(handle) => Ok(handle),
            None => {
                warn!(channel = %self.channel.info(), "invocation skipped, channel not connected");
                Err(ChannelError::NotConnected)
            }
        }
    }

    async fn fail(&self, status: tonic::Status) -> ChannelError {
        if ChannelError::is_transport_status(&status) {
            warn!(
                channel = %self.channel.info(),
                status = %status,
                "transport failure, resetting channel"
            );
            self.channel.reset().await;
            ChannelError::Transport(status.to_string())
        } else {
            ChannelError::Remote(status.message().to_string())
        }
    }

    fn decode_value(&self, response: ValueResponse) -> Result<Option<Value>, ChannelError> {
        if !response.present {
            return Ok(None);
        }
        let value = self.channel.codec().decode(&response.value)?;
        Ok(Some(value))
    }
}
