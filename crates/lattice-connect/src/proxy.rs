//! Bean proxies: call-site-friendly front ends over a dispatcher.

use crate::channel::{NotificationFilter, NotificationListener};
use crate::dispatch::{InvocationDispatcher, MethodKind, MethodShape};
use crate::error::ChannelError;
use lattice_mgmt::{BeanError, BeanName};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Grants listener registration scoped to one bean.
pub trait NotificationEmitter {
    fn add_notification_listener(
        &self,
        listener: Arc<dyn NotificationListener>,
        filter: Option<Arc<dyn NotificationFilter>>,
        handback: Option<Value>,
    );

    fn remove_notification_listener(
        &self,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: &Option<Value>,
    ) -> bool;
}

/// A proxy for one remote (or local) bean.
///
/// Construction is cheap: a proxy is a dispatcher reference plus a resolved
/// name. Method shapes route through the shared classification cache, so
/// `call` is safe to use on a hot path.
pub struct BeanProxy {
    dispatcher: Arc<InvocationDispatcher>,
    name: BeanName,
}

impl BeanProxy {
    pub fn new(dispatcher: Arc<InvocationDispatcher>, name: BeanName) -> Self {
        Self { dispatcher, name }
    }

    pub fn name(&self) -> &BeanName {
        &self.name
    }

    /// Route a method shape to the right management call.
    ///
    /// Getter shapes read the attribute, setter shapes write their single
    /// argument, everything else is invoked as an operation with
    /// `param_types` as its signature.
    pub async fn call(
        &self,
        shape: &MethodShape,
        param_types: &[String],
        mut args: Vec<Value>,
    ) -> Result<Option<Value>, ChannelError> {
        let bean = self.name.to_string();
        match self.dispatcher.context().classify(shape, param_types) {
            MethodKind::GetAttribute(attribute) => {
                self.dispatcher.get_attribute(&bean, &attribute).await
            }
            MethodKind::SetAttribute(attribute) => {
                if args.len() != 1 {
                    return Err(ChannelError::Bean(BeanError::InvalidArgument {
                        operation: shape.name.clone(),
                        reason: format!("expected 1 argument, got {}", args.len()),
                    }));
                }
                let value = args.remove(0);
                self.dispatcher
                    .set_attribute(&bean, &attribute, value)
                    .await
                    .map(|_| None)
            }
            MethodKind::Operation { signature } => {
                self.dispatcher
                    .invoke(&bean, &shape.name, args, signature)
                    .await
            }
        }
    }

    /// Typed attribute read.
    pub async fn get<T: DeserializeOwned>(
        &self,
        attribute: &str,
    ) -> Result<Option<T>, ChannelError> {
        let value = self
            .dispatcher
            .get_attribute(&self.name.to_string(), attribute)
            .await?;
        match value {
            Some(value) => {
                let typed = serde_json::from_value(value).map_err(BeanError::Codec)?;
                Ok(Some(typed))
            }
            None => Ok(None),
        }
    }

    /// Typed attribute write.
    pub async fn set<T: Serialize>(&self, attribute: &str, value: T) -> Result<(), ChannelError> {
        let value = serde_json::to_value(value).map_err(BeanError::Codec)?;
        self.dispatcher
            .set_attribute(&self.name.to_string(), attribute, value)
            .await
    }

    /// Plain operation invocation.
    pub async fn operation(
        &self,
        operation: &str,
        params: Vec<Value>,
        signature: Vec<String>,
    ) -> Result<Option<Value>, ChannelError> {
        self.dispatcher
            .invoke(&self.name.to_string(), operation, params, signature)
            .await
    }
}

impl NotificationEmitter for BeanProxy {
    fn add_notification_listener(
        &self,
        listener: Arc<dyn NotificationListener>,
        filter: Option<Arc<dyn NotificationFilter>>,
        handback: Option<Value>,
    ) {
        self.dispatcher.channel().add_notification_listener(
            self.name.clone(),
            listener,
            filter,
            handback,
        );
    }

    fn remove_notification_listener(
        &self,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: &Option<Value>,
    ) -> bool {
        self.dispatcher
            .channel()
            .remove_notification_listener(&self.name, listener, filter, handback)
    }
}
