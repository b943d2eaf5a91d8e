//! The `ManagedBean` trait and bean descriptors.

use crate::error::BeanError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes one readable (and possibly writable) attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub writable: bool,
    #[serde(default)]
    pub description: String,
}

/// Describes one invocable operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    /// Parameter type hints, free-form strings such as "string" or "i64".
    #[serde(default)]
    pub signature: Vec<String>,
    /// Whether the operation produces a value.
    #[serde(default)]
    pub returns_value: bool,
    #[serde(default)]
    pub description: String,
}

/// Self-description of a bean's management surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeanDescriptor {
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub operations: Vec<OperationDescriptor>,
}

impl BeanDescriptor {
    /// Builder-style attribute registration.
    pub fn attribute(mut self, name: impl Into<String>, writable: bool) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.into(),
            writable,
            description: String::new(),
        });
        self
    }

    /// Builder-style operation registration.
    pub fn operation(
        mut self,
        name: impl Into<String>,
        signature: &[&str],
        returns_value: bool,
    ) -> Self {
        self.operations.push(OperationDescriptor {
            name: name.into(),
            signature: signature.iter().map(|s| s.to_string()).collect(),
            returns_value,
            description: String::new(),
        });
        self
    }
}

/// A management bean: a named object exposing attributes and operations.
///
/// Attribute and parameter values are `serde_json::Value`, the codec seam
/// turns them into bytes at the wire boundary. Implementations must be
/// `Send + Sync` because the registry hands out `Arc<dyn ManagedBean>`
/// across tasks.
#[async_trait]
pub trait ManagedBean: Send + Sync {
    /// Read one attribute. `Ok(None)` means the attribute exists but
    /// currently has no value.
    async fn get_attribute(&self, name: &str) -> Result<Option<Value>, BeanError>;

    /// Write one attribute.
    async fn set_attribute(&self, name: &str, value: Value) -> Result<(), BeanError>;

    /// Invoke one operation with positional parameters.
    async fn invoke(&self, operation: &str, params: Vec<Value>) -> Result<Option<Value>, BeanError>;

    /// Describe this bean's attributes and operations.
    fn descriptor(&self) -> BeanDescriptor;
}
