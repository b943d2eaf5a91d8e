//! In-process bean registry with a broadcast notification bus.

use crate::bean::ManagedBean;
use crate::error::BeanError;
use crate::name::BeanName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

/// One event emitted by a bean through its registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Bean the event originated from.
    pub source: BeanName,
    /// Free-form event kind, e.g. `"state.changed"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Structured payload, `Value::Null` when the event carries none.
    #[serde(default)]
    pub payload: Value,
    /// Per-registry monotonically increasing sequence number.
    pub sequence: u64,
    /// Milliseconds since the unix epoch at emission time.
    pub timestamp_ms: u64,
}

/// Capacity of the broadcast bus before slow subscribers start lagging.
const NOTIFICATION_BUS_CAPACITY: usize = 256;

/// Registry mapping bean names to live bean instances.
///
/// Lookups hand out `Arc<dyn ManagedBean>` clones so invocations never hold
/// the registry lock. Notifications fan out over a `tokio::sync::broadcast`
/// channel; emitting with no subscribers is not an error.
///
/// # Example
/// ```
/// use lattice_mgmt::{BeanName, BeanRegistry};
///
/// let registry = BeanRegistry::new();
/// let name: BeanName = "lattice:type=node,name=admin".parse().unwrap();
/// assert!(registry.lookup(&name).is_none());
/// ```
pub struct BeanRegistry {
    beans: RwLock<HashMap<BeanName, Arc<dyn ManagedBean>>>,
    bus: broadcast::Sender<Notification>,
    sequence: AtomicU64,
}

impl BeanRegistry {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(NOTIFICATION_BUS_CAPACITY);
        Self {
            beans: RwLock::new(HashMap::new()),
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a bean under a name. Fails if the name is taken.
    pub fn register(
        &self,
        name: BeanName,
        bean: Arc<dyn ManagedBean>,
    ) -> Result<(), BeanError> {
        let mut beans = self.write_lock();
        if beans.contains_key(&name) {
            return Err(BeanError::AlreadyRegistered(name.to_string()));
        }
        debug!(bean = %name, "registering bean");
        beans.insert(name, bean);
        Ok(())
    }

    /// Remove a bean. Fails if the name is unknown.
    pub fn unregister(&self, name: &BeanName) -> Result<Arc<dyn ManagedBean>, BeanError> {
        let mut beans = self.write_lock();
        beans
            .remove(name)
            .ok_or_else(|| BeanError::NotRegistered(name.to_string()))
    }

    /// Look up a bean by name.
    pub fn lookup(&self, name: &BeanName) -> Option<Arc<dyn ManagedBean>> {
        self.read_lock().get(name).cloned()
    }

    /// Look up a bean by name, failing with `NotRegistered` when absent.
    pub fn require(&self, name: &BeanName) -> Result<Arc<dyn ManagedBean>, BeanError> {
        self.lookup(name)
            .ok_or_else(|| BeanError::NotRegistered(name.to_string()))
    }

    /// All registered names, in canonical order.
    pub fn names(&self) -> Vec<BeanName> {
        let mut names: Vec<BeanName> = self.read_lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered beans.
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// Emit a notification from `source`. Returns the assigned sequence
    /// number. The event is dropped silently when nobody subscribes.
    pub fn emit(
        &self,
        source: BeanName,
        kind: impl Into<String>,
        message: impl Into<String>,
        payload: Value,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let notification = Notification {
            source,
            kind: kind.into(),
            message: message.into(),
            payload,
            sequence,
            timestamp_ms: now_ms(),
        };
        let _ = self.bus.send(notification);
        sequence
    }

    /// Subscribe to the notification bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<BeanName, Arc<dyn ManagedBean>>> {
        match self.beans.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_lock(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<BeanName, Arc<dyn ManagedBean>>> {
        match self.beans.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for BeanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::BeanDescriptor;
    use async_trait::async_trait;
    use serde_json::json;

    struct CounterBean;

    #[async_trait]
    impl ManagedBean for CounterBean {
        async fn get_attribute(&self, name: &str) -> Result<Option<Value>, BeanError> {
            match name {
                "count" => Ok(Some(json!(42))),
                other => Err(BeanError::AttributeNotFound {
                    bean: "counter".to_string(),
                    attribute: other.to_string(),
                }),
            }
        }

        async fn set_attribute(&self, name: &str, _value: Value) -> Result<(), BeanError> {
            Err(BeanError::AttributeReadOnly {
                bean: "counter".to_string(),
                attribute: name.to_string(),
            })
        }

        async fn invoke(
            &self,
            operation: &str,
            _params: Vec<Value>,
        ) -> Result<Option<Value>, BeanError> {
            match operation {
                "reset" => Ok(None),
                other => Err(BeanError::OperationNotFound {
                    bean: "counter".to_string(),
                    operation: other.to_string(),
                }),
            }
        }

        fn descriptor(&self) -> BeanDescriptor {
            BeanDescriptor::default()
                .attribute("count", false)
                .operation("reset", &[], false)
        }
    }

    fn name(text: &str) -> BeanName {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let registry = BeanRegistry::new();
        let counter = name("test:type=counter,name=a");

        registry
            .register(counter.clone(), Arc::new(CounterBean))
            .unwrap();
        assert!(registry
            .register(counter.clone(), Arc::new(CounterBean))
            .is_err());

        let bean = registry.lookup(&counter).unwrap();
        assert_eq!(bean.get_attribute("count").await.unwrap(), Some(json!(42)));

        registry.unregister(&counter).unwrap();
        assert!(registry.lookup(&counter).is_none());
        assert!(registry.unregister(&counter).is_err());
    }

    #[test]
    fn test_names_are_sorted() {
        let registry = BeanRegistry::new();
        registry
            .register(name("b:type=x,name=1"), Arc::new(CounterBean))
            .unwrap();
        registry
            .register(name("a:type=x,name=2"), Arc::new(CounterBean))
            .unwrap();

        let names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["a:name=2,type=x", "b:name=1,type=x"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_notifications_sequence_monotonic() {
        let registry = BeanRegistry::new();
        let source = name("test:type=counter,name=a");
        let mut rx = registry.subscribe();

        let first = registry.emit(source.clone(), "tick", "first", Value::Null);
        let second = registry.emit(source.clone(), "tick", "second", json!({"n": 2}));
        assert!(second > first);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.sequence, first);
        assert_eq!(got.kind, "tick");
        assert_eq!(got.source, source);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.sequence, second);
        assert_eq!(got.payload, json!({"n": 2}));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let registry = BeanRegistry::new();
        let sequence = registry.emit(
            name("test:type=counter,name=a"),
            "tick",
            "nobody listening",
            Value::Null,
        );
        assert_eq!(sequence, 1);
    }
}
