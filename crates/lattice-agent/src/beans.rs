//! Built-in beans every agent registers: node administration and host
//! system information.

use async_trait::async_trait;
use lattice_mgmt::{BeanDescriptor, BeanError, ManagedBean};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use sysinfo::System;
use tokio::sync::mpsc;

/// Name the admin bean registers under. Fleet fan-out targets this name on
/// every node.
pub const ADMIN_BEAN: &str = "lattice:type=node,name=admin";

/// Name the system-info bean registers under.
pub const SYSTEM_BEAN: &str = "lattice:type=node,name=system";

/// Lifecycle request raised through the admin bean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSignal {
    Stop,
    Restart,
}

/// Node administration surface: the operations `AdminAction` fans out plus
/// a handful of liveness attributes.
pub struct NodeAdminBean {
    host: String,
    started: Instant,
    operations: AtomicU64,
    signals: mpsc::Sender<AgentSignal>,
}

impl NodeAdminBean {
    pub fn new(host: impl Into<String>, signals: mpsc::Sender<AgentSignal>) -> Self {
        Self {
            host: host.into(),
            started: Instant::now(),
            operations: AtomicU64::new(0),
            signals,
        }
    }

    fn raise(&self, signal: AgentSignal) -> Result<(), BeanError> {
        match self.signals.try_send(signal) {
            Ok(()) => Ok(()),
            // A signal is already pending; the process is going down anyway.
            Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BeanError::Other(
                "agent signal channel is closed".to_string(),
            )),
        }
    }

    fn note_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ManagedBean for NodeAdminBean {
    async fn get_attribute(&self, name: &str) -> Result<Option<Value>, BeanError> {
        match name {
            "host" => Ok(Some(json!(self.host))),
            "uptimeMs" => Ok(Some(json!(self.started.elapsed().as_millis() as u64))),
            "operations" => Ok(Some(json!(self.operations.load(Ordering::Relaxed)))),
            other => Err(BeanError::AttributeNotFound {
                bean: ADMIN_BEAN.to_string(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn set_attribute(&self, name: &str, _value: Value) -> Result<(), BeanError> {
        match name {
            "host" | "uptimeMs" | "operations" => Err(BeanError::AttributeReadOnly {
                bean: ADMIN_BEAN.to_string(),
                attribute: name.to_string(),
            }),
            other => Err(BeanError::AttributeNotFound {
                bean: ADMIN_BEAN.to_string(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn invoke(&self, operation: &str, params: Vec<Value>) -> Result<Option<Value>, BeanError> {
        if !params.is_empty() {
            return Err(BeanError::InvalidArgument {
                operation: operation.to_string(),
                reason: format!("expected no parameters, got {}", params.len()),
            });
        }
        match operation {
            "stop" => {
                self.note_operation();
                self.raise(AgentSignal::Stop)?;
                Ok(Some(json!({"stopping": true})))
            }
            "restart" => {
                self.note_operation();
                self.raise(AgentSignal::Restart)?;
                Ok(Some(json!({"restarting": true})))
            }
            "reconnect" => {
                // Nothing to re-establish on the serving side; clients
                // reconnect to us. Acknowledge so fan-out reports success.
                self.note_operation();
                Ok(None)
            }
            "resetCounters" => {
                self.operations.store(0, Ordering::Relaxed);
                Ok(None)
            }
            other => Err(BeanError::OperationNotFound {
                bean: ADMIN_BEAN.to_string(),
                operation: other.to_string(),
            }),
        }
    }

    fn descriptor(&self) -> BeanDescriptor {
        BeanDescriptor::default()
            .attribute("host", false)
            .attribute("uptimeMs", false)
            .attribute("operations", false)
            .operation("stop", &[], true)
            .operation("restart", &[], true)
            .operation("reconnect", &[], false)
            .operation("resetCounters", &[], false)
    }
}

/// Host facts probed once at startup. Values that cannot change for the
/// process lifetime are cached; `uptimeMs` is computed on read.
pub struct SystemInfoBean {
    hostname: String,
    cores: usize,
    total_memory_bytes: u64,
    pid: u32,
    started: Instant,
}

impl SystemInfoBean {
    pub fn probe() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            cores: sys.cpus().len().max(1),
            total_memory_bytes: sys.total_memory(),
            pid: std::process::id(),
            started: Instant::now(),
        }
    }

    fn snapshot(&self) -> Value {
        json!({
            "hostname": self.hostname,
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cores": self.cores,
            "totalMemoryBytes": self.total_memory_bytes,
            "pid": self.pid,
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeMs": self.started.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl ManagedBean for SystemInfoBean {
    async fn get_attribute(&self, name: &str) -> Result<Option<Value>, BeanError> {
        match name {
            "hostname" => Ok(Some(json!(self.hostname))),
            "os" => Ok(Some(json!(std::env::consts::OS))),
            "arch" => Ok(Some(json!(std::env::consts::ARCH))),
            "cores" => Ok(Some(json!(self.cores))),
            "totalMemoryBytes" => Ok(Some(json!(self.total_memory_bytes))),
            "pid" => Ok(Some(json!(self.pid))),
            "version" => Ok(Some(json!(env!("CARGO_PKG_VERSION")))),
            "uptimeMs" => Ok(Some(json!(self.started.elapsed().as_millis() as u64))),
            other => Err(BeanError::AttributeNotFound {
                bean: SYSTEM_BEAN.to_string(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn set_attribute(&self, name: &str, _value: Value) -> Result<(), BeanError> {
        Err(BeanError::AttributeReadOnly {
            bean: SYSTEM_BEAN.to_string(),
            attribute: name.to_string(),
        })
    }

    async fn invoke(&self, operation: &str, params: Vec<Value>) -> Result<Option<Value>, BeanError> {
        match operation {
            "snapshot" => {
                if !params.is_empty() {
                    return Err(BeanError::InvalidArgument {
                        operation: operation.to_string(),
                        reason: "snapshot takes no parameters".to_string(),
                    });
                }
                Ok(Some(self.snapshot()))
            }
            other => Err(BeanError::OperationNotFound {
                bean: SYSTEM_BEAN.to_string(),
                operation: other.to_string(),
            }),
        }
    }

    fn descriptor(&self) -> BeanDescriptor {
        BeanDescriptor::default()
            .attribute("hostname", false)
            .attribute("os", false)
            .attribute("arch", false)
            .attribute("cores", false)
            .attribute("totalMemoryBytes", false)
            .attribute("pid", false)
            .attribute("version", false)
            .attribute("uptimeMs", false)
            .operation("snapshot", &[], true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> (NodeAdminBean, mpsc::Receiver<AgentSignal>) {
        let (tx, rx) = mpsc::channel(1);
        (NodeAdminBean::new("10.0.0.5", tx), rx)
    }

    #[tokio::test]
    async fn test_admin_counts_operations_and_resets() {
        let (bean, _rx) = admin();

        assert_eq!(
            bean.get_attribute("operations").await.unwrap(),
            Some(json!(0))
        );
        bean.invoke("reconnect", Vec::new()).await.unwrap();
        bean.invoke("reconnect", Vec::new()).await.unwrap();
        assert_eq!(
            bean.get_attribute("operations").await.unwrap(),
            Some(json!(2))
        );

        assert_eq!(bean.invoke("resetCounters", Vec::new()).await.unwrap(), None);
        assert_eq!(
            bean.get_attribute("operations").await.unwrap(),
            Some(json!(0))
        );
    }

    #[tokio::test]
    async fn test_stop_raises_a_signal() {
        let (bean, mut rx) = admin();

        let value = bean.invoke("stop", Vec::new()).await.unwrap();
        assert_eq!(value, Some(json!({"stopping": true})));
        assert_eq!(rx.recv().await, Some(AgentSignal::Stop));
    }

    #[tokio::test]
    async fn test_restart_while_a_signal_is_pending_still_succeeds() {
        let (bean, mut rx) = admin();

        bean.invoke("stop", Vec::new()).await.unwrap();
        // Channel capacity is 1; the second request must not fail.
        let value = bean.invoke("restart", Vec::new()).await.unwrap();
        assert_eq!(value, Some(json!({"restarting": true})));
        assert_eq!(rx.recv().await, Some(AgentSignal::Stop));
    }

    #[tokio::test]
    async fn test_closed_signal_channel_is_an_error() {
        let (bean, rx) = admin();
        drop(rx);

        let err = bean.invoke("stop", Vec::new()).await.unwrap_err();
        assert!(matches!(err, BeanError::Other(_)));
    }

    #[tokio::test]
    async fn test_admin_attributes_are_read_only() {
        let (bean, _rx) = admin();

        assert_eq!(
            bean.get_attribute("host").await.unwrap(),
            Some(json!("10.0.0.5"))
        );
        assert!(matches!(
            bean.set_attribute("host", json!("other")).await.unwrap_err(),
            BeanError::AttributeReadOnly { .. }
        ));
        assert!(matches!(
            bean.set_attribute("ghost", json!(1)).await.unwrap_err(),
            BeanError::AttributeNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_admin_operations_take_no_parameters() {
        let (bean, _rx) = admin();

        let err = bean.invoke("stop", vec![json!("now")]).await.unwrap_err();
        assert!(matches!(err, BeanError::InvalidArgument { .. }));
        assert_eq!(
            bean.get_attribute("operations").await.unwrap(),
            Some(json!(0))
        );
    }

    #[tokio::test]
    async fn test_system_info_snapshot() {
        let bean = SystemInfoBean::probe();

        assert_eq!(
            bean.get_attribute("os").await.unwrap(),
            Some(json!(std::env::consts::OS))
        );
        let cores = bean.get_attribute("cores").await.unwrap().unwrap();
        assert!(cores.as_u64().unwrap() >= 1);

        let snapshot = bean.invoke("snapshot", Vec::new()).await.unwrap().unwrap();
        for key in ["hostname", "os", "arch", "cores", "pid", "version", "uptimeMs"] {
            assert!(snapshot.get(key).is_some(), "snapshot missing {key}");
        }

        assert!(matches!(
            bean.set_attribute("cores", json!(64)).await.unwrap_err(),
            BeanError::AttributeReadOnly { .. }
        ));
        assert!(matches!(
            bean.invoke("snapshot", vec![json!(1)]).await.unwrap_err(),
            BeanError::InvalidArgument { .. }
        ));
    }
}
