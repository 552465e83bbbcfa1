//! Machine identity for logout requests.

use async_trait::async_trait;
use tracing::debug;

/// Supplies an identifier for the current machine, if one is available.
#[async_trait]
pub trait MachineIdSource: Send + Sync {
    async fn machine_id(&self) -> Option<String>;
}

/// A fixed identifier (or none).
#[derive(Debug, Clone, Default)]
pub struct FixedMachineId(pub Option<String>);

#[async_trait]
impl MachineIdSource for FixedMachineId {
    async fn machine_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the OS machine id from the usual locations on Linux.
#[derive(Debug, Clone, Default)]
pub struct HostMachineId;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[async_trait]
impl MachineIdSource for HostMachineId {
    async fn machine_id(&self) -> Option<String> {
        for path in MACHINE_ID_PATHS {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) if !contents.trim().is_empty() => {
                    return Some(contents.trim().to_string());
                }
                Ok(_) => {}
                Err(e) => debug!(path, error = %e, "machine id unavailable"),
            }
        }
        None
    }
}
