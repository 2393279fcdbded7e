//! Trusted-device gate.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Predicate telling whether a device has logged in to an account before.
///
/// Lookups must not have side effects. Implementations that cannot reach
/// their backing record answer `false`, which keeps every tier enforced.
#[async_trait]
pub trait DeviceTrust: Send + Sync {
    async fn is_trusted(&self, account_id: &str, device_token: Option<&str>) -> bool;
}

/// A device trust record that learns from successful logins.
#[async_trait]
pub trait DeviceRegistry: DeviceTrust {
    /// Associate a device with an account after a successful login.
    async fn remember(&self, account_id: &str, device_token: &str);
}

/// Trusts no device. For deployments without device tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrustedDevices;

#[async_trait]
impl DeviceTrust for NoTrustedDevices {
    async fn is_trusted(&self, _account_id: &str, _device_token: Option<&str>) -> bool {
        false
    }
}

#[async_trait]
impl DeviceRegistry for NoTrustedDevices {
    async fn remember(&self, _account_id: &str, _device_token: &str) {}
}

/// Devices remembered per account before the oldest is forgotten.
pub const MAX_DEVICES_PER_ACCOUNT: usize = 16;

/// In-process device registry.
///
/// Keeps at most [`MAX_DEVICES_PER_ACCOUNT`] devices per account, oldest
/// first out.
#[derive(Debug, Default)]
pub struct MemoryDeviceRegistry {
    devices: DashMap<String, VecDeque<String>>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceTrust for MemoryDeviceRegistry {
    async fn is_trusted(&self, account_id: &str, device_token: Option<&str>) -> bool {
        let Some(token) = device_token else {
            return false;
        };
        self.devices
            .get(account_id)
            .is_some_and(|tokens| tokens.iter().any(|known| known == token))
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn remember(&self, account_id: &str, device_token: &str) {
        let mut tokens = self.devices.entry(account_id.to_owned()).or_default();
        if tokens.iter().any(|known| known == device_token) {
            return;
        }
        if tokens.len() == MAX_DEVICES_PER_ACCOUNT {
            tokens.pop_front();
        }
        tokens.push_back(device_token.to_owned());
        debug!(account = %account_id, devices = tokens.len(), "Remembered trusted device");
    }
}
