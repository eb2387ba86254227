// Storage cache resource types.
// Defines the Microsoft.StorageCache/caches resource and the ARM error and operation bodies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Provisioning state of an ARM resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Succeeded,
    Failed,
    #[serde(alias = "Canceled")]
    Cancelled,
    Creating,
    Deleting,
    Updating,
    #[serde(other)]
    Unknown,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// HPC cache resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<CacheSku>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<CacheProperties>,
}

impl Cache {
    /// Create-or-update body for a cache of `size_gb` in `subnet`.
    pub fn new(location: &str, name: &str, subnet: &str, size_gb: i32, sku: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            location: Some(location.to_string()),
            sku: Some(CacheSku {
                name: Some(sku.to_string()),
            }),
            properties: Some(CacheProperties {
                cache_size_gb: Some(size_gb),
                subnet: Some(subnet.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.properties.as_ref()?.provisioning_state
    }
}

/// Cache SKU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSku {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Cache properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheProperties {
    #[serde(rename = "cacheSizeGB", default, skip_serializing_if = "Option::is_none")]
    pub cache_size_gb: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<ProvisioningState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<CacheHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_addresses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_status: Option<CacheUpgradeStatus>,
}

/// Cache health as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
}

/// Firmware upgrade status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUpgradeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_update_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_update_deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_firmware_update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_firmware_version: Option<String>,
}

/// ARM error detail, shared by error responses and failed operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// ARM error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudError {
    pub error: ErrorDetail,
}

/// Body returned by an `Azure-AsyncOperation` polling URL.
#[derive(Debug, Clone, Deserialize)]
pub struct AsyncOperationStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}
