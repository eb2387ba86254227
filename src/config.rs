// Run configuration loaded from environment variables.
// Resolves the target subscription, the cloud endpoints, and the fixed cache parameters.

use std::time::Duration;

use tracing::warn;

/// Name of the cache created and torn down by every run.
pub const CACHE_NAME: &str = "goSDK";
/// Cache size in GB.
pub const CACHE_SIZE_GB: i32 = 3072;
/// Service tier of the cache.
pub const CACHE_SKU: &str = "Standard_2G";
/// Default deadline shared by every remote call in a run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Fallback delay between polls when the service sends no Retry-After.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Azure cloud the run targets, selected by `AZURE_ENVIRONMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudEnvironment {
    #[default]
    Public,
    UsGovernment,
    China,
    Germany,
}

impl CloudEnvironment {
    /// Parse an SDK environment name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AZUREPUBLICCLOUD" | "AZURECLOUD" => Some(Self::Public),
            "AZUREUSGOVERNMENTCLOUD" | "AZUREUSGOVERNMENT" => Some(Self::UsGovernment),
            "AZURECHINACLOUD" => Some(Self::China),
            "AZUREGERMANCLOUD" => Some(Self::Germany),
            _ => None,
        }
    }

    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://management.azure.com",
            Self::UsGovernment => "https://management.usgovcloudapi.net",
            Self::China => "https://management.chinacloudapi.cn",
            Self::Germany => "https://management.microsoftazure.de",
        }
    }

    pub fn active_directory_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Germany => "https://login.microsoftonline.de",
        }
    }
}

/// Everything a run needs to know before it makes its first call.
#[derive(Debug, Clone)]
pub struct Config {
    pub subscription_id: String,
    pub resource_group: String,
    pub subnet_name: String,
    pub location: String,
    pub cache_name: String,
    pub cache_size_gb: i32,
    pub sku: String,
    /// Base URL of the resource manager, without a trailing slash.
    pub resource_manager_endpoint: String,
    /// Base URL of the identity provider, without a trailing slash.
    pub active_directory_endpoint: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// The four required variables are taken as-is. A missing one becomes an
    /// empty string and a warning, and the run fails at the API instead.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).unwrap_or_else(|| {
                warn!("{} is not set", key);
                String::new()
            })
        };

        let environment = match lookup("AZURE_ENVIRONMENT") {
            Some(name) if !name.is_empty() => CloudEnvironment::from_name(&name).unwrap_or_else(|| {
                warn!("unknown AZURE_ENVIRONMENT '{}', using AzurePublicCloud", name);
                CloudEnvironment::Public
            }),
            _ => CloudEnvironment::Public,
        };

        let seconds = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            subscription_id: required("AZURE_SUBSCRIPTION_ID"),
            resource_group: required("RESOURCE_GROUP_NAME"),
            subnet_name: required("SUBNET_NAME"),
            location: required("_REGION"),
            cache_name: CACHE_NAME.to_string(),
            cache_size_gb: CACHE_SIZE_GB,
            sku: CACHE_SKU.to_string(),
            resource_manager_endpoint: environment.resource_manager_endpoint().to_string(),
            active_directory_endpoint: environment.active_directory_endpoint().to_string(),
            timeout: seconds("CACHE_CHECK_TIMEOUT_SECS", DEFAULT_TIMEOUT),
            poll_interval: seconds("CACHE_CHECK_POLL_SECS", DEFAULT_POLL_INTERVAL),
        }
    }

    /// Resource ID of the subnet the cache is placed in.
    ///
    /// The virtual network is always named `vnet_<resource group>`.
    pub fn subnet_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/vnet_{}/subnets/{}",
            self.subscription_id, self.resource_group, self.resource_group, self.subnet_name
        )
    }

    /// Token audience for the resource manager.
    pub fn management_resource(&self) -> String {
        format!("{}/", self.resource_manager_endpoint.trim_end_matches('/'))
    }
}
