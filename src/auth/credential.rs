// Credential discovery.
// Picks a client-secret service principal or a managed identity from environment variables.

/// Instance metadata service token endpoint for managed identities.
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// A source of ARM tokens.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Service principal with a client secret (client-credentials grant).
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// System- or user-assigned managed identity.
    ManagedIdentity {
        endpoint: String,
        client_id: Option<String>,
    },
}

impl Credential {
    /// Resolve a credential from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve a credential through an arbitrary variable lookup.
    ///
    /// A complete tenant/client/secret triple wins; anything less falls back
    /// to the managed identity, using `AZURE_CLIENT_ID` as the user-assigned
    /// identity when it is present.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let tenant_id = non_empty("AZURE_TENANT_ID");
        let client_id = non_empty("AZURE_CLIENT_ID");
        let client_secret = non_empty("AZURE_CLIENT_SECRET");

        match (tenant_id, client_id, client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Self::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            },
            (_, client_id, _) => Self::ManagedIdentity {
                endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
                client_id,
            },
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientSecret { .. } => "client secret",
            Self::ManagedIdentity { .. } => "managed identity",
        }
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
            Self::ManagedIdentity {
                endpoint,
                client_id,
            } => f
                .debug_struct("ManagedIdentity")
                .field("endpoint", endpoint)
                .field("client_id", client_id)
                .finish(),
        }
    }
}
