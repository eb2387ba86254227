// Authorization module.
// Discovers a credential from the environment and exchanges it for an ARM bearer token.

pub mod credential;
pub mod token;

pub use credential::{Credential, IMDS_TOKEN_ENDPOINT};
pub use token::{AccessToken, Authorizer};
