pub mod client;
pub mod discovery;

pub use client::{AuthorizeUrlParams, OidcClient, OidcError, TokenResponse, UserInfo};
pub use discovery::{discovery_url, ProviderMetadata};
