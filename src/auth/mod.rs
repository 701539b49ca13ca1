//! Credentials and request signing
//!
//! The pipeline asks a [`CredentialProvider`] for credentials on every signing
//! attempt and hands them to a [`Signer`], which writes the authorization
//! metadata onto the request. Providers own refresh; nothing here caches.

mod credentials;
mod signer;

pub use credentials::{CredentialProvider, CredentialScope, Credentials, StaticCredentialProvider};
pub use signer::{KeyTimeSigner, Signer, SECURITY_TOKEN_HEADER};
