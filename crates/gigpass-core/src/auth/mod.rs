//! Credential handling for the three user realms.
//!
//! This module provides:
//! - `TokenStore`: the in-memory access and refresh credentials
//! - `RefreshCoordinator`: single-flight renewal with a failure cooldown
//! - `TokenRenewer` / `HttpRenewer`: the renewal endpoint transport
//! - `SessionExpiryHandler`: one notice and one redirect per expiry episode

pub mod error;
pub mod expiry;
pub mod refresh;
pub mod renewer;
pub mod store;

pub use error::RefreshError;
pub use expiry::{
    ExpiryOutcome, Notifier, SessionExpiryHandler, TracingNotifier, ADMIN_ACCESS_REVOKED_MESSAGE,
    SESSION_EXPIRED_MESSAGE,
};
pub use refresh::RefreshCoordinator;
pub use renewer::{HttpRenewer, RenewedTokens, TokenRenewer};
pub use store::{AccessCredential, RefreshCredential, TokenStore};
