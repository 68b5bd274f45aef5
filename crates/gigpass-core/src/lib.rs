//! Core library for gigpass.
//!
//! Authenticated HTTP access to the gig marketplace backend for the three
//! user realms (end users, organizations, administrators): credential
//! storage, single-flight renewal, retry-once requests and realm-aware
//! session expiry.

pub mod api;
pub mod auth;
pub mod config;
pub mod routes;

pub use api::{ApiClient, ApiClientBuilder, ApiError, ApiRequest};
pub use auth::{RefreshError, TokenStore};
pub use config::Config;
pub use routes::{MemoryNavigator, NavigationTarget, Navigator, Realm, RouteClass, RouteTable};
