//! Authenticated REST client for the gig marketplace backend.
//!
//! This module provides the `ApiClient`, the request pipeline every API call
//! goes through. It attaches the bearer credential, renews it once on 401
//! through the shared refresh coordinator, and hands unrecoverable failures
//! to the session expiry handler.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, ApiClientBuilder, LogoutOutcome};
pub use error::ApiError;
pub use request::{ApiRequest, RequestBody};
