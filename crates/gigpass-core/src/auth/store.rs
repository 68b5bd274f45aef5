//! In-memory credential store.
//!
//! Both credentials live only in process memory. Nothing in this module
//! writes to disk or to an OS keychain, so a process restart always starts
//! from an empty store.

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Short-lived bearer token attached to authenticated requests.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential(String);

/// Longer-lived token used only against the renewal endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshCredential(String);

impl AccessCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value. Only the pipeline and the renewer should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl RefreshCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessCredential(<redacted>)")
    }
}

impl fmt::Debug for RefreshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshCredential(<redacted>)")
    }
}

#[derive(Default)]
struct Slots {
    access: Option<AccessCredential>,
    refresh: Option<RefreshCredential>,
    updated_at: Option<DateTime<Utc>>,
    epoch: u64,
}

/// Single source of truth for the current credential pair.
///
/// Share one instance per process behind an `Arc`; a second store would let
/// two renewals race on different copies of the same session.
#[derive(Default)]
pub struct TokenStore {
    slots: RwLock<Slots>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a credential pair, e.g. right after login.
    pub fn with_credentials(access: impl Into<String>, refresh: Option<String>) -> Self {
        let store = Self::new();
        store.set_access(access);
        if let Some(refresh) = refresh {
            store.set_refresh(refresh);
        }
        store
    }

    pub fn get_access(&self) -> Option<AccessCredential> {
        self.read().access.clone()
    }

    /// Overwrite the access credential. An empty value is ignored.
    pub fn set_access(&self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            debug!("Ignoring empty access credential");
            return;
        }
        let mut slots = self.write();
        slots.access = Some(AccessCredential(value));
        slots.updated_at = Some(Utc::now());
    }

    pub fn clear_access(&self) {
        self.write().access = None;
    }

    pub fn get_refresh(&self) -> Option<RefreshCredential> {
        self.read().refresh.clone()
    }

    /// Overwrite the refresh credential. An empty value is ignored.
    pub fn set_refresh(&self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            debug!("Ignoring empty refresh credential");
            return;
        }
        let mut slots = self.write();
        slots.refresh = Some(RefreshCredential(value));
        slots.updated_at = Some(Utc::now());
    }

    pub fn clear_refresh(&self) {
        self.write().refresh = None;
    }

    /// Drop both credentials in one step and end the current session epoch.
    pub fn clear(&self) {
        let mut slots = self.write();
        slots.access = None;
        slots.refresh = None;
        slots.updated_at = None;
        slots.epoch = slots.epoch.wrapping_add(1);
    }

    /// Counter bumped by every [`clear`](Self::clear). A renewal started in
    /// one epoch must not write credentials into a later one.
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Store renewed credentials only if no clear happened since `epoch`
    /// was read. Returns false when the result was discarded.
    pub(crate) fn apply_renewal(&self, epoch: u64, access: String, refresh: Option<String>) -> bool {
        let mut slots = self.write();
        if slots.epoch != epoch {
            debug!("Discarding renewal from a cleared session");
            return false;
        }
        if !access.is_empty() {
            slots.access = Some(AccessCredential(access));
            slots.updated_at = Some(Utc::now());
        }
        if let Some(refresh) = refresh.filter(|r| !r.is_empty()) {
            slots.refresh = Some(RefreshCredential(refresh));
            slots.updated_at = Some(Utc::now());
        }
        true
    }

    pub fn has_access(&self) -> bool {
        self.read().access.is_some()
    }

    /// When a credential was last written, for status display.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.read().updated_at
    }

    // A panic while holding the lock cannot leave the slots half-written,
    // so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.read();
        f.debug_struct("TokenStore")
            .field("has_access", &slots.access.is_some())
            .field("has_refresh", &slots.refresh.is_some())
            .field("updated_at", &slots.updated_at)
            .finish()
    }
}
