//! Route classification and navigation.
//!
//! Every location in the application shell is either public or belongs to
//! one of three realms. The realm decides which login surface a user is sent
//! to when their session ends. The tables in [`RouteTable`] are the only
//! source of that mapping; a protected path missing from them falls back to
//! the end-user realm.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

/// One of the independent authentication domains served by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Realm {
    EndUser,
    Organization,
    Administrator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case", tag = "kind", content = "realm")]
pub enum RouteClass {
    Public,
    Protected(Realm),
}

impl RouteClass {
    pub fn is_public(&self) -> bool {
        matches!(self, RouteClass::Public)
    }

    pub fn realm(&self) -> Option<Realm> {
        match self {
            RouteClass::Public => None,
            RouteClass::Protected(realm) => Some(*realm),
        }
    }
}

/// Where the shell should go after a session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NavigationTarget {
    pub realm: Realm,
    pub path: String,
}

/// Login surface for each realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginTargets {
    pub end_user: String,
    pub organization: String,
    pub administrator: String,
}

impl Default for LoginTargets {
    fn default() -> Self {
        Self {
            end_user: "/login".to_string(),
            organization: "/company/login".to_string(),
            administrator: "/admin/login".to_string(),
        }
    }
}

impl LoginTargets {
    pub fn for_realm(&self, realm: Realm) -> &str {
        match realm {
            Realm::EndUser => &self.end_user,
            Realm::Organization => &self.organization,
            Realm::Administrator => &self.administrator,
        }
    }
}

/// Static prefix tables used to classify locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    /// Paths reachable without a session. `/` only ever matches itself.
    pub public_paths: Vec<String>,
    pub organization_prefixes: Vec<String>,
    pub administrator_prefixes: Vec<String>,
    pub login: LoginTargets,
}

impl Default for RouteTable {
    fn default() -> Self {
        let public = [
            "/",
            "/login",
            "/register",
            "/forgot-password",
            "/reset-password",
            "/verify-email",
            "/musicians",
            "/gigs/browse",
            "/about",
            "/terms",
            "/privacy",
            "/company/login",
            "/company/register",
            "/admin/login",
        ];
        Self {
            public_paths: public.iter().map(|p| p.to_string()).collect(),
            organization_prefixes: vec!["/company".to_string()],
            administrator_prefixes: vec!["/admin".to_string()],
            login: LoginTargets::default(),
        }
    }
}

impl RouteTable {
    /// Classify a location path. Query strings and fragments are ignored.
    pub fn classify(&self, location: &str) -> RouteClass {
        let path = normalize_path(location);

        if self.public_paths.iter().any(|p| path_matches(path, p)) {
            return RouteClass::Public;
        }
        if self.administrator_prefixes.iter().any(|p| path_matches(path, p)) {
            return RouteClass::Protected(Realm::Administrator);
        }
        if self.organization_prefixes.iter().any(|p| path_matches(path, p)) {
            return RouteClass::Protected(Realm::Organization);
        }
        RouteClass::Protected(Realm::EndUser)
    }

    pub fn is_public(&self, location: &str) -> bool {
        self.classify(location).is_public()
    }

    /// Where a terminal session failure should send the user, if anywhere.
    /// Public locations are never interrupted.
    pub fn redirect_target(&self, class: RouteClass) -> Option<NavigationTarget> {
        let realm = class.realm()?;
        Some(NavigationTarget {
            realm,
            path: self.login.for_realm(realm).to_string(),
        })
    }
}

/// Strip query and fragment, and map an empty path to `/`.
pub(crate) fn normalize_path(location: &str) -> &str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    let path = &location[..end];
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Segment-aware prefix match. The root pattern matches by equality only,
/// since every path starts with `/`.
pub(crate) fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern == "/" {
        return path == "/";
    }
    if path == pattern {
        return true;
    }
    match path.strip_prefix(pattern) {
        Some(rest) => pattern.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Side-effect adapter for the current location.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    fn navigate(&self, target: &NavigationTarget);
}

/// Navigator that tracks the location in memory and records every
/// navigation it performs.
#[derive(Debug)]
pub struct MemoryNavigator {
    path: Mutex<String>,
    history: Mutex<Vec<NavigationTarget>>,
}

impl MemoryNavigator {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            path: Mutex::new(initial.into()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Move to a new location without recording a navigation.
    pub fn set_path(&self, path: impl Into<String>) {
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = path.into();
    }

    pub fn history(&self) -> Vec<NavigationTarget> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn navigate(&self, target: &NavigationTarget) {
        info!(path = %target.path, realm = ?target.realm, "Navigating");
        self.set_path(target.path.clone());
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(target.clone());
    }
}
