//! User-visible consequences of a session that cannot be recovered.
//!
//! A burst of requests failing together produces one notice and one
//! navigation: the first caller claims the pending flag, later callers only
//! clear credentials. The flag is released once the delayed navigation ran.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::store::TokenStore;
use crate::routes::{NavigationTarget, Navigator, Realm, RouteClass, RouteTable};

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

pub const ADMIN_ACCESS_REVOKED_MESSAGE: &str =
    "Administrator access is no longer available. Please log in again.";

/// Side-effect adapter for toast-style notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        warn!(notice = message, "Session notice");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Notice shown, navigation scheduled.
    Scheduled(NavigationTarget),
    /// Another failure in the same episode already scheduled a navigation.
    AlreadyPending,
    /// The current location does not require a session.
    Public,
    /// Nothing to do for this realm.
    NotApplicable,
}

pub struct SessionExpiryHandler {
    store: Arc<TokenStore>,
    routes: RouteTable,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    redirect_delay: Duration,
    notice_pending: Arc<AtomicBool>,
}

impl SessionExpiryHandler {
    pub fn new(
        store: Arc<TokenStore>,
        routes: RouteTable,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
        redirect_delay: Duration,
    ) -> Self {
        Self {
            store,
            routes,
            navigator,
            notifier,
            redirect_delay,
            notice_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Classification of the location the navigator currently shows.
    pub fn current_route(&self) -> RouteClass {
        self.routes.classify(&self.navigator.current_path())
    }

    pub fn is_notice_pending(&self) -> bool {
        self.notice_pending.load(Ordering::SeqCst)
    }

    /// Renewal failed for good: drop credentials and, on a protected
    /// location, send the user to the login surface of its realm.
    pub fn handle_session_expired(&self) -> ExpiryOutcome {
        self.store.clear();
        self.end_episode(self.current_route(), SESSION_EXPIRED_MESSAGE)
    }

    /// A 403 on an administrator location means the account lost its admin
    /// role. Other realms keep their session.
    pub fn handle_forbidden(&self) -> ExpiryOutcome {
        let class = self.current_route();
        if class != RouteClass::Protected(Realm::Administrator) {
            return ExpiryOutcome::NotApplicable;
        }
        self.store.clear();
        self.end_episode(class, ADMIN_ACCESS_REVOKED_MESSAGE)
    }

    fn end_episode(&self, class: RouteClass, message: &str) -> ExpiryOutcome {
        let Some(target) = self.routes.redirect_target(class) else {
            debug!("Session ended on a public location, staying put");
            return ExpiryOutcome::Public;
        };

        if self
            .notice_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session notice already pending");
            return ExpiryOutcome::AlreadyPending;
        }

        warn!(realm = ?target.realm, login = %target.path, "Session ended, redirecting to login");
        self.notifier.notify(message);

        let navigator = Arc::clone(&self.navigator);
        let pending = Arc::clone(&self.notice_pending);
        let delay = self.redirect_delay;
        let scheduled = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.navigate(&scheduled);
            pending.store(false, Ordering::SeqCst);
        });

        ExpiryOutcome::Scheduled(target)
    }
}

impl std::fmt::Debug for SessionExpiryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionExpiryHandler")
            .field("redirect_delay", &self.redirect_delay)
            .field("notice_pending", &self.is_notice_pending())
            .finish()
    }
}
