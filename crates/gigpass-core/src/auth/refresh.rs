//! Single-flight credential renewal.
//!
//! [`RefreshCoordinator`] owns the one slot that may hold an in-flight
//! renewal. The slot is created lazily by the first caller that needs a new
//! access credential; every caller arriving while it is populated awaits the
//! same shared outcome.
//!
//! Slot lifecycle:
//! - success: credentials are written to the store, the cooldown is cleared
//!   and the slot is emptied immediately.
//! - failure: the slot keeps the failed outcome until the cooldown elapses,
//!   so every caller in the window gets the same error and a burst of
//!   expiring requests costs one backend round-trip.
//! - session cleared mid-flight: the renewed credentials are discarded,
//!   waiters get [`RefreshError::SessionCleared`] and the slot is emptied
//!   without a cooldown, so the next login can renew normally.
//!
//! The renewal runs on its own spawned task. Dropping a waiting caller never
//! cancels an attempt other callers depend on.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::RefreshError;
use super::renewer::{RenewedTokens, TokenRenewer};
use super::store::TokenStore;

type Attempt = Shared<BoxFuture<'static, Result<(), RefreshError>>>;

#[derive(Default)]
struct RefreshState {
    in_flight: Option<(u64, Attempt)>,
    cooldown_until: Option<Instant>,
    next_id: u64,
}

pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    renewer: Arc<dyn TokenRenewer>,
    cooldown: Duration,
    state: Arc<Mutex<RefreshState>>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<TokenStore>, renewer: Arc<dyn TokenRenewer>, cooldown: Duration) -> Self {
        Self {
            store,
            renewer,
            cooldown,
            state: Arc::new(Mutex::new(RefreshState::default())),
        }
    }

    /// Renew the access credential, joining an attempt already in flight.
    ///
    /// Inside a cooldown window the failed attempt is still in the slot, so
    /// this fails at once with its error, without contacting the backend.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let attempt = {
            let mut state = lock(&self.state);
            match &state.in_flight {
                Some((id, attempt)) => {
                    debug!(attempt = id, "Joining in-flight renewal");
                    attempt.clone()
                }
                None => self.start(&mut state),
            }
        };
        attempt.await
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Time left before a new renewal may contact the backend.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = lock(&self.state).cooldown_until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    fn start(&self, state: &mut RefreshState) -> Attempt {
        let id = state.next_id;
        state.next_id += 1;
        info!(attempt = id, "Starting credential renewal");

        let store = Arc::clone(&self.store);
        let renewer = Arc::clone(&self.renewer);
        let shared_state = Arc::clone(&self.state);
        let cooldown = self.cooldown;

        // The caller holds the state lock, so settle() cannot run before the
        // slot below is populated.
        let handle = tokio::spawn(async move {
            let result = renew_once(&store, renewer.as_ref()).await;
            settle(&shared_state, id, &result, cooldown);
            result
        });

        let attempt = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Renewal task did not complete");
                    Err(RefreshError::Aborted)
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some((id, attempt.clone()));
        attempt
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("cooldown", &self.cooldown)
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cookie-backed attempt first; on "no session presented" fall back to the
/// stored refresh credential once.
async fn renew_once(store: &TokenStore, renewer: &dyn TokenRenewer) -> Result<(), RefreshError> {
    let epoch = store.epoch();
    let tokens = match renewer.renew(None).await {
        Ok(tokens) => tokens,
        Err(err) if err.is_missing_session() => match store.get_refresh() {
            Some(credential) => {
                debug!("No ambient session, renewing with stored refresh credential");
                renewer.renew(Some(&credential)).await?
            }
            None => return Err(err),
        },
        Err(err) => return Err(err),
    };
    apply(store, epoch, tokens)
}

fn apply(store: &TokenStore, epoch: u64, tokens: RenewedTokens) -> Result<(), RefreshError> {
    if store.apply_renewal(epoch, tokens.access, tokens.refresh) {
        Ok(())
    } else {
        Err(RefreshError::SessionCleared)
    }
}

fn settle(
    state: &Arc<Mutex<RefreshState>>,
    id: u64,
    result: &Result<(), RefreshError>,
    cooldown: Duration,
) {
    let mut guard = lock(state);
    match result {
        Ok(()) => {
            info!(attempt = id, "Credential renewal succeeded");
            guard.cooldown_until = None;
            release(&mut guard, id);
        }
        Err(RefreshError::SessionCleared) => {
            info!(attempt = id, "Session cleared during renewal, result discarded");
            release(&mut guard, id);
        }
        Err(err) => {
            warn!(attempt = id, error = %err, cooldown_ms = cooldown.as_millis() as u64, "Credential renewal failed");
            guard.cooldown_until = Some(Instant::now() + cooldown);
            drop(guard);

            let state = Arc::clone(state);
            tokio::spawn(async move {
                tokio::time::sleep(cooldown).await;
                release(&mut lock(&state), id);
            });
        }
    }
}

fn release(state: &mut RefreshState, id: u64) {
    if matches!(state.in_flight, Some((current, _)) if current == id) {
        state.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::auth::store::RefreshCredential;

    /// Renewer that replays scripted outcomes and counts calls.
    struct ScriptedRenewer {
        calls: AtomicUsize,
        explicit_calls: AtomicUsize,
        delay: Duration,
        script: Mutex<VecDeque<Result<RenewedTokens, RefreshError>>>,
    }

    impl ScriptedRenewer {
        fn new(delay: Duration, script: Vec<Result<RenewedTokens, RefreshError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                explicit_calls: AtomicUsize::new(0),
                delay,
                script: Mutex::new(script.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRenewer for ScriptedRenewer {
        async fn renew(
            &self,
            credential: Option<&RefreshCredential>,
        ) -> Result<RenewedTokens, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if credential.is_some() {
                self.explicit_calls.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(invalid()))
        }
    }

    fn tokens(access: &str, refresh: Option<&str>) -> Result<RenewedTokens, RefreshError> {
        Ok(RenewedTokens {
            access: access.to_string(),
            refresh: refresh.map(str::to_string),
        })
    }

    fn invalid() -> RefreshError {
        RefreshError::Rejected {
            status: 401,
            code: Some("token_not_valid".into()),
            detail: Some("Token is invalid or expired".into()),
        }
    }

    fn no_session() -> RefreshError {
        RefreshError::Rejected {
            status: 401,
            code: Some("no_session".into()),
            detail: None,
        }
    }

    fn coordinator(
        store: &Arc<TokenStore>,
        renewer: &Arc<ScriptedRenewer>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(
            Arc::clone(store),
            Arc::clone(renewer) as Arc<dyn TokenRenewer>,
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_attempt() {
        let store = Arc::new(TokenStore::with_credentials("old", None));
        let renewer = ScriptedRenewer::new(Duration::from_millis(100), vec![tokens("new", None)]);
        let coordinator = coordinator(&store, &renewer);

        let results = futures::future::join_all((0..10).map(|_| coordinator.refresh())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(renewer.calls(), 1);
        assert_eq!(store.get_access().unwrap().expose(), "new");
        assert!(!coordinator.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_failure() {
        let store = Arc::new(TokenStore::with_credentials("old", None));
        let renewer = ScriptedRenewer::new(Duration::from_millis(100), vec![Err(invalid())]);
        let coordinator = coordinator(&store, &renewer);

        let results = futures::future::join_all((0..5).map(|_| coordinator.refresh())).await;

        assert!(results.iter().all(|r| r.as_ref().unwrap_err() == &invalid()));
        assert_eq!(renewer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_releases_slot_immediately() {
        let store = Arc::new(TokenStore::with_credentials("old", None));
        let renewer = ScriptedRenewer::new(
            Duration::from_millis(10),
            vec![tokens("a1", None), tokens("a2", None)],
        );
        let coordinator = coordinator(&store, &renewer);

        coordinator.refresh().await.unwrap();
        coordinator.refresh().await.unwrap();

        assert_eq!(renewer.calls(), 2);
        assert_eq!(store.get_access().unwrap().expose(), "a2");
        assert!(coordinator.cooldown_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_rejects_without_backend_call() {
        let store = Arc::new(TokenStore::with_credentials("old", None));
        let renewer = ScriptedRenewer::new(
            Duration::from_millis(10),
            vec![Err(invalid()), tokens("fresh", None)],
        );
        let coordinator = coordinator(&store, &renewer);

        assert_eq!(coordinator.refresh().await.unwrap_err(), invalid());
        assert!(coordinator.cooldown_remaining().is_some());

        // Inside the window: the failed attempt is still held, so callers
        // get its error with no new call.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(coordinator.is_in_flight());
        assert_eq!(coordinator.refresh().await.unwrap_err(), invalid());
        assert_eq!(renewer.calls(), 1);

        // After the window: a fresh attempt goes out.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!coordinator.is_in_flight());
        coordinator.refresh().await.unwrap();
        assert_eq!(renewer.calls(), 2);
        assert_eq!(store.get_access().unwrap().expose(), "fresh");
        assert!(coordinator.cooldown_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_refresh_credential() {
        let store = Arc::new(TokenStore::with_credentials("old", Some("r1".into())));
        let renewer = ScriptedRenewer::new(
            Duration::from_millis(10),
            vec![Err(no_session()), tokens("a1", Some("r2"))],
        );
        let coordinator = coordinator(&store, &renewer);

        coordinator.refresh().await.unwrap();

        assert_eq!(renewer.calls(), 2);
        assert_eq!(renewer.explicit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_access().unwrap().expose(), "a1");
        assert_eq!(store.get_refresh().unwrap().expose(), "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fallback_without_refresh_credential() {
        let store = Arc::new(TokenStore::with_credentials("old", None));
        let renewer = ScriptedRenewer::new(Duration::from_millis(10), vec![Err(no_session())]);
        let coordinator = coordinator(&store, &renewer);

        assert_eq!(coordinator.refresh().await.unwrap_err(), no_session());
        assert_eq!(renewer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_session_does_not_fall_back() {
        let store = Arc::new(TokenStore::with_credentials("old", Some("r1".into())));
        let renewer = ScriptedRenewer::new(Duration::from_millis(10), vec![Err(invalid())]);
        let coordinator = coordinator(&store, &renewer);

        assert!(coordinator.refresh().await.is_err());
        assert_eq!(renewer.calls(), 1);
        assert_eq!(renewer.explicit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_renewal_discards_result() {
        let store = Arc::new(TokenStore::with_credentials("old", Some("r1".into())));
        let renewer = ScriptedRenewer::new(
            Duration::from_millis(100),
            vec![tokens("stale", Some("r2")), tokens("next", None)],
        );
        let coordinator = Arc::new(coordinator(&store, &renewer));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.clear();

        assert_eq!(waiter.await.unwrap().unwrap_err(), RefreshError::SessionCleared);
        assert!(store.get_access().is_none());
        assert!(store.get_refresh().is_none());
        assert!(!coordinator.is_in_flight());
        assert!(coordinator.cooldown_remaining().is_none());

        // The next session renews right away.
        store.set_access("fresh-login");
        coordinator.refresh().await.unwrap();
        assert_eq!(store.get_access().unwrap().expose(), "next");
        assert_eq!(renewer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_cancel_attempt() {
        let store = Arc::new(TokenStore::with_credentials("old", None));
        let renewer = ScriptedRenewer::new(Duration::from_millis(100), vec![tokens("new", None)]);
        let coordinator = Arc::new(coordinator(&store, &renewer));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get_access().unwrap().expose(), "new");
        assert!(!coordinator.is_in_flight());
        assert_eq!(renewer.calls(), 1);
    }
}
