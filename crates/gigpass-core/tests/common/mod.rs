#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gigpass_core::auth::Notifier;
use gigpass_core::{ApiClient, Config, MemoryNavigator, Navigator};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OLD_ACCESS: &str = "old-access";
pub const NEW_ACCESS: &str = "new-access";

/// Short enough to wait out inside a test.
pub const COOLDOWN: Duration = Duration::from_millis(300);
pub const REDIRECT_DELAY: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub struct Harness {
    pub server: MockServer,
    pub client: ApiClient,
    pub navigator: Arc<MemoryNavigator>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Client on `location`, logged in with an access credential the server
    /// will reject and the refresh credential `r1`.
    pub async fn start(location: &str) -> Self {
        let server = MockServer::start().await;

        let mut config = Config::for_base_url(server.uri());
        config.refresh_cooldown_ms = COOLDOWN.as_millis() as u64;
        config.expiry_redirect_delay_ms = REDIRECT_DELAY.as_millis() as u64;

        let navigator = Arc::new(MemoryNavigator::new(location));
        let notifier = Arc::new(RecordingNotifier::default());
        let client = ApiClient::builder(config)
            .navigator(Arc::clone(&navigator) as Arc<dyn Navigator>)
            .notifier(Arc::clone(&notifier) as Arc<dyn Notifier>)
            .build()
            .unwrap();
        client.establish_session(OLD_ACCESS, Some("r1".to_string()));

        Self {
            server,
            client,
            navigator,
            notifier,
        }
    }

    /// Let the delayed redirect run.
    pub async fn settle(&self) {
        tokio::time::sleep(REDIRECT_DELAY * 4).await;
    }

    pub async fn mount_refresh_success(&self, expected_calls: u64, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/token/refresh/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access": NEW_ACCESS }))
                    .set_delay(delay),
            )
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh_invalid(&self, expected_calls: u64, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/token/refresh/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({
                        "code": "token_not_valid",
                        "detail": "Token is invalid or expired"
                    }))
                    .set_delay(delay),
            )
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// `GET route` answers 200 for the renewed credential and 401 otherwise.
    pub async fn mount_protected(&self, route: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .and(wiremock::matchers::header(
                "authorization",
                format!("Bearer {}", NEW_ACCESS).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .with_priority(1)
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(401))
            .mount(&self.server)
            .await;
    }
}
