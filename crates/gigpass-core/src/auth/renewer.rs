//! Transport for the renewal endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::RefreshError;
use super::store::RefreshCredential;

/// Fresh credentials returned by a successful renewal.
#[derive(Clone, Deserialize)]
pub struct RenewedTokens {
    #[serde(alias = "access_token")]
    pub access: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh: Option<String>,
}

impl std::fmt::Debug for RenewedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewedTokens")
            .field("rotated_refresh", &self.refresh.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RenewalRejection {
    code: Option<String>,
    detail: Option<String>,
}

#[derive(Serialize)]
struct RenewalBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh: Option<&'a str>,
}

/// One round-trip to the renewal endpoint.
///
/// `credential` is `None` for the attempt that relies on the ambient session
/// (the refresh cookie) and `Some` for the explicit fallback.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(
        &self,
        credential: Option<&RefreshCredential>,
    ) -> Result<RenewedTokens, RefreshError>;
}

/// Renewer that posts to `/token/refresh/`.
///
/// Build it from the same `reqwest::Client` the API client uses so the
/// cookie jar holding the session proof is shared.
#[derive(Debug, Clone)]
pub struct HttpRenewer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRenewer {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TokenRenewer for HttpRenewer {
    async fn renew(
        &self,
        credential: Option<&RefreshCredential>,
    ) -> Result<RenewedTokens, RefreshError> {
        let body = RenewalBody {
            refresh: credential.map(|c| c.expose()),
        };
        debug!(explicit = credential.is_some(), "Posting renewal request");

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(RefreshError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(RefreshError::from_reqwest)?;

        if !status.is_success() {
            let rejection: RenewalRejection = serde_json::from_str(&text).unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                code: rejection.code,
                detail: rejection.detail,
            });
        }

        let tokens: RenewedTokens = serde_json::from_str(&text)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        if tokens.access.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "renewal response carried an empty access credential".to_string(),
            ));
        }
        Ok(tokens)
    }
}
