use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::error::{BillingError, BillingResult};
use crate::core::token_store::{Token, TokenStore};

/// Lifetime assumed when the identity provider omits expiry information.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Service principal used for the client-credentials grant.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_on: Option<Value>,
    expires_in: Option<Value>,
}

/// Seconds from a JSON number or numeric string; the identity provider
/// returns both depending on the endpoint version.
fn json_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn token_expiry(
    expires_on: Option<&Value>,
    expires_in: Option<&Value>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if let Some(at) = expires_on
        .and_then(json_seconds)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    {
        return at;
    }
    let lifetime = expires_in
        .and_then(json_seconds)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    now + chrono::Duration::seconds(lifetime)
}

/// Obtains and caches the bearer token for the management API.
///
/// The in-memory slot is guarded by an async mutex, so concurrent callers
/// wait on a single refresh instead of each issuing a grant request.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    resource: String,
    credentials: Credentials,
    store: TokenStore,
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        authority_url: &str,
        resource: &str,
        credentials: Credentials,
        store: TokenStore,
        timeout: Duration,
    ) -> BillingResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let token_url = format!(
            "{}/{}/oauth2/token",
            authority_url.trim_end_matches('/'),
            credentials.tenant_id
        );
        Ok(Self {
            http,
            token_url,
            resource: format!("{}/", resource.trim_end_matches('/')),
            credentials,
            store,
            current: Mutex::new(None),
        })
    }

    /// Return a valid bearer token, reusing the cached one while it has not
    /// expired.
    pub async fn get_token(&self) -> BillingResult<String> {
        let mut current = self.current.lock().await;
        let now = Utc::now();

        if let Some(token) = current.as_ref().filter(|t| t.is_valid_at(now)) {
            return Ok(token.access_token.clone());
        }

        if let Some(token) = self.store.load() {
            if token.is_valid_at(now) {
                tracing::info!(expires_at = %token.expires_at, "Using cached token");
                let value = token.access_token.clone();
                *current = Some(token);
                return Ok(value);
            }
            tracing::debug!(expires_at = %token.expires_at, "Cached token expired");
        }

        tracing::info!("Fetching new token");
        let token = self.request_token().await?;
        if let Err(e) = self.store.save(&token) {
            tracing::warn!(error = %e, "Failed to persist token");
        }
        let value = token.access_token.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Drop the in-memory token and delete the persisted token and key.
    pub async fn invalidate(&self) -> BillingResult<bool> {
        self.current.lock().await.take();
        self.store.clear()
    }

    async fn request_token(&self) -> BillingResult<Token> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("resource", self.resource.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| BillingError::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Token request rejected");
            return Err(BillingError::Auth(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Auth(format!("invalid token response: {}", e)))?;

        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BillingError::Auth("token response has no access_token".into()))?;

        Ok(Token {
            access_token,
            expires_at: token_expiry(data.expires_on.as_ref(), data.expires_in.as_ref(), Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TENANT: &str = "tenant-123";

    fn credentials() -> Credentials {
        Credentials {
            tenant_id: TENANT.into(),
            client_id: "client-abc".into(),
            client_secret: "s3cret".into(),
        }
    }

    fn manager(server: &MockServer, store: TokenStore) -> TokenManager {
        TokenManager::new(
            &server.uri(),
            "https://management.azure.com",
            credentials(),
            store,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn token_response(value: &str) -> ResponseTemplate {
        let expires_on = (Utc::now() + chrono::Duration::hours(1)).timestamp().to_string();
        ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": "3599",
            "expires_on": expires_on,
            "access_token": value,
        }))
    }

    fn token_path() -> String {
        format!("/{TENANT}/oauth2/token")
    }

    #[tokio::test]
    async fn cached_unexpired_token_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(token_response("fresh"))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .save(&Token {
                access_token: "cached".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .unwrap();

        let token = manager(&server, store).get_token().await.unwrap();
        assert_eq!(token, "cached");
    }

    #[tokio::test]
    async fn expired_token_triggers_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-abc"))
            .and(body_string_contains("resource=https%3A%2F%2Fmanagement.azure.com%2F"))
            .respond_with(token_response("fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .save(&Token {
                access_token: "stale".into(),
                expires_at: Utc::now() - chrono::Duration::hours(1),
            })
            .unwrap();

        let mgr = manager(&server, store.clone());
        assert_eq!(mgr.get_token().await.unwrap(), "fresh");
        // Second call is served from memory.
        assert_eq!(mgr.get_token().await.unwrap(), "fresh");
        assert_eq!(store.load().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn rejected_credentials_are_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = manager(&server, TokenStore::new(dir.path()))
            .get_token()
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Auth(ref m) if m.contains("401")));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn missing_access_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "expires_in": 10 })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = manager(&server, TokenStore::new(dir.path()))
            .get_token()
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Auth(_)));
    }

    #[tokio::test]
    async fn rotated_key_falls_back_to_fresh_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(token_response("fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .save(&Token {
                access_token: "cached".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .unwrap();
        let rotated = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        std::fs::write(store.key_path(), rotated).unwrap();

        let token = manager(&server, store).get_token().await.unwrap();
        assert_eq!(token, "fresh");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(token_response("fresh").set_delay(Duration::from_millis(50)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(&server, TokenStore::new(dir.path())));
        let calls = (0..8).map(|_| {
            let mgr = mgr.clone();
            async move { mgr.get_token().await }
        });
        let results = futures::future::join_all(calls).await;
        assert!(results.into_iter().all(|r| r.unwrap() == "fresh"));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(token_response("fresh"))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let mgr = manager(&server, store.clone());
        mgr.get_token().await.unwrap();
        assert!(mgr.invalidate().await.unwrap());
        assert!(!store.token_path().exists());
        assert!(!store.key_path().exists());
        mgr.get_token().await.unwrap();
    }

    #[test]
    fn token_expiry_prefers_expires_on() {
        let now = Utc::now();
        let at = token_expiry(Some(&json!("1710000000")), Some(&json!(60)), now);
        assert_eq!(at.timestamp(), 1_710_000_000);
        let at = token_expiry(Some(&json!(1710000000)), None, now);
        assert_eq!(at.timestamp(), 1_710_000_000);
    }

    #[test]
    fn token_expiry_falls_back_to_expires_in_then_default() {
        let now = Utc::now();
        assert_eq!(token_expiry(None, Some(&json!("120")), now), now + chrono::Duration::seconds(120));
        assert_eq!(
            token_expiry(Some(&json!("soon")), None, now),
            now + chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
        );
    }
}
