use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::models::TokenResponse;
use super::SpotifyError;

/// Tokens are refreshed this long before the service says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// How the client obtains bearer tokens.
#[derive(Debug, Clone)]
pub enum SpotifyAuth {
    /// A pre-issued access token, used as-is until it stops working.
    Static(String),
    /// Refresh-token grant against the accounts service.
    Refresh(SpotifyCredentials),
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct TokenState {
    current: Option<CachedToken>,
    /// Set when the accounts service hands back a new refresh token.
    rotated_refresh_token: Option<String>,
}

pub(crate) struct TokenCache {
    auth: SpotifyAuth,
    token_url: String,
    state: Mutex<TokenState>,
}

impl TokenCache {
    pub fn new(auth: SpotifyAuth, token_url: String) -> Self {
        Self {
            auth,
            token_url,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Returns a valid access token, refreshing it when close to expiry.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String, SpotifyError> {
        let credentials = match &self.auth {
            SpotifyAuth::Static(token) => return Ok(token.clone()),
            SpotifyAuth::Refresh(credentials) => credentials,
        };

        let mut state = self.state.lock().await;
        if let Some(token) = state.current.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }
        let refresh_token = state
            .rotated_refresh_token
            .clone()
            .unwrap_or_else(|| credentials.refresh_token.clone());

        let response = http
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|err| SpotifyError::Auth(format!("token request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SpotifyError::Auth(format!("token response unreadable: {err}")))?;
        if !status.is_success() {
            return Err(SpotifyError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| SpotifyError::Auth(format!("token response malformed: {err}")))?;
        if token.refresh_token.is_some() {
            state.rotated_refresh_token = token.refresh_token;
        }

        let access_token = token.access_token.clone();
        state.current = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        log::info!("Refreshed streaming API access token (expires in {}s)", token.expires_in);

        Ok(access_token)
    }

    /// Forgets the cached token so the next call refreshes it.
    pub async fn invalidate(&self) {
        self.state.lock().await.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_is_used_as_is() {
        let cache = TokenCache::new(
            SpotifyAuth::Static("abc".to_string()),
            "http://127.0.0.1:9/unused".to_string(),
        );
        let http = reqwest::Client::new();
        assert_eq!(cache.access_token(&http).await.unwrap(), "abc");
        cache.invalidate().await;
        assert_eq!(cache.access_token(&http).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_an_auth_error() {
        let cache = TokenCache::new(
            SpotifyAuth::Refresh(SpotifyCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                refresh_token: "refresh".to_string(),
            }),
            "http://127.0.0.1:9/api/token".to_string(),
        );
        let http = reqwest::Client::new();
        assert!(matches!(
            cache.access_token(&http).await,
            Err(SpotifyError::Auth(_))
        ));
    }
}
