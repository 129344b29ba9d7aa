//! Anthropic (Claude Pro/Max) subscription OAuth.
//!
//! Authorization happens on claude.ai, token exchange and refresh on
//! console.anthropic.com. Access tokens are used as Bearer credentials
//! against the Messages API. A second flow requests a one-year "long-term"
//! token (scope `user:inference` only) which carries no refresh token.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::pkce::{generate_pkce, PkceStore};
use crate::store::{TokenBundle, TokenStore, TokenType};

const AUTH_BASE_AUTHORIZE: &str = "https://claude.ai";
const AUTH_BASE_TOKEN: &str = "https://console.anthropic.com";
const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
const SCOPES: &str = "org:create_api_key user:profile user:inference";
/// The profile/create_api_key scopes refuse a custom expiry; long-term
/// tokens must request inference only.
const LONG_TERM_SCOPE: &str = "user:inference";
const ONE_YEAR_SECS: i64 = 31_536_000;
const LONG_TERM_TOKEN_PREFIX: &str = "sk-ant-oat01-";

/// True for tokens in the long-term OAuth format (`sk-ant-oat01-...`).
pub fn is_long_term_token_format(token: &str) -> bool {
    token.starts_with(LONG_TERM_TOKEN_PREFIX)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

pub struct AnthropicOauth {
    client: reqwest::Client,
    store: TokenStore,
    pkce: PkceStore,
    token_base: String,
}

impl AnthropicOauth {
    pub fn new(store: TokenStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
            pkce: PkceStore::anthropic_default(),
            token_base: AUTH_BASE_TOKEN.to_string(),
        }
    }

    /// Override the token host (tests).
    #[cfg(test)]
    fn with_token_base(mut self, base: &str) -> Self {
        self.token_base = base.to_string();
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Build the authorize URL and persist PKCE state for the exchange step.
    ///
    /// The state parameter equals the verifier. `long_term` switches to the
    /// inference-only scope so the exchange may request a one-year expiry.
    pub fn authorize_url(&self, long_term: bool) -> Result<String, AuthError> {
        let pair = generate_pkce();
        self.pkce.persist(&pair.verifier, &pair.verifier)?;

        let scope = if long_term { LONG_TERM_SCOPE } else { SCOPES };
        let url = format!(
            "{}/oauth/authorize?code=true&client_id={}&response_type=code&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
            AUTH_BASE_AUTHORIZE,
            CLIENT_ID,
            urlencoding::encode(REDIRECT_URI),
            urlencoding::encode(scope),
            pair.challenge,
            pair.verifier,
        );
        Ok(url)
    }

    /// Exchange an authorization code for tokens and persist them.
    ///
    /// Codes arrive pasted from the browser as `code#state`; the fragment
    /// after `#` overrides the saved state when present.
    pub async fn exchange(&self, code: &str, long_term: bool) -> Result<TokenBundle, AuthError> {
        let (actual_code, code_state) = match code.split_once('#') {
            Some((c, s)) => (c, Some(s)),
            None => (code, None),
        };

        let (verifier, saved_state) = self.pkce.load().ok_or(AuthError::MissingPkce)?;
        let state = code_state.unwrap_or(&saved_state);

        let mut body = json!({
            "code": actual_code,
            "state": state,
            "grant_type": "authorization_code",
            "client_id": CLIENT_ID,
            "redirect_uri": REDIRECT_URI,
            "code_verifier": verifier,
        });
        if long_term {
            body["expires_in"] = json!(ONE_YEAR_SECS);
        }

        let resp = self
            .client
            .post(format!("{}/v1/oauth/token", self.token_base))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "Anthropic token exchange failed");
            return Err(AuthError::Upstream { status, body });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let bundle = if long_term {
            info!("long-term OAuth token obtained");
            TokenBundle {
                token_type: TokenType::LongTerm,
                access_token: token.access_token,
                refresh_token: None,
                id_token: None,
                account_id: None,
                expires_at: now() + token.expires_in.unwrap_or(ONE_YEAR_SECS),
                last_refresh: Some(now_iso()),
            }
        } else {
            let refresh_token = token.refresh_token.ok_or_else(|| {
                AuthError::MalformedResponse("exchange response missing refresh_token".into())
            })?;
            info!("OAuth tokens obtained, storing for Bearer authentication");
            TokenBundle {
                token_type: TokenType::OauthFlow,
                access_token: token.access_token,
                refresh_token: Some(refresh_token),
                id_token: None,
                account_id: None,
                expires_at: now() + token.expires_in.unwrap_or(3600),
                last_refresh: Some(now_iso()),
            }
        };

        self.store.save(&bundle)?;
        self.pkce.clear();
        Ok(bundle)
    }

    /// Refresh the stored oauth_flow token. Long-term tokens are never
    /// refreshable.
    pub async fn refresh(&self) -> Result<TokenBundle, AuthError> {
        let current = self.store.load().ok_or(AuthError::Absent)?;
        if current.is_long_term() {
            return Err(AuthError::LongTermRefresh);
        }
        let refresh_token = current.refresh_token.ok_or(AuthError::Expired)?;

        info!("refreshing Anthropic OAuth tokens");
        let resp = self
            .client
            .post(format!("{}/v1/oauth/token", self.token_base))
            .header("Content-Type", "application/json")
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": CLIENT_ID,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "Anthropic token refresh failed");
            return Err(AuthError::Upstream { status, body });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        let refresh_token = token.refresh_token.ok_or_else(|| {
            AuthError::MalformedResponse("refresh response missing refresh_token".into())
        })?;

        let bundle = TokenBundle {
            token_type: TokenType::OauthFlow,
            access_token: token.access_token,
            refresh_token: Some(refresh_token),
            id_token: None,
            account_id: None,
            expires_at: now() + token.expires_in.unwrap_or(3600),
            last_refresh: Some(now_iso()),
        };
        self.store.save(&bundle)?;
        Ok(bundle)
    }

    /// A valid Bearer token for outbound requests, refreshing when needed.
    ///
    /// Long-term tokens are returned until expiry and then reported expired;
    /// oauth_flow tokens refresh automatically. A failed refresh surfaces as
    /// `Expired` — the caller turns that into a 401, never a retry loop.
    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        let bundle = self.store.load().ok_or(AuthError::Absent)?;

        if bundle.is_long_term() {
            if bundle.is_expired() {
                warn!("long-term token has expired; generate a new token");
                return Err(AuthError::Expired);
            }
            return Ok(bundle.access_token);
        }

        if !bundle.is_expired() {
            return Ok(bundle.access_token);
        }

        info!("access token expired, attempting automatic refresh");
        match self.refresh().await {
            Ok(refreshed) => Ok(refreshed.access_token),
            Err(e) => {
                warn!(error = %e, "automatic token refresh failed");
                Err(AuthError::Expired)
            }
        }
    }

    /// Seed the store with a long-term token from the environment
    /// (headless mode).
    pub fn seed_long_term(&self, access_token: &str) -> Result<(), AuthError> {
        let bundle = TokenBundle {
            token_type: TokenType::LongTerm,
            access_token: access_token.to_string(),
            refresh_token: None,
            id_token: None,
            account_id: None,
            expires_at: now() + ONE_YEAR_SECS,
            last_refresh: Some(now_iso()),
        };
        self.store.save(&bundle)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth() -> (tempfile::TempDir, AnthropicOauth) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        let mut client = AnthropicOauth::new(store).with_token_base("http://127.0.0.1:1");
        client.pkce = PkceStore::new(dir.path().join("pkce.json"));
        (dir, client)
    }

    #[test]
    fn long_term_format_detection() {
        assert!(is_long_term_token_format("sk-ant-oat01-abc123"));
        assert!(!is_long_term_token_format("sk-ant-api03-abc123"));
        assert!(!is_long_term_token_format(""));
    }

    #[test]
    fn authorize_url_carries_pkce_and_state() {
        let (_dir, client) = oauth();
        let url = client.authorize_url(false).unwrap();

        assert!(url.starts_with("https://claude.ai/oauth/authorize?code=true"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("client_id=9d1c250a-e61b-44d9-88ed-5944d1962f5e"));

        // state equals the persisted verifier
        let (verifier, state) = client.pkce.load().unwrap();
        assert_eq!(verifier, state);
        assert!(url.ends_with(&format!("state={verifier}")));
    }

    #[test]
    fn long_term_authorize_url_uses_inference_scope() {
        let (_dir, client) = oauth();
        let url = client.authorize_url(true).unwrap();
        assert!(url.contains("scope=user%3Ainference"));
        assert!(!url.contains("org%3Acreate_api_key"));
    }

    #[tokio::test]
    async fn exchange_without_pkce_state_fails() {
        let (_dir, client) = oauth();
        let err = client.exchange("somecode", false).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingPkce));
    }

    #[tokio::test]
    async fn refresh_refuses_long_term_tokens() {
        let (_dir, client) = oauth();
        client.seed_long_term("sk-ant-oat01-seeded").unwrap();
        let err = client.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::LongTermRefresh));
    }

    #[tokio::test]
    async fn valid_token_reports_absent_without_store() {
        let (_dir, client) = oauth();
        let err = client.valid_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Absent));
    }

    #[tokio::test]
    async fn seeded_long_term_token_is_served_until_expiry() {
        let (_dir, client) = oauth();
        client.seed_long_term("sk-ant-oat01-seeded").unwrap();
        let token = client.valid_access_token().await.unwrap();
        assert_eq!(token, "sk-ant-oat01-seeded");
    }
}
