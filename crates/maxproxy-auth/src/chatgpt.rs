//! OpenAI (ChatGPT Plus/Pro) subscription OAuth.
//!
//! Standard authorization-code flow against auth.openai.com with a refresh
//! token. The ChatGPT account id rides inside JWT claims and is required by
//! the Codex Responses backend as a request header.

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::jwt;
use crate::pkce::{generate_pkce, PkceStore};
use crate::store::{TokenBundle, TokenStore, TokenType};

const OAUTH_ISSUER: &str = "https://auth.openai.com";
const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const REDIRECT_URI: &str = "http://localhost:1455/auth/callback";
const SCOPES: &str = "openid profile email offline_access";

/// Refresh when the access token expires within this window.
const EXPIRY_WINDOW_SECS: i64 = 5 * 60;
/// Refresh when the last refresh is older than this.
const STALE_REFRESH_SECS: i64 = 55 * 60;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

pub struct ChatGptOauth {
    client: reqwest::Client,
    store: TokenStore,
    pkce: PkceStore,
    token_base: String,
}

impl ChatGptOauth {
    pub fn new(store: TokenStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
            pkce: PkceStore::chatgpt_default(),
            token_base: OAUTH_ISSUER.to_string(),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Build the authorize URL and persist PKCE state.
    pub fn authorize_url(&self) -> Result<String, AuthError> {
        let pair = generate_pkce();
        self.pkce.persist(&pair.verifier, &pair.verifier)?;

        let url = format!(
            "{}/oauth/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}&id_token_add_organizations=true&codex_cli_simplified_flow=true",
            self.token_base,
            CLIENT_ID,
            urlencoding::encode(REDIRECT_URI),
            urlencoding::encode(SCOPES),
            pair.challenge,
            pair.verifier,
        );
        Ok(url)
    }

    /// Exchange an authorization code for tokens and persist them.
    pub async fn exchange(&self, code: &str) -> Result<TokenBundle, AuthError> {
        let (verifier, _state) = self.pkce.load().ok_or(AuthError::MissingPkce)?;

        let body = format!(
            "grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&code_verifier={}",
            urlencoding::encode(code),
            urlencoding::encode(REDIRECT_URI),
            CLIENT_ID,
            urlencoding::encode(&verifier),
        );

        let token = self.post_token(body).await?;
        let refresh_token = token.refresh_token.ok_or_else(|| {
            AuthError::MalformedResponse("exchange response missing refresh_token".into())
        })?;

        let bundle = bundle_from_tokens(token.access_token, refresh_token, token.id_token);
        self.store.save(&bundle)?;
        self.pkce.clear();
        info!("ChatGPT OAuth tokens obtained");
        Ok(bundle)
    }

    /// Refresh the stored tokens. Keeps the previous refresh token when the
    /// response omits one.
    pub async fn refresh(&self) -> Result<TokenBundle, AuthError> {
        let current = self.store.load().ok_or(AuthError::Absent)?;
        let refresh_token = current.refresh_token.clone().ok_or(AuthError::Expired)?;

        info!("refreshing ChatGPT OAuth tokens");
        let body = format!(
            "grant_type=refresh_token&refresh_token={}&client_id={}&scope={}",
            urlencoding::encode(&refresh_token),
            CLIENT_ID,
            urlencoding::encode("openid profile email"),
        );

        let token = self.post_token(body).await?;
        let bundle = bundle_from_tokens(
            token.access_token,
            token.refresh_token.unwrap_or(refresh_token),
            token.id_token.or(current.id_token),
        );
        self.store.save(&bundle)?;
        Ok(bundle)
    }

    /// `(access_token, account_id)` for outbound Codex requests, refreshing
    /// when stale. The account id may be absent when the claims are missing.
    pub async fn valid_credentials(&self) -> Result<(String, Option<String>), AuthError> {
        let bundle = self.store.load().ok_or(AuthError::Absent)?;

        if !should_refresh(&bundle) {
            return Ok((bundle.access_token.clone(), bundle.account_id));
        }

        info!("ChatGPT access token stale, attempting refresh");
        match self.refresh().await {
            Ok(refreshed) => Ok((refreshed.access_token.clone(), refreshed.account_id)),
            Err(e) => {
                warn!(error = %e, "ChatGPT token refresh failed");
                Err(AuthError::Expired)
            }
        }
    }

    async fn post_token(&self, body: String) -> Result<TokenResponse, AuthError> {
        let resp = self
            .client
            .post(format!("{}/oauth/token", self.token_base))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "ChatGPT token endpoint error");
            return Err(AuthError::Upstream { status, body });
        }

        resp.json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

/// Refresh when the JWT `exp` is within 5 minutes OR the last refresh is at
/// least 55 minutes old.
pub fn should_refresh(bundle: &TokenBundle) -> bool {
    let now = chrono::Utc::now().timestamp();

    if let Some(exp) = jwt::expiry(&bundle.access_token) {
        if exp <= now + EXPIRY_WINDOW_SECS {
            return true;
        }
    }

    if let Some(last_refresh) = bundle.last_refresh.as_deref() {
        if let Ok(at) = chrono::DateTime::parse_from_rfc3339(last_refresh) {
            if at.timestamp() <= now - STALE_REFRESH_SECS {
                return true;
            }
        }
    }

    false
}

fn bundle_from_tokens(
    access_token: String,
    refresh_token: String,
    id_token: Option<String>,
) -> TokenBundle {
    // Prefer the id_token claim namespace; Codex access tokens carry the id
    // under a different namespace.
    let account_id = id_token
        .as_deref()
        .and_then(jwt::account_id_from_id_token)
        .or_else(|| jwt::account_id_from_access_token(&access_token));

    let expires_at = jwt::expiry(&access_token)
        .unwrap_or_else(|| chrono::Utc::now().timestamp() + 3600);

    TokenBundle {
        token_type: TokenType::OauthFlow,
        access_token,
        refresh_token: Some(refresh_token),
        id_token,
        account_id,
        expires_at,
        last_refresh: Some(chrono::Utc::now().to_rfc3339()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn jwt_with(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    fn bundle(access_token: String, last_refresh: Option<String>) -> TokenBundle {
        TokenBundle {
            token_type: TokenType::OauthFlow,
            access_token,
            refresh_token: Some("r".to_string()),
            id_token: None,
            account_id: None,
            expires_at: chrono::Utc::now().timestamp() + 3600,
            last_refresh,
        }
    }

    #[test]
    fn fresh_token_needs_no_refresh() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let b = bundle(
            jwt_with(serde_json::json!({ "exp": exp })),
            Some(chrono::Utc::now().to_rfc3339()),
        );
        assert!(!should_refresh(&b));
    }

    #[test]
    fn near_expiry_triggers_refresh() {
        let exp = chrono::Utc::now().timestamp() + 60;
        let b = bundle(
            jwt_with(serde_json::json!({ "exp": exp })),
            Some(chrono::Utc::now().to_rfc3339()),
        );
        assert!(should_refresh(&b));
    }

    #[test]
    fn stale_last_refresh_triggers_refresh() {
        let exp = chrono::Utc::now().timestamp() + 7200;
        let stale = chrono::Utc::now() - chrono::Duration::minutes(56);
        let b = bundle(
            jwt_with(serde_json::json!({ "exp": exp })),
            Some(stale.to_rfc3339()),
        );
        assert!(should_refresh(&b));
    }

    #[test]
    fn non_jwt_access_token_with_recent_refresh_is_kept() {
        // opaque token: no exp claim to inspect, last_refresh is recent
        let b = bundle("opaque".to_string(), Some(chrono::Utc::now().to_rfc3339()));
        assert!(!should_refresh(&b));
    }

    #[test]
    fn bundle_extracts_account_id_from_id_token() {
        let id_token = jwt_with(serde_json::json!({
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct_42" }
        }));
        let b = bundle_from_tokens("opaque".to_string(), "r".to_string(), Some(id_token));
        assert_eq!(b.account_id.as_deref(), Some("acct_42"));
    }

    #[test]
    fn bundle_falls_back_to_access_token_claims() {
        let access = jwt_with(serde_json::json!({
            "https://claims.chatgpt.com": { "chatgpt_account_id": "acct_7" },
            "exp": 4_102_444_800_i64,
        }));
        let b = bundle_from_tokens(access, "r".to_string(), None);
        assert_eq!(b.account_id.as_deref(), Some("acct_7"));
        assert_eq!(b.expires_at, 4_102_444_800);
    }

    #[test]
    fn missing_claims_leave_account_id_absent() {
        let b = bundle_from_tokens("opaque".to_string(), "r".to_string(), None);
        assert!(b.account_id.is_none());
    }

    #[test]
    fn authorize_url_includes_codex_flow_params() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        let mut client = ChatGptOauth::new(store);
        client.pkce = PkceStore::new(dir.path().join("pkce.json"));

        let url = client.authorize_url().unwrap();
        assert!(url.contains("id_token_add_organizations=true"));
        assert!(url.contains("codex_cli_simplified_flow=true"));
        assert!(url.contains("code_challenge_method=S256"));
    }
}
