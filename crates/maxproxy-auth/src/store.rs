//! Persistent token storage with owner-only file permissions.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AuthError;

/// Leading skew applied to expiry checks so a token is never used in its
/// final seconds.
const EXPIRY_SKEW_SECS: i64 = 5;

/// Classification of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Standard OAuth flow token with a paired refresh token.
    OauthFlow,
    /// Long-term token (multi-month expiry, no refresh token); must be
    /// regenerated interactively once it expires.
    LongTerm,
}

impl Default for TokenType {
    fn default() -> Self {
        TokenType::OauthFlow
    }
}

/// One provider's OAuth credentials as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Legacy files predate this field; they are oauth_flow tokens.
    #[serde(default)]
    pub token_type: TokenType,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Absolute UNIX seconds.
    pub expires_at: i64,
    /// ISO-8601 timestamp of the last successful exchange or refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<String>,
}

impl TokenBundle {
    pub fn is_long_term(&self) -> bool {
        self.token_type == TokenType::LongTerm
    }

    /// Expired, with the leading skew applied.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at - EXPIRY_SKEW_SECS
    }
}

/// Status snapshot without exposing secrets.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub has_tokens: bool,
    pub is_expired: bool,
    pub expires_at: Option<String>,
    pub time_remaining: String,
    pub token_type: Option<TokenType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// JSON-file token store. The parent directory is created 0700 and the file
/// written 0600 on unix; writes go through a temp file + rename so readers
/// never observe a partial bundle.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.anthropic-claude-max-proxy/tokens.json`
    pub fn anthropic_default() -> Self {
        Self::new(home_join(".anthropic-claude-max-proxy").join("tokens.json"))
    }

    /// `~/.chatgpt-local/tokens.json`
    pub fn chatgpt_default() -> Self {
        Self::new(home_join(".chatgpt-local").join("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, bundle: &TokenBundle) -> Result<(), AuthError> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !parent.exists() {
            fs::create_dir_all(&parent)?;
            set_mode(&parent, 0o700)?;
        }

        let data = serde_json::to_string_pretty(bundle)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        set_mode(&tmp, 0o600)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load the stored bundle. A missing or unreadable file is reported as
    /// absent, never as an error.
    pub fn load(&self) -> Option<TokenBundle> {
        let data = match fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read token file");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "invalid token file");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Access token if present and not expired.
    pub fn valid_access_token(&self) -> Option<String> {
        let bundle = self.load()?;
        if bundle.is_expired() {
            None
        } else {
            Some(bundle.access_token)
        }
    }

    pub fn status(&self) -> TokenStatus {
        let Some(bundle) = self.load() else {
            return TokenStatus {
                has_tokens: false,
                is_expired: true,
                expires_at: None,
                time_remaining: "No tokens".to_string(),
                token_type: None,
                account_id: None,
            };
        };

        let now = Utc::now().timestamp();
        let expires_at = Utc
            .timestamp_opt(bundle.expires_at, 0)
            .single()
            .map(|t| t.to_rfc3339());

        let time_remaining = if now >= bundle.expires_at {
            format_elapsed(now - bundle.expires_at)
        } else {
            format_remaining(bundle.expires_at - now, bundle.is_long_term())
        };

        TokenStatus {
            has_tokens: true,
            is_expired: bundle.is_expired(),
            expires_at,
            time_remaining,
            token_type: Some(bundle.token_type),
            account_id: bundle.account_id,
        }
    }
}

fn home_join(dir: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(dir)
}

fn format_elapsed(secs: i64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {mins}m ago")
    } else {
        format!("{mins}m ago")
    }
}

fn format_remaining(secs: i64, long_term: bool) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let days = hours / 24;
    if long_term && days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("tokens.json"));
        (dir, store)
    }

    fn bundle(expires_in: i64) -> TokenBundle {
        TokenBundle {
            token_type: TokenType::OauthFlow,
            access_token: "sk-ant-oat-test".to_string(),
            refresh_token: Some("refresh".to_string()),
            id_token: None,
            account_id: None,
            expires_at: Utc::now().timestamp() + expires_in,
            last_refresh: Some(Utc::now().to_rfc3339()),
        }
    }

    #[test]
    fn missing_file_loads_as_absent() {
        let (_dir, store) = store();
        assert!(store.load().is_none());
        assert!(!store.status().has_tokens);
    }

    #[test]
    fn save_load_round_trip() {
        let (_dir, store) = store();
        store.save(&bundle(3600)).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "sk-ant-oat-test");
        assert_eq!(loaded.token_type, TokenType::OauthFlow);
        assert!(!loaded.is_expired());
    }

    #[cfg(unix)]
    #[test]
    fn file_and_dir_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = store();
        store.save(&bundle(3600)).unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn expiry_uses_leading_skew() {
        // expires 3 seconds from now: inside the 5s skew, counts as expired
        assert!(bundle(3).is_expired());
        assert!(!bundle(60).is_expired());
    }

    #[test]
    fn valid_access_token_rejects_expired() {
        let (_dir, store) = store();
        store.save(&bundle(-10)).unwrap();
        assert!(store.valid_access_token().is_none());

        store.save(&bundle(3600)).unwrap();
        assert_eq!(store.valid_access_token().unwrap(), "sk-ant-oat-test");
    }

    #[test]
    fn clear_removes_tokens_and_is_idempotent() {
        let (_dir, store) = store();
        store.save(&bundle(3600)).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn legacy_file_without_token_type_reads_as_oauth_flow() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{"access_token":"tok","refresh_token":"r","expires_at":4102444800}"#,
        )
        .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.token_type, TokenType::OauthFlow);
    }

    #[test]
    fn corrupt_file_reads_as_absent() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not-json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn status_reports_long_term_in_days() {
        let (_dir, store) = store();
        let mut b = bundle(90 * 24 * 3600);
        b.token_type = TokenType::LongTerm;
        b.refresh_token = None;
        store.save(&b).unwrap();

        let status = store.status();
        assert!(status.has_tokens);
        assert!(!status.is_expired);
        assert!(status.time_remaining.contains('d'));
    }
}
