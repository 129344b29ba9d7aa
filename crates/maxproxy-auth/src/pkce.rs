//! PKCE (Proof Key for Code Exchange) generation and transient storage.

use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// A PKCE verifier/challenge pair.
#[derive(Clone, Debug)]
pub struct PkcePair {
    /// Random verifier string (base64url, no padding).
    pub verifier: String,
    /// SHA-256 challenge of the verifier (base64url, no padding).
    pub challenge: String,
}

/// Generate a new PKCE verifier/challenge pair.
///
/// The verifier is 32 cryptographically-secure random bytes encoded as
/// base64url (no padding). The challenge is the SHA-256 hash of the
/// verifier, also base64url-encoded.
pub fn generate_pkce() -> PkcePair {
    let random_bytes: [u8; 32] = rand::random();
    let verifier = URL_SAFE_NO_PAD.encode(random_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    PkcePair {
        verifier,
        challenge,
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    code_verifier: String,
    state: String,
}

/// Persists PKCE state between authorize-URL generation and code exchange.
///
/// The state parameter equals the verifier (the convention the upstream
/// issuers accept). Consumers must call [`PkceStore::clear`] after a
/// successful exchange.
pub struct PkceStore {
    path: PathBuf,
}

impl PkceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Temp-dir state file used by the Anthropic flow.
    pub fn anthropic_default() -> Self {
        Self::new(std::env::temp_dir().join("anthropic_oauth_pkce.json"))
    }

    /// State file next to the ChatGPT token file.
    pub fn chatgpt_default() -> Self {
        let dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatgpt-local");
        Self::new(dir.join("pkce.json"))
    }

    /// Save verifier + state for the exchange step.
    pub fn persist(&self, verifier: &str, state: &str) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string(&PersistedState {
            code_verifier: verifier.to_string(),
            state: state.to_string(),
        })
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        fs::write(&self.path, data)?;
        set_mode(&self.path, 0o600)?;
        Ok(())
    }

    /// Load saved verifier + state. Absent or unreadable state yields `None`.
    pub fn load(&self) -> Option<(String, String)> {
        let data = fs::read_to_string(&self.path).ok()?;
        let state: PersistedState = serde_json::from_str(&data).ok()?;
        Some((state.code_verifier, state.state))
    }

    /// Remove the state file after a successful exchange.
    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
