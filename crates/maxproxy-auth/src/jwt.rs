//! Unverified JWT payload decoding.
//!
//! Only the payload segment is decoded — signatures are never checked. The
//! proxy reads its own tokens for expiry and account-id hints; any parse
//! failure yields `None` rather than an error.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde_json::Value;

/// OpenAI id_token claim namespace carrying the ChatGPT account id.
const OPENAI_AUTH_CLAIMS: &str = "https://api.openai.com/auth";
/// Codex access-token claim namespace carrying the ChatGPT account id.
const CHATGPT_CLAIMS: &str = "https://claims.chatgpt.com";
const ACCOUNT_ID_CLAIM: &str = "chatgpt_account_id";

/// Decode the payload segment of a JWT into JSON claims.
///
/// Tolerates missing base64 padding. Returns `None` for anything that is not
/// a three-segment token with a JSON payload.
pub fn parse_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let _signature = parts.next()?;
    if parts.next().is_some() || payload.is_empty() {
        return None;
    }

    let mut padded = payload.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = URL_SAFE.decode(padded.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `exp` claim as UNIX seconds, when present and numeric.
pub fn expiry(token: &str) -> Option<i64> {
    parse_claims(token)?.get("exp")?.as_i64()
}

/// ChatGPT account id from an OpenAI id_token.
pub fn account_id_from_id_token(id_token: &str) -> Option<String> {
    claim_account_id(id_token, OPENAI_AUTH_CLAIMS)
}

/// ChatGPT account id from a Codex access token.
pub fn account_id_from_access_token(access_token: &str) -> Option<String> {
    claim_account_id(access_token, CHATGPT_CLAIMS)
}

fn claim_account_id(token: &str, namespace: &str) -> Option<String> {
    let id = parse_claims(token)?
        .get(namespace)?
        .get(ACCOUNT_ID_CLAIM)?
        .as_str()?
        .to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn make_jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn parses_exp_claim() {
        let token = make_jwt(&serde_json::json!({ "exp": 1_750_000_000 }));
        assert_eq!(expiry(&token), Some(1_750_000_000));
    }

    #[test]
    fn extracts_account_id_from_id_token_namespace() {
        let token = make_jwt(&serde_json::json!({
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct_123" }
        }));
        assert_eq!(account_id_from_id_token(&token).as_deref(), Some("acct_123"));
        assert!(account_id_from_access_token(&token).is_none());
    }

    #[test]
    fn extracts_account_id_from_access_token_namespace() {
        let token = make_jwt(&serde_json::json!({
            "https://claims.chatgpt.com": { "chatgpt_account_id": "acct_9" }
        }));
        assert_eq!(
            account_id_from_access_token(&token).as_deref(),
            Some("acct_9")
        );
    }

    #[test]
    fn malformed_tokens_yield_none() {
        assert!(parse_claims("").is_none());
        assert!(parse_claims("only-one-part").is_none());
        assert!(parse_claims("a.b").is_none());
        assert!(parse_claims("a.!!!.c").is_none());
        assert!(parse_claims("a.b.c.d").is_none());
    }

    #[test]
    fn missing_claim_yields_none_not_error() {
        let token = make_jwt(&serde_json::json!({ "sub": "user" }));
        assert!(account_id_from_id_token(&token).is_none());
        assert!(expiry(&token).is_none());
    }
}
