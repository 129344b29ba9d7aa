//! Subscription OAuth for upstream providers.
//!
//! Two issuer profiles are supported:
//! - **Anthropic** (Claude Pro/Max): authorize on claude.ai, token exchange
//!   on console.anthropic.com, Bearer tokens with optional one-year
//!   "long-term" issuance (no refresh token).
//! - **OpenAI** (ChatGPT Plus/Pro): auth.openai.com, standard refresh flow,
//!   account id carried in JWT claims.
//!
//! Tokens are persisted to owner-only JSON files under the user's home
//! directory; PKCE state lives in a temp file between the authorize and
//! exchange steps.

pub mod anthropic;
pub mod chatgpt;
pub mod error;
pub mod jwt;
pub mod pkce;
pub mod store;

pub use anthropic::{is_long_term_token_format, AnthropicOauth};
pub use chatgpt::ChatGptOauth;
pub use error::AuthError;
pub use pkce::{PkcePair, PkceStore};
pub use store::{TokenBundle, TokenStatus, TokenStore, TokenType};
