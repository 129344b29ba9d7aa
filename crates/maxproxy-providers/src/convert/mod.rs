//! Pure translation between the OpenAI Chat Completions, Anthropic Messages
//! and OpenAI Responses dialects.

pub mod content;
pub mod request;
pub mod response;
pub mod responses;
pub mod stream;

pub use response::map_stop_reason;
