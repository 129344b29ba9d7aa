//! Model catalog: advertised ids, backend ids and feature flags.
//!
//! The registry is built once at startup from the static seed tables plus an
//! optional user catalog (`models.json`) and is immutable afterwards.

pub mod catalog;
pub mod registry;
pub mod spec;

pub use catalog::{load_custom_models, CustomModel};
pub use registry::{ModelFamily, ModelRegistry, Resolved};
pub use spec::{reasoning_budget, CHATGPT_EFFORT_LEVELS, REASONING_LEVELS};
