//! Action execution layer.
//!
//! - `types`: the `{thoughts, actions}` batch schema
//! - `executor`: sequential dispatch with per-action error capture
//! - `edit`: edit sub-operations applied in memory
//! - `shell`: `command` and `execute` child processes
//! - `web_search`: `browse` behind a replaceable search provider
//! - `errors`: what a failed action reports back to the model

pub mod edit;
pub mod errors;
pub mod executor;
pub mod shell;
pub mod types;
pub mod web_search;

pub use errors::ActionError;
pub use executor::ActionExecutor;
pub use types::{Action, ActionBatch, ActionKind, ActionResult};
pub use web_search::{DuckDuckGoSearch, SearchHit, SearchProvider};
