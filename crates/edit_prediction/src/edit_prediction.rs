mod backend;
mod config;
mod history;
mod next_edit_provider;
mod prediction_cache;
mod rebase_tracker;
mod rejection_collector;
mod workspace;

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

pub use backend::*;
pub use config::*;
pub use history::*;
pub use next_edit_provider::*;
pub use prediction_cache::*;
pub use rebase_tracker::*;
pub use rejection_collector::*;
pub use string_edit::{Bias, RootedEdit, StringEdit, StringReplacement, TextSnapshot};
pub use workspace::*;

/// Identifies one call into the prediction backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors surfaced to callers of [`NextEditProvider::get_next_edit`].
#[derive(Clone, Debug, Error)]
pub enum NextEditError {
    #[error("failed to fetch next edit: {0:#}")]
    FetchFailure(Arc<anyhow::Error>),
    #[error("unexpected next edit state: {0}")]
    Unexpected(String),
}

/// Why a call to [`NextEditProvider::get_next_edit`] produced no edit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoNextEditReason {
    /// The backend searched a window and found nothing to suggest.
    NoSuggestions,
    GotCancelled,
    Timeout,
    /// The user already rejected this edit.
    Rejected,
    /// An edit from the same backend request was rejected.
    RejectedByRequest,
    Uncategorized,
}

impl fmt::Display for NoNextEditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            NoNextEditReason::NoSuggestions => "no suggestions",
            NoNextEditReason::GotCancelled => "request was cancelled",
            NoNextEditReason::Timeout => "request timed out",
            NoNextEditReason::Rejected => "edit was rejected",
            NoNextEditReason::RejectedByRequest => "request was rejected",
            NoNextEditReason::Uncategorized => "no edit",
        };
        f.write_str(reason)
    }
}

#[cfg(test)]
#[ctor::ctor]
fn init_logger() {
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }
}
