use anyhow::{Context as _, Result};
use edit_prediction::{DocumentId, NextEditConfig, PredictionEvent};
use serde::Deserialize;
use std::{
    ops::Range,
    path::{Path, PathBuf},
};
use string_edit::{StringEdit, StringReplacement};

/// A recorded editing session together with the responses the backend gives
/// to each request issued while replaying it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub config: NextEditConfig,
    pub documents: Vec<ScenarioDocument>,
    /// Consumed in order, one per backend request.
    #[serde(default)]
    pub responses: Vec<ScriptedResponse>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioDocument {
    pub id: DocumentId,
    pub text: String,
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub cursor: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScriptedResponse {
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
    /// Fails the request once `events` were streamed.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedEvent {
    Edit {
        replacements: Vec<ScriptedReplacement>,
        #[serde(default)]
        window: Option<Range<usize>>,
    },
    NoSuggestions {
        #[serde(default)]
        window: Option<Range<usize>>,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScriptedReplacement {
    pub range: Range<usize>,
    pub text: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Edit {
        document: DocumentId,
        range: Range<usize>,
        text: String,
    },
    Select {
        document: DocumentId,
        range: Range<usize>,
    },
    Predict {
        document: DocumentId,
    },
    /// Accepts the last predicted edit and applies it to its document.
    Accept,
    Reject,
    Ignore,
    ClearCache,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ScriptedEvent {
    pub fn to_prediction_event(&self) -> Result<PredictionEvent> {
        Ok(match self {
            ScriptedEvent::Edit {
                replacements,
                window,
            } => PredictionEvent::Edit {
                edit: StringEdit::new(replacements.iter().map(|replacement| {
                    StringReplacement::new(replacement.range.clone(), replacement.text.as_str())
                }))?,
                window: window.clone(),
            },
            ScriptedEvent::NoSuggestions { window } => PredictionEvent::NoSuggestions {
                window: window.clone(),
            },
        })
    }
}
