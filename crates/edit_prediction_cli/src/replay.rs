use crate::{
    scenario::{Scenario, Step},
    scripted_backend::ScriptedBackend,
};
use anyhow::{Context as _, Result};
use edit_prediction::{
    DocumentId, LocalWorkspace, NextEditContext, NextEditOutcome, NextEditProvider,
    NextEditResult, NextEditSource, NextEditTrigger, NoNextEditReason, RequestId,
    Workspace as _,
};
use serde::Serialize;
use smol::Executor;
use std::{fmt, ops::Range, sync::Arc};
use string_edit::StringEdit;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub steps: Vec<StepReport>,
    pub backend_requests: usize,
    pub unused_responses: usize,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepOutcome {
    Edit {
        document: DocumentId,
        version: usize,
    },
    Select {
        document: DocumentId,
        range: Range<usize>,
    },
    Predict {
        document: DocumentId,
        version: usize,
        prediction: PredictionReport,
    },
    Accept {
        edit: Option<Uuid>,
        /// Version of the document after applying the edit, if it still applied.
        version: Option<usize>,
    },
    Reject {
        edit: Option<Uuid>,
    },
    Ignore {
        edit: Option<Uuid>,
    },
    ClearCache,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PredictionReport {
    Edit {
        id: Uuid,
        request_id: RequestId,
        source: NextEditSource,
        subsequent_k: usize,
        replacements: Vec<ReplacementReport>,
        new_text: String,
    },
    NoEdit {
        reason: Option<NoNextEditReason>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ReplacementReport {
    pub range: Range<usize>,
    pub text: String,
}

struct Session {
    workspace: Arc<LocalWorkspace>,
    provider: NextEditProvider,
    last_prediction: Option<NextEditResult>,
}

/// Runs every step of `scenario` against a fresh provider.
pub fn replay(scenario: Scenario) -> Result<ReplayReport> {
    let executor = Arc::new(Executor::new());
    let workspace = LocalWorkspace::new(scenario.workspace_root.clone());
    for document in &scenario.documents {
        workspace.open_document(
            document.id.clone(),
            document.text.as_str(),
            document.language_id.as_deref(),
        );
        workspace
            .set_selection(&document.id, document.cursor..document.cursor)
            .with_context(|| format!("invalid cursor for {}", document.id))?;
    }

    let backend = Arc::new(ScriptedBackend::new(scenario.responses));
    let provider = NextEditProvider::new(
        workspace.clone(),
        backend.clone(),
        scenario.config,
        executor.clone(),
    );
    let mut session = Session {
        workspace,
        provider,
        last_prediction: None,
    };

    let steps = scenario.steps;
    let steps = smol::block_on(executor.run(async {
        let mut reports = Vec::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            let outcome = session
                .run_step(step)
                .await
                .with_context(|| format!("step {index} failed"))?;
            reports.push(StepReport { index, outcome });
        }
        anyhow::Ok(reports)
    }))?;

    Ok(ReplayReport {
        steps,
        backend_requests: backend.request_count(),
        unused_responses: backend.remaining_responses(),
    })
}

impl Session {
    async fn run_step(&mut self, step: Step) -> Result<StepOutcome> {
        Ok(match step {
            Step::Edit {
                document,
                range,
                text,
            } => {
                let change = self
                    .workspace
                    .edit(&document, StringEdit::replace(range, text))?;
                StepOutcome::Edit {
                    document,
                    version: change.version,
                }
            }
            Step::Select { document, range } => {
                self.workspace.set_selection(&document, range.clone())?;
                StepOutcome::Select { document, range }
            }
            Step::Predict { document } => {
                let version = self
                    .workspace
                    .document(&document)
                    .map(|state| state.version)
                    .with_context(|| format!("document {document} is not open"))?;
                let prediction = self.predict(&document).await;
                StepOutcome::Predict {
                    document,
                    version,
                    prediction,
                }
            }
            Step::Accept => match self.last_prediction.take() {
                Some(result) => {
                    self.provider.handle_acceptance(&result);
                    StepOutcome::Accept {
                        edit: Some(result.id),
                        version: self.apply(&result)?,
                    }
                }
                None => StepOutcome::Accept {
                    edit: None,
                    version: None,
                },
            },
            Step::Reject => {
                let result = self.last_prediction.take();
                if let Some(result) = &result {
                    self.provider.handle_rejection(result);
                }
                StepOutcome::Reject {
                    edit: result.map(|result| result.id),
                }
            }
            Step::Ignore => {
                let result = self.last_prediction.take();
                if let Some(result) = &result {
                    self.provider.handle_ignored(result);
                }
                StepOutcome::Ignore {
                    edit: result.map(|result| result.id),
                }
            }
            Step::ClearCache => {
                self.provider.clear_cache();
                StepOutcome::ClearCache
            }
        })
    }

    async fn predict(&mut self, document: &DocumentId) -> PredictionReport {
        let context = NextEditContext {
            trigger: NextEditTrigger::Manual,
        };
        self.last_prediction = None;
        match self.provider.get_next_edit(document, context).await {
            Ok(Some(result)) => {
                self.provider.handle_shown(&result);
                let report = PredictionReport::Edit {
                    id: result.id,
                    request_id: result.request_id,
                    source: result.source,
                    subsequent_k: result.subsequent_k,
                    replacements: result
                        .edit
                        .edit()
                        .replacements()
                        .iter()
                        .map(|replacement| ReplacementReport {
                            range: replacement.range.clone(),
                            text: replacement.new_text.to_string(),
                        })
                        .collect(),
                    new_text: result.edit.apply().to_string(),
                };
                self.last_prediction = Some(result);
                report
            }
            Ok(None) => PredictionReport::NoEdit {
                reason: match self.provider.last_outcome() {
                    Some(NextEditOutcome::NoEdit(reason)) => Some(reason),
                    _ => None,
                },
            },
            Err(error) => PredictionReport::Failed {
                error: format!("{error:#}"),
            },
        }
    }

    fn apply(&self, result: &NextEditResult) -> Result<Option<usize>> {
        let document = self
            .workspace
            .document(&result.document_id)
            .with_context(|| format!("document {} is not open", result.document_id))?;
        if &document.snapshot != result.edit.base() {
            log::warn!(
                "{} changed since edit {} was predicted; not applying it",
                result.document_id,
                result.id
            );
            return Ok(None);
        }
        let change = self
            .workspace
            .edit(&result.document_id, result.edit.edit().clone())?;
        Ok(Some(change.version))
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ", self.index)?;
        match &self.outcome {
            StepOutcome::Edit { document, version } => {
                write!(f, "edit {document} (version {version})")
            }
            StepOutcome::Select { document, range } => write!(f, "select {document} {range:?}"),
            StepOutcome::Predict {
                document,
                version,
                prediction,
            } => {
                write!(f, "predict {document}@{version}: ")?;
                match prediction {
                    PredictionReport::Edit {
                        source,
                        subsequent_k,
                        replacements,
                        ..
                    } => {
                        write!(f, "{} edit", source_label(*source))?;
                        for replacement in replacements {
                            write!(f, " {:?} => {:?}", replacement.range, replacement.text)?;
                        }
                        if *subsequent_k > 0 {
                            write!(f, " (k = {subsequent_k})")?;
                        }
                        Ok(())
                    }
                    PredictionReport::NoEdit {
                        reason: Some(reason),
                    } => write!(f, "no edit ({reason})"),
                    PredictionReport::NoEdit { reason: None } => write!(f, "no edit"),
                    PredictionReport::Failed { error } => write!(f, "failed: {error}"),
                }
            }
            StepOutcome::Accept {
                edit: Some(id),
                version: Some(version),
            } => write!(f, "accepted {id} (version {version})"),
            StepOutcome::Accept {
                edit: Some(id),
                version: None,
            } => write!(f, "accepted {id} (not applied)"),
            StepOutcome::Reject { edit: Some(id) } => write!(f, "rejected {id}"),
            StepOutcome::Ignore { edit: Some(id) } => write!(f, "ignored {id}"),
            StepOutcome::Accept { edit: None, .. }
            | StepOutcome::Reject { edit: None }
            | StepOutcome::Ignore { edit: None } => write!(f, "no edit to respond to"),
            StepOutcome::ClearCache => write!(f, "cleared cache"),
        }
    }
}

fn source_label(source: NextEditSource) -> &'static str {
    match source {
        NextEditSource::Fetched => "fetched",
        NextEditSource::Cached => "cached",
        NextEditSource::Rebased => "rebased",
        NextEditSource::RecentlyShown => "recently shown",
    }
}
