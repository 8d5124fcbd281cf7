use crate::{DocumentId, DocumentState, HistoryEvent, RequestId};
use anyhow::Result;
use futures::stream::BoxStream;
use std::{ops::Range, path::PathBuf};
use string_edit::{StringEdit, TextSnapshot};

/// Everything the backend is given to predict the next edits of a document.
#[derive(Clone, Debug)]
pub struct PredictionRequest {
    pub id: RequestId,
    pub document: DocumentState,
    pub workspace_root: Option<PathBuf>,
    pub history: Vec<HistoryEvent>,
    pub related_documents: Vec<(DocumentId, TextSnapshot)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PredictionEvent {
    /// A candidate edit, expressed against the request's snapshot. Candidates
    /// arrive in priority order; every candidate after the first is offered
    /// once the ones before it were accepted. `window` is the region the
    /// backend scanned and is only read on the first candidate.
    Edit {
        edit: StringEdit,
        window: Option<Range<usize>>,
    },
    /// The backend found nothing to suggest within `window`.
    NoSuggestions { window: Option<Range<usize>> },
}

pub trait PredictionBackend: Send + Sync + 'static {
    /// Starts predicting edits for `request`. Dropping the returned stream
    /// cancels the call.
    fn fetch(&self, request: PredictionRequest) -> BoxStream<'static, Result<PredictionEvent>>;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::*;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use futures::{StreamExt as _, channel::mpsc};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering::SeqCst},
    };

    pub struct FakeRequest {
        pub request: PredictionRequest,
        pub responder: mpsc::UnboundedSender<Result<PredictionEvent>>,
    }

    impl FakeRequest {
        pub fn respond(&self, event: PredictionEvent) {
            self.responder.unbounded_send(Ok(event)).ok();
        }

        pub fn fail(&self, error: anyhow::Error) {
            self.responder.unbounded_send(Err(error)).ok();
        }

        /// Ends the stream.
        pub fn finish(self) {
            self.responder.close_channel();
        }
    }

    /// A backend whose responses are scripted by the test through the
    /// [`FakeRequest`]s it hands out.
    pub struct FakeBackend {
        requests_tx: mpsc::UnboundedSender<FakeRequest>,
        request_count: AtomicUsize,
    }

    impl FakeBackend {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRequest>) {
            let (requests_tx, requests_rx) = mpsc::unbounded();
            let backend = Arc::new(Self {
                requests_tx,
                request_count: AtomicUsize::new(0),
            });
            (backend, requests_rx)
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(SeqCst)
        }
    }

    impl PredictionBackend for FakeBackend {
        fn fetch(
            &self,
            request: PredictionRequest,
        ) -> BoxStream<'static, Result<PredictionEvent>> {
            self.request_count.fetch_add(1, SeqCst);
            let (responder, events) = mpsc::unbounded();
            self.requests_tx
                .unbounded_send(FakeRequest { request, responder })
                .ok();
            events.boxed()
        }
    }
}
