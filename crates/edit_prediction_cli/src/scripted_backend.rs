use crate::scenario::ScriptedResponse;
use anyhow::{Result, anyhow};
use edit_prediction::{PredictionBackend, PredictionEvent, PredictionRequest};
use futures::{StreamExt as _, stream::BoxStream};
use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};

/// Answers each request with the next response of the scenario. Requests
/// issued after the script ran out find nothing to suggest.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<PredictionRequest>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::default(),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().len()
    }
}

impl PredictionBackend for ScriptedBackend {
    fn fetch(&self, request: PredictionRequest) -> BoxStream<'static, Result<PredictionEvent>> {
        log::debug!(
            "request {} for {} at version {}",
            request.id,
            request.document.id,
            request.document.version
        );
        self.requests.lock().push(request);

        let Some(response) = self.responses.lock().pop_front() else {
            log::warn!("scenario has no response left; answering with no suggestions");
            return futures::stream::empty().boxed();
        };

        let mut events = response
            .events
            .iter()
            .map(|event| event.to_prediction_event())
            .collect::<Vec<_>>();
        if let Some(error) = response.error {
            events.push(Err(anyhow!(error)));
        }

        let latency = Duration::from_millis(response.latency_ms);
        futures::stream::once(async move {
            if !latency.is_zero() {
                smol::Timer::after(latency).await;
            }
            futures::stream::iter(events)
        })
        .flatten()
        .boxed()
    }
}
