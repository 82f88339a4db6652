use crate::gemini::{GeminiError, PlantClassifier};
use crate::models::{ImagePayload, PlantRecord, RequestState};
use crate::parser::parse_plant_info;
use crate::state::{dispatch, Event, SessionState};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// No image selected; nothing happened.
    NothingToIdentify,
    /// A request for the current image is still in flight.
    AlreadyPending,
    /// The request ran. Holds the session's request state afterwards, which is
    /// `Idle` if the image was replaced while the request was in flight.
    Finished(RequestState),
}

pub struct IdentificationOrchestrator {
    classifier: Arc<dyn PlantClassifier>,
    state: Arc<Mutex<SessionState>>,
}

/// Issues the finishing event when dropped, so `Pending` never outlives the
/// request even if the future is cancelled.
struct PendingGuard<'a> {
    state: &'a Mutex<SessionState>,
    generation: u64,
    outcome: Option<Event>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let event = self.outcome.take().unwrap_or_else(|| {
            warn!(generation = self.generation, "Identification interrupted before completion");
            Event::IdentifyFailed {
                generation: self.generation,
                message: "Plant identification failed: request was interrupted".into(),
            }
        });
        dispatch(self.state, event);
    }
}

impl IdentificationOrchestrator {
    pub fn new(classifier: Arc<dyn PlantClassifier>, state: Arc<Mutex<SessionState>>) -> Self {
        Self { classifier, state }
    }

    /// One round trip: classify, then parse. Parsing never fails.
    pub async fn run(&self, payload: &ImagePayload) -> Result<PlantRecord, GeminiError> {
        let text = self.classifier.classify(payload).await?;
        Ok(parse_plant_info(&text))
    }

    /// Identify the current image.
    pub async fn identify(&self) -> IdentifyOutcome {
        let request_id = Uuid::new_v4();
        let (generation, payload) = {
            let guard = self.state.lock();
            let Some(payload) = guard.image.clone() else {
                return IdentifyOutcome::NothingToIdentify;
            };
            if guard.request.is_pending() {
                return IdentifyOutcome::AlreadyPending;
            }
            (guard.generation, payload)
        };
        // The lock was released above; the reducer ignores the start if the image changed since
        let started = dispatch(&self.state, Event::IdentifyStarted { generation, request_id });
        if started.request != (RequestState::Pending { request_id }) {
            return if started.request.is_pending() {
                IdentifyOutcome::AlreadyPending
            } else {
                IdentifyOutcome::NothingToIdentify
            };
        }

        info!(%request_id, generation, "🌿 Identification started");
        let mut guard = PendingGuard { state: &self.state, generation, outcome: None };
        guard.outcome = Some(match self.run(&payload).await {
            Ok(record) => {
                info!(%request_id, name = %record.name, "✅ Identification succeeded");
                Event::IdentifySucceeded { generation, record, at: Utc::now() }
            }
            Err(e) => {
                error!(%request_id, error = %e, "❌ Identification failed");
                Event::IdentifyFailed { generation, message: format!("Plant identification failed: {}", e) }
            }
        });
        drop(guard);

        IdentifyOutcome::Finished(self.state.lock().request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DEFAULT_HEIGHT;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const MONSTERA: &str = "Common Name: Monstera\nScientific Name: Monstera deliciosa\n1. Bright light\nDescription: A climbing plant";

    enum Reply {
        Text(&'static str),
        Status(u16, &'static str),
        Shape,
    }

    struct FakeClassifier {
        reply: Reply,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeClassifier {
        fn new(reply: Reply) -> Self {
            Self { reply, calls: AtomicUsize::new(0), gate: None }
        }
    }

    #[async_trait]
    impl PlantClassifier for FakeClassifier {
        async fn classify(&self, _payload: &ImagePayload) -> Result<String, GeminiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.reply {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Status(code, body) => Err(GeminiError::Transport {
                    status: StatusCode::from_u16(code).unwrap(),
                    body: body.to_string(),
                }),
                Reply::Shape => Err(GeminiError::ContractViolation("no candidates".into())),
            }
        }
    }

    fn setup(classifier: FakeClassifier) -> (Arc<IdentificationOrchestrator>, Arc<FakeClassifier>, Arc<Mutex<SessionState>>) {
        let state: Arc<Mutex<SessionState>> = Arc::default();
        let classifier = Arc::new(classifier);
        let orch = Arc::new(IdentificationOrchestrator::new(classifier.clone(), state.clone()));
        (orch, classifier, state)
    }

    fn select(state: &Mutex<SessionState>, bytes: &'static [u8]) {
        dispatch(state, Event::ImageSelected(ImagePayload::new(bytes, "image/jpeg")));
    }

    #[tokio::test]
    async fn success_parses_record() {
        let (orch, classifier, state) = setup(FakeClassifier::new(Reply::Text(MONSTERA)));
        select(&state, b"leaf");
        let IdentifyOutcome::Finished(RequestState::Succeeded { record, .. }) = orch.identify().await else {
            panic!("expected success");
        };
        assert_eq!(record.name, "Monstera");
        assert_eq!(record.scientific_name, "Monstera deliciosa");
        assert!(record.care.instruction1.contains("Bright light"));
        assert_eq!(record.description, "A climbing plant");
        assert_eq!(record.height, DEFAULT_HEIGHT);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert!(!state.lock().request.is_pending());
    }

    #[tokio::test]
    async fn transport_failure_reports_status() {
        let (orch, _, state) = setup(FakeClassifier::new(Reply::Status(500, "internal")));
        select(&state, b"leaf");
        let IdentifyOutcome::Finished(RequestState::Failed { message }) = orch.identify().await else {
            panic!("expected failure");
        };
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("internal"), "{message}");
        assert_eq!(state.lock().error.as_deref(), Some(message.as_str()));
    }

    #[tokio::test]
    async fn contract_violation_is_failure_not_success() {
        let (orch, _, state) = setup(FakeClassifier::new(Reply::Shape));
        select(&state, b"leaf");
        let outcome = orch.identify().await;
        let IdentifyOutcome::Finished(RequestState::Failed { message }) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(message.contains("Unexpected API response structure"));
    }

    #[tokio::test]
    async fn no_image_is_silent_noop() {
        let (orch, classifier, state) = setup(FakeClassifier::new(Reply::Text(MONSTERA)));
        assert_eq!(orch.identify().await, IdentifyOutcome::NothingToIdentify);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*state.lock(), SessionState::default());
    }

    #[tokio::test]
    async fn second_identify_while_pending_is_rejected() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeClassifier::new(Reply::Text(MONSTERA));
        fake.gate = Some(gate.clone());
        let (orch, classifier, state) = setup(fake);
        select(&state, b"leaf");

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.identify().await }
        });
        while !state.lock().request.is_pending() {
            tokio::task::yield_now().await;
        }
        assert_eq!(orch.identify().await, IdentifyOutcome::AlreadyPending);

        gate.notify_one();
        assert!(matches!(first.await.unwrap(), IdentifyOutcome::Finished(RequestState::Succeeded { .. })));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn result_for_replaced_image_is_ignored() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeClassifier::new(Reply::Text(MONSTERA));
        fake.gate = Some(gate.clone());
        let (orch, _, state) = setup(fake);
        select(&state, b"old");

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.identify().await }
        });
        while !state.lock().request.is_pending() {
            tokio::task::yield_now().await;
        }
        select(&state, b"new");
        gate.notify_one();

        assert_eq!(first.await.unwrap(), IdentifyOutcome::Finished(RequestState::Idle));
        let s = state.lock();
        assert_eq!(s.request, RequestState::Idle);
        assert_eq!(s.image.as_ref().unwrap().bytes.as_ref(), b"new");
    }

    #[tokio::test]
    async fn cancelled_request_clears_pending() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeClassifier::new(Reply::Text(MONSTERA));
        fake.gate = Some(gate);
        let (orch, _, state) = setup(fake);
        select(&state, b"leaf");

        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.identify().await }
        });
        while !state.lock().request.is_pending() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        let s = state.lock();
        assert!(matches!(s.request, RequestState::Failed { .. }));
        assert!(s.error.as_deref().unwrap().contains("interrupted"));
    }

    #[tokio::test]
    async fn retry_after_failure_is_allowed() {
        let (orch, classifier, state) = setup(FakeClassifier::new(Reply::Status(503, "busy")));
        select(&state, b"leaf");
        orch.identify().await;
        orch.identify().await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    }
}
