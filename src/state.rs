//! The interactive session as an explicit value.
//!
//! All changes go through [`reduce`], a pure `(state, event) -> state`
//! function. `generation` is bumped on every new image; finishing events carry
//! the generation they were started under and are dropped if it has moved on.

use crate::models::{ImageMeta, ImagePayload, PlantRecord, RequestState, RequestView, SessionView};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub generation: u64,
    pub image: Option<ImagePayload>,
    pub request: RequestState,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self { generation: 0, image: None, request: RequestState::Idle, error: None }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    ImageSelected(ImagePayload),
    IdentifyStarted { generation: u64, request_id: Uuid },
    IdentifySucceeded { generation: u64, record: PlantRecord, at: DateTime<Utc> },
    IdentifyFailed { generation: u64, message: String },
    CameraFailed { message: String },
}

pub fn reduce(state: SessionState, event: Event) -> SessionState {
    match event {
        Event::ImageSelected(image) => SessionState {
            generation: state.generation + 1,
            image: Some(image),
            request: RequestState::Idle,
            error: None,
        },
        Event::IdentifyStarted { generation, request_id } => {
            if state.generation != generation || state.image.is_none() || state.request.is_pending() {
                return state;
            }
            SessionState { request: RequestState::Pending { request_id }, error: None, ..state }
        }
        Event::IdentifySucceeded { generation, record, at } => {
            if !is_current(&state, generation) {
                return state;
            }
            SessionState {
                request: RequestState::Succeeded { record, completed_at: at },
                error: None,
                ..state
            }
        }
        Event::IdentifyFailed { generation, message } => {
            if !is_current(&state, generation) {
                return state;
            }
            SessionState {
                request: RequestState::Failed { message: message.clone() },
                error: Some(message),
                ..state
            }
        }
        Event::CameraFailed { message } => SessionState { error: Some(message), ..state },
    }
}

fn is_current(state: &SessionState, generation: u64) -> bool {
    let current = state.generation == generation && state.request.is_pending();
    if !current {
        debug!(generation, current = state.generation, "Discarding stale identification result");
    }
    current
}

/// Apply `event` in place and return the resulting state.
pub fn dispatch(cell: &Mutex<SessionState>, event: Event) -> SessionState {
    let mut guard = cell.lock();
    let before = std::mem::take(&mut *guard);
    *guard = reduce(before, event);
    info!(generation = guard.generation, pending = guard.request.is_pending(), "Session updated");
    guard.clone()
}

pub fn view(state: &SessionState, camera_active: bool) -> SessionView {
    SessionView {
        generation: state.generation,
        image: state.image.as_ref().map(|i| ImageMeta { mime_type: i.mime_type.clone(), size_bytes: i.bytes.len() }),
        camera_active,
        request: RequestView::from(&state.request),
        error: state.error.clone(),
    }
}
