use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A normalized image ready to be sent for identification.
///
/// Cloning is cheap; the bytes are reference counted and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), mime_type: mime_type.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CareInstructions {
    pub instruction1: String,
    pub instruction2: String,
    pub instruction3: String,
}

impl CareInstructions {
    /// Instructions in order, empty ones left out.
    pub fn visible(&self) -> Vec<String> {
        [&self.instruction1, &self.instruction2, &self.instruction3]
            .into_iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

/// Structured identification result. Every field is always populated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlantRecord {
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    pub origin: String,
    pub height: String,
    pub sunlight: String,
    pub water: String,
    pub care: CareInstructions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Pending { request_id: Uuid },
    Succeeded { record: PlantRecord, completed_at: DateTime<Utc> },
    Failed { message: String },
}

impl RequestState {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::Pending { .. })
    }
}

// --- API views ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub mime_type: String,
    pub size_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    pub origin: String,
    pub height: String,
    pub sunlight: String,
    pub water: String,
    pub care_instructions: Vec<String>,
}

impl From<&PlantRecord> for RecordView {
    fn from(r: &PlantRecord) -> Self {
        Self {
            name: r.name.clone(),
            scientific_name: r.scientific_name.clone(),
            description: r.description.clone(),
            origin: r.origin.clone(),
            height: r.height.clone(),
            sunlight: r.sunlight.clone(),
            water: r.water.clone(),
            care_instructions: r.care.visible(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestView {
    Idle,
    Pending { request_id: Uuid },
    Succeeded { record: RecordView, completed_at: DateTime<Utc> },
    Failed { error: String },
}

impl From<&RequestState> for RequestView {
    fn from(s: &RequestState) -> Self {
        match s {
            RequestState::Idle => RequestView::Idle,
            RequestState::Pending { request_id } => RequestView::Pending { request_id: *request_id },
            RequestState::Succeeded { record, completed_at } => RequestView::Succeeded {
                record: record.into(),
                completed_at: *completed_at,
            },
            RequestState::Failed { message } => RequestView::Failed { error: message.clone() },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub generation: u64,
    pub image: Option<ImageMeta>,
    pub camera_active: bool,
    pub request: RequestView,
    pub error: Option<String>,
}
