use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FacultyId, GraduateId, RoundNumber, RoundState};

pub const UNASSIGNED_TITLE: &str = "Unassigned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// JSON body of every successful request: `{"status":"success","data":..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: Status,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacultySummary {
    pub id: FacultyId,
    pub name: String,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFacultiesRequest {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFacultyRequest {
    pub id: FacultyId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraduatePayload {
    pub id: GraduateId,
    pub prefix: String,
    pub first_name: String,
    pub last_name: String,
    pub faculty_id: FacultyId,
    pub faculty_name: String,
    pub degree_level: String,
    pub degree_name: String,
    pub major: String,
    pub sequence: i64,
    pub faculty_sequence: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<RoundNumber>,
    pub called: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGraduatesRequest {
    pub faculty_id: FacultyId,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraduatePage {
    pub data: Vec<GraduatePayload>,
    pub total: i64,
}

/// One roster row deposited by the external import pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRow {
    #[serde(default)]
    pub prefix: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub faculty_id: FacultyId,
    #[serde(default)]
    pub degree_level: String,
    #[serde(default)]
    pub degree_name: String,
    #[serde(default)]
    pub major: String,
    /// Program order; appended after the current maximum when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub rows: Vec<ImportRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub imported: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteGraduatesResponse {
    pub deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaItem {
    pub id: FacultyId,
    pub name: String,
    pub value: u32,
    pub student_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaGroup {
    /// `None` for the unassigned bucket.
    #[serde(default)]
    pub round: Option<RoundNumber>,
    pub title: String,
    pub items: Vec<QuotaItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacultyQuota {
    pub faculty_id: FacultyId,
    pub quota: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundQuotaInput {
    pub round: RoundNumber,
    #[serde(default)]
    pub faculties: Vec<FacultyQuota>,
}

/// `POST /quota-groups/save` accepts either the bare round list or an
/// object that also states the unassigned remainder explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SaveQuotaRequest {
    Rounds(Vec<RoundQuotaInput>),
    Full {
        rounds: Vec<RoundQuotaInput>,
        #[serde(default)]
        unassigned: Option<Vec<FacultyQuota>>,
    },
}

impl SaveQuotaRequest {
    pub fn into_parts(self) -> (Vec<RoundQuotaInput>, Option<Vec<FacultyQuota>>) {
        match self {
            SaveQuotaRequest::Rounds(rounds) => (rounds, None),
            SaveQuotaRequest::Full { rounds, unassigned } => (rounds, unassigned),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveQuotaRequest {
    pub faculty_id: FacultyId,
    /// `None` moves out of the unassigned bucket.
    #[serde(default)]
    pub from: Option<RoundNumber>,
    /// `None` moves into the unassigned bucket.
    #[serde(default)]
    pub to: Option<RoundNumber>,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoundResponse {
    pub round: RoundNumber,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetReceivedRequest {
    pub id: GraduateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceResponse {
    Called { graduate: GraduatePayload },
    Exhausted { round: RoundNumber },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextGraduatesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub current_round: RoundNumber,
    pub total_in_round: i64,
    pub already_called: i64,
    pub remaining: i64,
    pub latest_called_sequence: Option<i64>,
    pub total_all_rounds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub state: RoundState,
    pub summary: RoundSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overview {
    pub round_number: RoundNumber,
    pub total_capacity: i64,
    pub remaining_count: i64,
    #[serde(default)]
    pub current_faculty_id: Option<FacultyId>,
    #[serde(default)]
    pub current_faculty_name: Option<String>,
    pub current_faculty_quota: i64,
    pub current_faculty_remaining: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeremonyTotals {
    pub total_graduates: i64,
    pub received: i64,
    pub not_received: i64,
}

/// Everything a display needs to redraw itself from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeremonySnapshot {
    pub first_graduate: Option<GraduatePayload>,
    pub next_graduates: Vec<GraduatePayload>,
    pub round_summary: Option<RoundSummary>,
    pub graduate_summary: CeremonyTotals,
    pub all_rounds_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub status: Status,
    pub revision: u64,
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn success(revision: u64, data: T) -> Self {
        Self {
            status: Status::Success,
            revision,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    GraduateCalled(EventEnvelope<GraduatePayload>),
    GraduateSummary(EventEnvelope<CeremonySnapshot>),
    GraduateOverview(EventEnvelope<Option<Overview>>),
    Error { status: Status, message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            status: Status::Error,
            message: message.into(),
        }
    }

    pub fn revision(&self) -> Option<u64> {
        match self {
            ServerEvent::GraduateCalled(envelope) => Some(envelope.revision),
            ServerEvent::GraduateSummary(envelope) => Some(envelope.revision),
            ServerEvent::GraduateOverview(envelope) => Some(envelope.revision),
            ServerEvent::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientRequest {
    RequestSummary,
}
