// libs/appointment-cell/src/models.rs
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use shared_models::auth::ActorRole;
use shared_models::error::AppError;

static HHMM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("HH:MM pattern compiles"));

pub const TBD: &str = "TBD";

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    #[serde(alias = "confirmed")]
    Accepted,
    Scheduled,
    Rescheduled,
    RescheduleRequested,
    Completed,
    Rejected,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 8] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Accepted,
        AppointmentStatus::Scheduled,
        AppointmentStatus::Rescheduled,
        AppointmentStatus::RescheduleRequested,
        AppointmentStatus::Completed,
        AppointmentStatus::Rejected,
        AppointmentStatus::Cancelled,
    ];

    /// Statuses whose record owns its `(provider, date, time)` slot.
    pub const SLOT_HOLDING: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Accepted,
        AppointmentStatus::Scheduled,
        AppointmentStatus::Rescheduled,
        AppointmentStatus::RescheduleRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Accepted => "accepted",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Rescheduled => "rescheduled",
            AppointmentStatus::RescheduleRequested => "reschedule_requested",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Rejected | AppointmentStatus::Cancelled
        )
    }

    pub fn holds_slot(&self) -> bool {
        Self::SLOT_HOLDING.contains(self)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentKind {
    Checkup,
    Consultation,
    #[serde(alias = "follow_up", alias = "followup")]
    FollowUp,
    Emergency,
}

impl fmt::Display for AppointmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentKind::Checkup => write!(f, "checkup"),
            AppointmentKind::Consultation => write!(f, "consultation"),
            AppointmentKind::FollowUp => write!(f, "follow-up"),
            AppointmentKind::Emergency => write!(f, "emergency"),
        }
    }
}

/// Time of day for an appointment, or `TBD` until the provider fixes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotTime {
    Tbd,
    At(NaiveTime),
}

impl SlotTime {
    /// Parse `"TBD"` or a strict 24-hour `HH:MM` string.
    pub fn parse(value: &str) -> Result<Self, AppointmentError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(TBD) {
            return Ok(SlotTime::Tbd);
        }

        let captures = HHMM.captures(value).ok_or_else(|| {
            AppointmentError::Validation(format!("time '{}' must be HH:MM (00:00-23:59) or TBD", value))
        })?;
        let hour: u32 = captures[1].parse().unwrap_or_default();
        let minute: u32 = captures[2].parse().unwrap_or_default();

        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(SlotTime::At)
            .ok_or_else(|| AppointmentError::Validation(format!("time '{}' is out of range", value)))
    }

    pub fn at(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(SlotTime::At)
    }

    pub fn is_tbd(&self) -> bool {
        matches!(self, SlotTime::Tbd)
    }

    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            SlotTime::Tbd => None,
            SlotTime::At(time) => Some(*time),
        }
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotTime::Tbd => f.write_str(TBD),
            SlotTime::At(time) => write!(f, "{:02}:{:02}", time.hour(), time.minute()),
        }
    }
}

impl FromStr for SlotTime {
    type Err = AppointmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SlotTime::parse(value)
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SlotTime::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Exclusive booking key. `TBD` is a time like any other here, so a
/// provider has at most one undecided booking per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: SlotTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub requested_date: NaiveDate,
    pub requested_time: SlotTime,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

fn default_location() -> String {
    TBD.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: SlotTime,
    #[serde(default = "default_location")]
    pub location: String,
    pub kind: AppointmentKind,
    pub status: AppointmentStatus,
    pub reason: String,
    pub provider_notes: Option<String>,
    pub patient_notes: Option<String>,
    /// Present exactly while `status` is `reschedule_requested`.
    pub reschedule_request: Option<RescheduleRequest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Appointment {
    pub fn slot_key(&self) -> Option<SlotKey> {
        if !self.status.holds_slot() {
            return None;
        }
        Some(SlotKey {
            provider_id: self.provider_id,
            date: self.date,
            time: self.time,
        })
    }

    pub fn is_party(&self, actor_id: Uuid) -> bool {
        self.patient_id == actor_id || self.provider_id == actor_id
    }

    /// The other side of the appointment from `actor_id`.
    pub fn counterparty(&self, actor_id: Uuid) -> Uuid {
        if actor_id == self.patient_id {
            self.provider_id
        } else {
            self.patient_id
        }
    }
}

// ==============================================================================
// OPERATION INPUTS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: SlotTime,
    pub location: Option<String>,
    pub kind: AppointmentKind,
    pub reason: String,
    pub patient_notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AcceptAppointment {
    pub date: Option<NaiveDate>,
    pub time: Option<SlotTime>,
    pub location: Option<String>,
    pub provider_notes: Option<String>,
}

/// Patient-side edits. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub date: Option<NaiveDate>,
    pub time: Option<SlotTime>,
    pub location: Option<String>,
    pub kind: Option<AppointmentKind>,
    pub reason: Option<String>,
    pub patient_notes: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentChanges {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.time.is_none()
            && self.location.is_none()
            && self.kind.is_none()
            && self.reason.is_none()
            && self.patient_notes.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RescheduleProposal {
    pub date: NaiveDate,
    pub time: SlotTime,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone)]
pub struct RescheduleDecision {
    pub action: RescheduleAction,
    pub override_date: Option<NaiveDate>,
    pub override_time: Option<SlotTime>,
}

// ==============================================================================
// OPERATION RESULTS
// ==============================================================================

/// A committed transition. A failed inbox write shows up as a warning and
/// never undoes the transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub appointment: Appointment,
    pub notification_warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModificationWindow {
    pub can_be_modified: bool,
    pub hours_until: f64,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AppointmentError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppointmentError::Validation(format!("{} '{}' must be YYYY-MM-DD", field, value)))
}

fn parse_optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppointmentError> {
    value.map(|v| parse_date(field, v)).transpose()
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<SlotTime>, AppointmentError> {
    value.map(SlotTime::parse).transpose()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub provider_id: Uuid,
    pub date: String,
    pub time: String,
    pub location: Option<String>,
    pub kind: AppointmentKind,
    pub reason: String,
    pub patient_notes: Option<String>,
}

impl CreateAppointmentRequest {
    pub fn into_domain(self) -> Result<NewAppointment, AppointmentError> {
        Ok(NewAppointment {
            provider_id: self.provider_id,
            date: parse_date("date", &self.date)?,
            time: SlotTime::parse(&self.time)?,
            location: self.location,
            kind: self.kind,
            reason: self.reason,
            patient_notes: self.patient_notes,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcceptAppointmentRequest {
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub provider_notes: Option<String>,
}

impl AcceptAppointmentRequest {
    pub fn into_domain(self) -> Result<AcceptAppointment, AppointmentError> {
        Ok(AcceptAppointment {
            date: parse_optional_date("date", self.date.as_deref())?,
            time: parse_optional_time(self.time.as_deref())?,
            location: self.location,
            provider_notes: self.provider_notes,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectAppointmentRequest {
    pub provider_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub kind: Option<AppointmentKind>,
    pub reason: Option<String>,
    pub patient_notes: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl UpdateAppointmentRequest {
    pub fn into_domain(self) -> Result<AppointmentChanges, AppointmentError> {
        Ok(AppointmentChanges {
            date: parse_optional_date("date", self.date.as_deref())?,
            time: parse_optional_time(self.time.as_deref())?,
            location: self.location,
            kind: self.kind,
            reason: self.reason,
            patient_notes: self.patient_notes,
            status: self.status,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequestBody {
    pub requested_date: String,
    pub requested_time: String,
    pub reason: String,
}

impl RescheduleRequestBody {
    pub fn into_domain(self) -> Result<RescheduleProposal, AppointmentError> {
        Ok(RescheduleProposal {
            date: parse_date("requested_date", &self.requested_date)?,
            time: SlotTime::parse(&self.requested_time)?,
            reason: self.reason,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRescheduleRequest {
    pub action: RescheduleAction,
    pub override_date: Option<String>,
    pub override_time: Option<String>,
}

impl ResolveRescheduleRequest {
    pub fn into_domain(self) -> Result<RescheduleDecision, AppointmentError> {
        Ok(RescheduleDecision {
            action: self.action,
            override_date: parse_optional_date("override_date", self.override_date.as_deref())?,
            override_time: parse_optional_time(self.override_time.as_deref())?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<AppointmentStatus>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Slot {date} {time} is no longer available for provider {provider_id}")]
    SlotUnavailable {
        provider_id: Uuid,
        date: NaiveDate,
        time: SlotTime,
    },

    #[error("cannot move from {from} to {to} as {role}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
        role: ActorRole,
    },

    #[error("Appointment can no longer be modified ({hours_until:.1}h until start, more than 24h required)")]
    ModificationWindowClosed { hours_until: f64 },

    #[error("Appointment is already {current} and cannot move to {attempted}")]
    AlreadyFinalized {
        current: AppointmentStatus,
        attempted: AppointmentStatus,
    },

    #[error("Appointment {0} was changed by another request, reload and retry")]
    ConcurrentModification(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::NotFound(_) => AppError::NotFound(err.to_string()),
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::InvalidTransition { from, to, .. } => AppError::InvalidState {
                message: err.to_string(),
                current_status: from.to_string(),
                attempted_status: Some(to.to_string()),
            },
            AppointmentError::AlreadyFinalized { current, attempted } => AppError::InvalidState {
                message: err.to_string(),
                current_status: current.to_string(),
                attempted_status: Some(attempted.to_string()),
            },
            AppointmentError::SlotUnavailable { .. }
            | AppointmentError::ModificationWindowClosed { .. }
            | AppointmentError::ConcurrentModification(_) => AppError::Conflict(err.to_string()),
            AppointmentError::Storage(msg) => AppError::Database(msg),
        }
    }
}
