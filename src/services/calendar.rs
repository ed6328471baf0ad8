//! Calendar integration: put a case on the office's Google Calendar.
//!
//! Thin HTTP wrapper for `POST /calendars/{id}/events`. The trait seam lets
//! routes and tests run without Google; pure request building and response
//! parsing are split out for testability.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::config::CalendarConfig;
use crate::services::case::{self, CaseError};

const REQUEST_TIMEOUT_SECS: u64 = 20;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar integration is not configured")]
    NotConfigured,
    #[error("invalid {field}: expected an RFC 3339 timestamp")]
    InvalidTime { field: &'static str },
    #[error("event end must be after its start")]
    EndBeforeStart,
    #[error("calendar client build failed: {0}")]
    HttpClientBuild(String),
    #[error("calendar request failed: {0}")]
    Request(String),
    #[error("calendar API returned {status}: {body}")]
    Response { status: u16, body: String },
    #[error("calendar response parse failed: {0}")]
    Parse(String),
    #[error(transparent)]
    Case(#[from] CaseError),
}

/// Event to create, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Body of the case calendar endpoint. Times are RFC 3339 strings.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseEventRequest {
    pub start: String,
    pub end: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub id: String,
    pub html_link: Option<String>,
}

#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, CalendarError>;
}

// =============================================================================
// GOOGLE CLIENT
// =============================================================================

pub struct GoogleCalendarClient {
    http: reqwest::Client,
    config: CalendarConfig,
}

impl GoogleCalendarClient {
    /// # Errors
    ///
    /// Returns [`CalendarError::HttpClientBuild`] if the HTTP client cannot
    /// be constructed.
    pub fn new(config: CalendarConfig) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CalendarError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config })
    }
}

/// `{base}/calendars/{calendar_id}/events` with the id percent-encoded.
pub(crate) fn events_url(base_url: &str, calendar_id: &str) -> Result<reqwest::Url, CalendarError> {
    let mut url = reqwest::Url::parse(base_url).map_err(|e| CalendarError::HttpClientBuild(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| CalendarError::HttpClientBuild(format!("base url cannot be a base: {base_url}")))?
        .pop_if_empty()
        .extend(["calendars", calendar_id, "events"]);
    Ok(url)
}

#[async_trait]
impl CalendarApi for GoogleCalendarClient {
    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, CalendarError> {
        let url = events_url(&self.config.base_url, &self.config.calendar_id)?;
        let body = ApiEvent::from_draft(draft)?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| CalendarError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(CalendarError::Response { status, body: text });
        }

        parse_response(&text)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct ApiEvent<'a> {
    summary: &'a str,
    description: &'a str,
    start: ApiEventTime,
    end: ApiEventTime,
}

#[derive(Debug, Serialize)]
struct ApiEventTime {
    #[serde(rename = "dateTime")]
    date_time: String,
}

impl<'a> ApiEvent<'a> {
    fn from_draft(draft: &'a EventDraft) -> Result<Self, CalendarError> {
        let format = |t: OffsetDateTime| t.format(&Rfc3339).map_err(|e| CalendarError::Parse(e.to_string()));
        Ok(Self {
            summary: &draft.summary,
            description: &draft.description,
            start: ApiEventTime { date_time: format(draft.start)? },
            end: ApiEventTime { date_time: format(draft.end)? },
        })
    }
}

#[derive(Deserialize)]
struct ApiEventResponse {
    id: String,
    #[serde(rename = "htmlLink")]
    html_link: Option<String>,
}

fn parse_response(json: &str) -> Result<CalendarEvent, CalendarError> {
    let api: ApiEventResponse = serde_json::from_str(json).map_err(|e| CalendarError::Parse(e.to_string()))?;
    Ok(CalendarEvent { id: api.id, html_link: api.html_link })
}

// =============================================================================
// CASE EVENTS
// =============================================================================

/// Parse and order-check caller-supplied event times.
///
/// # Errors
///
/// Returns [`CalendarError::InvalidTime`] or [`CalendarError::EndBeforeStart`].
pub fn parse_window(start: &str, end: &str) -> Result<(OffsetDateTime, OffsetDateTime), CalendarError> {
    let start = OffsetDateTime::parse(start.trim(), &Rfc3339).map_err(|_| CalendarError::InvalidTime { field: "start" })?;
    let end = OffsetDateTime::parse(end.trim(), &Rfc3339).map_err(|_| CalendarError::InvalidTime { field: "end" })?;
    if end <= start {
        return Err(CalendarError::EndBeforeStart);
    }
    Ok((start, end))
}

/// Build the event body from a case. Contact details are included so the
/// calendar entry is usable on its own.
#[must_use]
pub fn draft_for_case(detail: &case::CaseDetail, start: OffsetDateTime, end: OffsetDateTime, note: Option<&str>) -> EventDraft {
    let mut description = detail.case.description.clone();
    if let Some(voter) = &detail.voter {
        if !description.is_empty() {
            description.push_str("\n\n");
        }
        description.push_str(&format!("Contact: {} ({})", voter.name, voter.phone));
    }
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        if !description.is_empty() {
            description.push_str("\n\n");
        }
        description.push_str(note);
    }
    EventDraft {
        summary: format!("[Case] {}", detail.case.title),
        description,
        start,
        end,
    }
}

/// Create a calendar event for a case the viewer can see.
///
/// # Errors
///
/// Returns [`CalendarError::NotConfigured`] when no calendar is set up, a
/// time error for bad input, or the upstream failure.
pub async fn create_case_event(
    pool: &PgPool,
    calendar: Option<&dyn CalendarApi>,
    group_id: Uuid,
    case_id: Uuid,
    viewer_id: Uuid,
    request: &CaseEventRequest,
) -> Result<CalendarEvent, CalendarError> {
    let calendar = calendar.ok_or(CalendarError::NotConfigured)?;
    let (start, end) = parse_window(&request.start, &request.end)?;
    let detail = case::get_case(pool, group_id, case_id, viewer_id).await?;
    let draft = draft_for_case(&detail, start, end, request.note.as_deref());

    let event = calendar.create_event(&draft).await?;
    tracing::info!(%group_id, %case_id, event_id = %event.id, "calendar event created");
    Ok(event)
}

#[cfg(test)]
#[path = "calendar_test.rs"]
mod tests;
