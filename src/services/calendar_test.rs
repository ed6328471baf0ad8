use super::*;
use crate::services::case::{CaseDetail, CaseRow};
use crate::services::voter::VoterRow;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingCalendar {
    drafts: Mutex<Vec<EventDraft>>,
}

#[async_trait]
impl CalendarApi for CapturingCalendar {
    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, CalendarError> {
        self.drafts.lock().expect("calendar mutex should lock").push(draft.clone());
        Ok(CalendarEvent { id: "evt_1".into(), html_link: None })
    }
}

fn detail(description: &str, with_voter: bool) -> CaseDetail {
    let now = OffsetDateTime::UNIX_EPOCH;
    CaseDetail {
        case: CaseRow {
            id: Uuid::nil(),
            group_id: Uuid::nil(),
            title: "Flooded underpass".into(),
            description: description.into(),
            status: "pending".into(),
            priority: "urgent".into(),
            contact_method: "phone".into(),
            received_at: now,
            closed_at: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        },
        voter: with_voter.then(|| VoterRow {
            id: Uuid::nil(),
            group_id: Uuid::nil(),
            name: "Chen".into(),
            phone: "0912345678".into(),
            email: None,
            address: None,
            line_id: None,
            created_at: now,
        }),
        category: None,
        district: None,
        in_charge: None,
        accepted_by: None,
        participants: vec![],
    }
}

#[test]
fn parse_window_accepts_offsets() {
    let (start, end) = parse_window("2026-05-01T09:00:00+08:00", "2026-05-01T02:00:00Z").unwrap();
    assert_eq!(end - start, time::Duration::hours(1));
}

#[test]
fn parse_window_rejects_bad_input() {
    assert!(matches!(
        parse_window("tomorrow", "2026-05-01T10:00:00Z"),
        Err(CalendarError::InvalidTime { field: "start" })
    ));
    assert!(matches!(
        parse_window("2026-05-01T10:00:00Z", "2026-05-01"),
        Err(CalendarError::InvalidTime { field: "end" })
    ));
    assert!(matches!(
        parse_window("2026-05-01T10:00:00Z", "2026-05-01T10:00:00Z"),
        Err(CalendarError::EndBeforeStart)
    ));
}

#[test]
fn draft_includes_contact_and_note() {
    let (start, end) = parse_window("2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z").unwrap();
    let draft = draft_for_case(&detail("Water knee deep", true), start, end, Some(" bring boots "));
    assert_eq!(draft.summary, "[Case] Flooded underpass");
    assert_eq!(draft.description, "Water knee deep\n\nContact: Chen (0912345678)\n\nbring boots");
}

#[test]
fn draft_without_description_has_no_leading_blank_lines() {
    let (start, end) = parse_window("2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z").unwrap();
    let draft = draft_for_case(&detail("", false), start, end, Some("site visit"));
    assert_eq!(draft.description, "site visit");
}

#[test]
fn events_url_encodes_calendar_id() {
    let url = events_url("https://www.googleapis.com/calendar/v3", "office@group.calendar.google.com").unwrap();
    assert_eq!(
        url.as_str(),
        "https://www.googleapis.com/calendar/v3/calendars/office@group.calendar.google.com/events"
    );
    let url = events_url("http://localhost:9000/", "a b").unwrap();
    assert_eq!(url.as_str(), "http://localhost:9000/calendars/a%20b/events");
}

#[test]
fn api_event_uses_google_field_names() {
    let (start, end) = parse_window("2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z").unwrap();
    let draft = draft_for_case(&detail("", false), start, end, None);
    let json = serde_json::to_value(ApiEvent::from_draft(&draft).unwrap()).unwrap();
    assert_eq!(json["start"]["dateTime"], "2026-05-01T09:00:00Z");
    assert_eq!(json["end"]["dateTime"], "2026-05-01T10:00:00Z");
    assert_eq!(json["summary"], "[Case] Flooded underpass");
}

#[test]
fn parse_response_reads_id_and_link() {
    let event = parse_response(r#"{"id":"abc","htmlLink":"https://calendar.google.com/e/abc","status":"confirmed"}"#)
        .unwrap();
    assert_eq!(event, CalendarEvent { id: "abc".into(), html_link: Some("https://calendar.google.com/e/abc".into()) });
    assert!(matches!(parse_response("not json"), Err(CalendarError::Parse(_))));
}

#[tokio::test]
async fn create_case_event_requires_configuration() {
    let state = crate::state::test_helpers::test_app_state();
    let request = CaseEventRequest {
        start: "2026-05-01T09:00:00Z".into(),
        end: "2026-05-01T10:00:00Z".into(),
        note: None,
    };
    let err = create_case_event(&state.pool, None, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), &request)
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::NotConfigured));
}

#[tokio::test]
async fn create_case_event_checks_window_before_db() {
    let calendar = Arc::new(CapturingCalendar::default());
    let state = crate::state::test_helpers::test_app_state_with_calendar(calendar.clone());
    let request = CaseEventRequest {
        start: "2026-05-01T10:00:00Z".into(),
        end: "2026-05-01T09:00:00Z".into(),
        note: None,
    };
    let err = create_case_event(
        &state.pool,
        state.calendar.as_deref(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        &request,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CalendarError::EndBeforeStart));
    assert!(calendar.drafts.lock().unwrap().is_empty());
}

#[test]
fn google_client_builds_from_config() {
    let client = GoogleCalendarClient::new(CalendarConfig {
        access_token: "token".into(),
        calendar_id: "primary".into(),
        base_url: crate::config::DEFAULT_GOOGLE_CALENDAR_BASE_URL.into(),
    });
    assert!(client.is_ok());
}
