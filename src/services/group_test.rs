use super::*;

#[test]
fn new_group_validation_trims_fields() {
    let input = NewGroup {
        name: "  Legislator Lin Office ".into(),
        politician_name: " Lin ".into(),
        county_id: Some(1),
    };
    let validated = input.validated().unwrap();
    assert_eq!(validated.name, "Legislator Lin Office");
    assert_eq!(validated.politician_name, "Lin");
    assert_eq!(validated.county_id, Some(1));
}

#[test]
fn new_group_requires_politician_name() {
    let input = NewGroup { name: "Office".into(), politician_name: " ".into(), county_id: None };
    let err = input.validated().unwrap_err();
    assert_eq!(err.field, "politician_name");
}

#[test]
fn non_unique_errors_stay_database_errors() {
    let err = map_unique_violation(sqlx::Error::RowNotFound);
    assert!(matches!(err, GroupError::Database(sqlx::Error::RowNotFound)));
}

#[tokio::test]
async fn create_group_validates_before_db() {
    let state = crate::state::test_helpers::test_app_state();
    let input = NewGroup { name: String::new(), politician_name: "Lin".into(), county_id: None };
    let err = create_group(&state.pool, Uuid::new_v4(), input).await.unwrap_err();
    assert!(matches!(err, GroupError::Invalid(ref f) if f.field == "name"));
}

#[test]
fn group_row_serializes_created_at_as_rfc3339() {
    let row = GroupRow {
        id: Uuid::nil(),
        name: "Office".into(),
        politician_name: "Lin".into(),
        county_id: None,
        owner_id: Uuid::nil(),
        created_at: OffsetDateTime::UNIX_EPOCH,
    };
    let json = serde_json::to_value(&row).unwrap();
    assert_eq!(json["created_at"], "1970-01-01T00:00:00Z");
    assert!(json["county_id"].is_null());
}
