use super::*;
use crate::services::validation::FieldError;

#[test]
fn member_errors_map_to_status() {
    let id = Uuid::nil();
    let cases = [
        (MemberError::NotMember(id), StatusCode::FORBIDDEN, "not_member"),
        (MemberError::NotFound(id), StatusCode::NOT_FOUND, "not_found"),
        (MemberError::Forbidden("nope"), StatusCode::FORBIDDEN, "forbidden"),
        (MemberError::LastPolitician, StatusCode::CONFLICT, "last_politician"),
        (MemberError::InvalidRole("boss".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        (MemberError::Database(sqlx::Error::RowNotFound), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    ];
    for (err, status, code) in cases {
        let api = member_error_to_api(err);
        assert_eq!(api.status, status);
        assert_eq!(api.code, code);
    }
}

#[test]
fn forbidden_reason_is_the_message() {
    let api = member_error_to_api(MemberError::Forbidden("managers cannot remove other managers"));
    assert_eq!(api.message, "managers cannot remove other managers");
}

#[test]
fn group_errors_map_to_status() {
    let invalid = group_error_to_api(GroupError::Invalid(FieldError { field: "name", message: "is required".into() }));
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.code, "validation");

    assert_eq!(group_error_to_api(GroupError::NotFound(Uuid::nil())).status, StatusCode::NOT_FOUND);
    assert_eq!(group_error_to_api(GroupError::UnknownCounty(99)).code, "unknown_county");

    let conflict = group_error_to_api(GroupError::AlreadyMember);
    assert_eq!(conflict.status, StatusCode::CONFLICT);
    assert_eq!(conflict.code, "already_member");

    let access = group_error_to_api(GroupError::Access(MemberError::NotMember(Uuid::nil())));
    assert_eq!(access.code, "not_member");
}

#[test]
fn member_update_parses_role_and_title() {
    let body: UpdateMemberBody = serde_json::from_str(r#"{"role": "manager", "title": " Chief of staff "}"#).unwrap();
    let update = parse_member_update(body).unwrap();
    assert_eq!(update.role, Some(Role::Manager));
    assert_eq!(update.title, Some(Some("Chief of staff".to_owned())));
}

#[test]
fn member_update_null_title_clears_and_absent_keeps() {
    let body: UpdateMemberBody = serde_json::from_str(r#"{"title": null}"#).unwrap();
    let update = parse_member_update(body).unwrap();
    assert_eq!(update.role, None);
    assert_eq!(update.title, Some(None));

    let update = parse_member_update(UpdateMemberBody::default()).unwrap();
    assert_eq!(update.title, None);
}

#[test]
fn member_update_rejects_unknown_role() {
    let body = UpdateMemberBody { role: Some("boss".into()), title: None };
    let err = parse_member_update(body).unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert!(err.message.contains("politician, manager, staff"));
}

#[test]
fn create_body_county_is_optional() {
    let body: CreateGroupBody = serde_json::from_str(r#"{"name": "Office", "politician_name": "Wang"}"#).unwrap();
    assert_eq!(body.county_id, None);
}
