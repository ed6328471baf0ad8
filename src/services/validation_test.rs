use super::*;

#[test]
fn required_trims_and_rejects_blank() {
    assert_eq!(required("title", "  Road repair  ", MAX_TITLE_LEN), Ok("Road repair".to_owned()));
    let err = required("title", "   ", MAX_TITLE_LEN).unwrap_err();
    assert_eq!(err.field, "title");
    assert_eq!(err.message, "is required");
}

#[test]
fn required_counts_characters_not_bytes() {
    let name = "陳".repeat(MAX_NAME_LEN);
    assert!(required("name", &name, MAX_NAME_LEN).is_ok());
    let too_long = "陳".repeat(MAX_NAME_LEN + 1);
    assert!(required("name", &too_long, MAX_NAME_LEN).is_err());
}

#[test]
fn optional_blank_becomes_none() {
    assert_eq!(optional("address", None, 10), Ok(None));
    assert_eq!(optional("address", Some("   "), 10), Ok(None));
    assert_eq!(optional("address", Some(" Lane 5 "), 10), Ok(Some("Lane 5".to_owned())));
    assert!(optional("address", Some("a very long address"), 5).is_err());
}

#[test]
fn phone_accepts_common_formats() {
    assert_eq!(phone("phone", "0912-345-678"), Ok("0912345678".to_owned()));
    assert_eq!(phone("phone", "(02) 2345 6789"), Ok("0223456789".to_owned()));
    assert_eq!(phone("phone", "+886 912 345 678"), Ok("+886912345678".to_owned()));
}

#[test]
fn phone_rejects_bad_shapes() {
    assert!(phone("phone", "").is_err());
    assert!(phone("phone", "12345").is_err());
    assert!(phone("phone", "0912abc678").is_err());
    assert!(phone("phone", "1234567890123456").is_err());
    assert!(phone("phone", "++886912345678").is_err());
}

#[test]
fn optional_email_validates_and_lowercases() {
    assert_eq!(optional_email("email", None), Ok(None));
    assert_eq!(optional_email("email", Some("")), Ok(None));
    assert_eq!(
        optional_email("email", Some(" Voter@Example.COM ")),
        Ok(Some("voter@example.com".to_owned()))
    );
    assert!(optional_email("email", Some("voter@example")).is_err());
    assert!(optional_email("email", Some("voter example@x.com")).is_err());
    assert!(optional_email("email", Some("@example.com")).is_err());
}

#[test]
fn one_of_lists_accepted_values() {
    fn parse(raw: &str) -> Option<u8> {
        match raw {
            "a" => Some(1),
            "b" => Some(2),
            _ => None,
        }
    }
    assert_eq!(one_of("kind", " a ", parse, &["a", "b"]), Ok(1));
    let err = one_of("kind", "c", parse, &["a", "b"]).unwrap_err();
    assert_eq!(err.message, "must be one of: a, b");
}

#[test]
fn field_error_display() {
    let err = FieldError { field: "phone", message: "is required".into() };
    assert_eq!(err.to_string(), "phone: is required");
}

#[test]
fn field_error_is_the_source_of_wrapping_errors() {
    use std::error::Error as _;
    let err = crate::services::voter::VoterError::from(FieldError { field: "contact_phone", message: "bad".into() });
    let source = err.source().expect("field error should be the source");
    assert_eq!(source.to_string(), "contact_phone: bad");
}

#[test]
fn nullable_distinguishes_absent_from_null() {
    #[derive(serde::Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        title: Option<Option<String>>,
    }
    let absent: Patch = serde_json::from_str("{}").unwrap();
    assert_eq!(absent.title, None);
    let null: Patch = serde_json::from_str(r#"{"title": null}"#).unwrap();
    assert_eq!(null.title, Some(None));
    let set: Patch = serde_json::from_str(r#"{"title": "Aide"}"#).unwrap();
    assert_eq!(set.title, Some(Some("Aide".to_owned())));
}
