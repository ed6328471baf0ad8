use super::*;

fn row(uses: i32, max_uses: i32, expires_in_hours: i64, revoked: bool) -> InvitationRow {
    let now = OffsetDateTime::now_utc();
    InvitationRow {
        id: Uuid::new_v4(),
        group_id: Uuid::new_v4(),
        code: "ABCD2345".into(),
        role: "staff".into(),
        created_by: None,
        expires_at: now + time::Duration::hours(expires_in_hours),
        max_uses,
        uses,
        revoked_at: revoked.then_some(now),
        created_at: now,
    }
}

#[test]
fn generated_codes_normalize_to_themselves() {
    for _ in 0..20 {
        let code = generate_invitation_code();
        assert_eq!(code.len(), CODE_LEN);
        assert_eq!(normalize_invitation_code(&code), Some(code));
    }
}

#[test]
fn normalize_accepts_lowercase_and_separators() {
    assert_eq!(normalize_invitation_code(" abcd-2345 "), Some("ABCD2345".to_owned()));
    assert_eq!(normalize_invitation_code("ABCD 2345"), Some("ABCD2345".to_owned()));
}

#[test]
fn normalize_rejects_ambiguous_and_wrong_length() {
    assert_eq!(normalize_invitation_code("ABCD234"), None);
    assert_eq!(normalize_invitation_code("ABCD23456"), None);
    // 0, 1, I and O are excluded from the alphabet.
    assert_eq!(normalize_invitation_code("ABCD2340"), None);
    assert_eq!(normalize_invitation_code("ABCDI234"), None);
    assert_eq!(normalize_invitation_code(""), None);
}

#[test]
fn new_invitation_defaults_are_valid() {
    let input = NewInvitation::default();
    assert_eq!(input.role, Role::Staff);
    assert_eq!(input.ttl_hours, DEFAULT_TTL_HOURS);
    assert_eq!(input.max_uses, DEFAULT_MAX_USES);
    assert!(input.check().is_ok());
}

#[test]
fn new_invitation_rejects_politician_role() {
    let input = NewInvitation { role: Role::Politician, ..NewInvitation::default() };
    assert!(matches!(input.check(), Err(InvitationError::PoliticianRole)));
}

#[test]
fn new_invitation_bounds() {
    let zero_ttl = NewInvitation { ttl_hours: 0, ..NewInvitation::default() };
    assert!(matches!(zero_ttl.check(), Err(InvitationError::InvalidTtl)));
    let long_ttl = NewInvitation { ttl_hours: MAX_TTL_HOURS + 1, ..NewInvitation::default() };
    assert!(matches!(long_ttl.check(), Err(InvitationError::InvalidTtl)));
    let zero_uses = NewInvitation { max_uses: 0, ..NewInvitation::default() };
    assert!(matches!(zero_uses.check(), Err(InvitationError::InvalidMaxUses)));
    let many_uses = NewInvitation { max_uses: MAX_MAX_USES, role: Role::Manager, ..NewInvitation::default() };
    assert!(many_uses.check().is_ok());
}

#[test]
fn group_errors_convert_without_leaking_details() {
    assert!(matches!(InvitationError::from(GroupError::AlreadyMember), InvitationError::AlreadyMember));
    assert!(matches!(
        InvitationError::from(GroupError::NotFound(Uuid::nil())),
        InvitationError::InvalidCode
    ));
}

#[tokio::test]
async fn join_rejects_malformed_code_before_db() {
    let state = crate::state::test_helpers::test_app_state();
    let err = join_with_code(&state.pool, Uuid::new_v4(), "nope").await.unwrap_err();
    assert!(matches!(err, InvitationError::InvalidCode));
}

#[tokio::test]
async fn preview_rejects_malformed_code_before_db() {
    let state = crate::state::test_helpers::test_app_state();
    let err = preview_invitation(&state.pool, "1111").await.unwrap_err();
    assert!(matches!(err, InvitationError::InvalidCode));
}

#[test]
fn invitation_row_serializes_missing_revocation_as_null() {
    let json = serde_json::to_value(row(0, 1, 1, false)).unwrap();
    assert!(json["revoked_at"].is_null());
    assert_eq!(json["code"], "ABCD2345");
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::services::group::{NewGroup, create_group};
    use sqlx::postgres::PgPoolOptions;

    async fn pool() -> PgPool {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL required");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .expect("connect");
        sqlx::migrate!("src/db/migrations").run(&pool).await.expect("migrate");
        pool
    }

    async fn user(pool: &PgPool) -> Uuid {
        sqlx::query_scalar("INSERT INTO users (email, name) VALUES ($1, 'U') RETURNING id")
            .bind(format!("inv-{}@example.com", Uuid::new_v4()))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn last_use_is_claimed_exactly_once() {
        let pool = pool().await;
        let owner = user(&pool).await;
        let group = create_group(
            &pool,
            owner,
            NewGroup { name: "Race Office".into(), politician_name: "Lin".into(), county_id: None },
        )
        .await
        .unwrap();
        let invitation = create_invitation(&pool, group.group.id, owner, NewInvitation::default())
            .await
            .unwrap();

        let a = user(&pool).await;
        let b = user(&pool).await;
        let (ra, rb) = tokio::join!(
            join_with_code(&pool, a, &invitation.code),
            join_with_code(&pool, b, &invitation.code)
        );
        let successes = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1, "exactly one joiner should claim the single use");

        let uses: i32 = sqlx::query_scalar("SELECT uses FROM team_invitations WHERE id = $1")
            .bind(invitation.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(uses, 1);
    }

    async fn office(pool: &PgPool, owner: Uuid) -> Uuid {
        create_group(pool, owner, NewGroup { name: "Rejoin Office".into(), politician_name: "Lin".into(), county_id: None })
            .await
            .unwrap()
            .group
            .id
    }

    async fn uses_of(pool: &PgPool, id: Uuid) -> i32 {
        sqlx::query_scalar("SELECT uses FROM team_invitations WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rejoining_as_active_member_keeps_the_use() {
        let pool = pool().await;
        let owner = user(&pool).await;
        let gid = office(&pool, owner).await;
        let invitation = create_invitation(&pool, gid, owner, NewInvitation { max_uses: 2, ..Default::default() })
            .await
            .unwrap();

        let a = user(&pool).await;
        let first = join_with_code(&pool, a, &invitation.code).await.unwrap();
        let again = join_with_code(&pool, a, &invitation.code).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(uses_of(&pool, invitation.id).await, 1);

        let b = user(&pool).await;
        join_with_code(&pool, b, &invitation.code).await.unwrap();
        assert_eq!(uses_of(&pool, invitation.id).await, 2);
    }

    #[tokio::test]
    async fn expired_revoked_and_exhausted_codes_are_invalid() {
        let pool = pool().await;
        let owner = user(&pool).await;
        let gid = office(&pool, owner).await;

        let expired = create_invitation(&pool, gid, owner, NewInvitation::default()).await.unwrap();
        sqlx::query("UPDATE team_invitations SET expires_at = now() - interval '1 minute' WHERE id = $1")
            .bind(expired.id)
            .execute(&pool)
            .await
            .unwrap();

        let revoked = create_invitation(&pool, gid, owner, NewInvitation::default()).await.unwrap();
        revoke_invitation(&pool, gid, owner, revoked.id).await.unwrap();

        let exhausted = create_invitation(&pool, gid, owner, NewInvitation::default()).await.unwrap();
        join_with_code(&pool, user(&pool).await, &exhausted.code).await.unwrap();

        for code in [&expired.code, &revoked.code, &exhausted.code] {
            assert!(matches!(preview_invitation(&pool, code).await, Err(InvitationError::InvalidCode)));
            let joiner = user(&pool).await;
            assert!(matches!(join_with_code(&pool, joiner, code).await, Err(InvitationError::InvalidCode)));
        }
        assert_eq!(uses_of(&pool, exhausted.id).await, 1);
    }
}
