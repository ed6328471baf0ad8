//! Case service: intake, status tracking, assignment and export.
//!
//! DESIGN
//! ======
//! A case is one `cases` row plus single-valued relation rows
//! (`voter_cases`, `category_cases`, `district_cases`, `in_charge_cases`,
//! `acceptance_cases`, each keyed by `case_id`) and the multi-valued
//! `case_members` participant set.
//!
//! Intake runs every write in one transaction. Each step is recorded as a
//! [`CaseStep`]; the first failing step aborts the transaction (the
//! `Transaction` is dropped without commit) and the error names the step.
//!
//! `closed_at` is stamped when a case enters `completed` or `closed` and
//! cleared when it moves back to `pending` or `processing`. Moving between
//! the two closed states keeps the original stamp.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::member::{self, MemberError, MemberRow};
use crate::services::reference::{self, Category, MAX_CATEGORY_LEN};
use crate::services::validation::{self, FieldError};
use crate::services::voter::{self, VoterContact, VoterRow};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    Processing,
    Completed,
    Closed,
}

impl CaseStatus {
    pub const ALL: [&'static str; 4] = ["pending", "processing", "completed", "closed"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Closed => "closed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Whether entering this status stamps `closed_at`.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Completed | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    Urgent,
}

impl Priority {
    pub const ALL: [&'static str; 3] = ["low", "normal", "urgent"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Urgent => "urgent",
        }
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Phone,
    Line,
    Email,
    WalkIn,
    Other,
}

impl ContactMethod {
    pub const ALL: [&'static str; 5] = ["phone", "line", "email", "walk_in", "other"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Line => "line",
            Self::Email => "email",
            Self::WalkIn => "walk_in",
            Self::Other => "other",
        }
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "phone" => Some(Self::Phone),
            "line" => Some(Self::Line),
            "email" => Some(Self::Email),
            "walk_in" => Some(Self::WalkIn),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Transactional intake steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStepKind {
    UpsertVoter,
    UpsertCategory,
    InsertCase,
    LinkVoter,
    LinkCategory,
    LinkDistrict,
    LinkInCharge,
    LinkAcceptance,
    LinkParticipants,
}

impl CaseStepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpsertVoter => "upsert_voter",
            Self::UpsertCategory => "upsert_category",
            Self::InsertCase => "insert_case",
            Self::LinkVoter => "link_voter",
            Self::LinkCategory => "link_category",
            Self::LinkDistrict => "link_district",
            Self::LinkInCharge => "link_in_charge",
            Self::LinkAcceptance => "link_acceptance",
            Self::LinkParticipants => "link_participants",
        }
    }
}

impl std::fmt::Display for CaseStepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaseStep {
    pub step: CaseStepKind,
    pub ok: bool,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("invalid input: {0}")]
    Invalid(#[from] FieldError),
    #[error("case not found: {0}")]
    NotFound(Uuid),
    #[error("district not found: {0}")]
    UnknownDistrict(i32),
    #[error("member is not active in this group: {0}")]
    UnknownMember(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("case step {step} failed: {source}")]
    Step {
        step: CaseStepKind,
        #[source]
        source: Box<CaseError>,
    },
    #[error(transparent)]
    Access(#[from] MemberError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CaseError {
    /// The error underneath any step wrapper.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

// =============================================================================
// ROWS
// =============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CaseRow {
    pub id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub contact_method: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub created_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

const CASE_COLUMNS: &str = "id, group_id, title, description, status, priority, contact_method, \
                            received_at, closed_at, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DistrictRef {
    pub id: i32,
    pub name: String,
    pub county_id: i32,
    pub county_name: String,
}

/// A member as shown on a case.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MemberSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub role: String,
    pub title: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseDetail {
    #[serde(flatten)]
    pub case: CaseRow,
    pub voter: Option<VoterRow>,
    pub category: Option<Category>,
    pub district: Option<DistrictRef>,
    pub in_charge: Option<MemberSummary>,
    pub accepted_by: Option<MemberSummary>,
    pub participants: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseCreated {
    pub case: CaseRow,
    pub voter_id: Uuid,
    pub steps: Vec<CaseStep>,
}

/// Row in the case list with display names resolved.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CaseListItem {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub priority: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub voter_name: Option<String>,
    pub voter_phone: Option<String>,
    pub category_name: Option<String>,
    pub district_name: Option<String>,
    pub in_charge_member_id: Option<Uuid>,
    pub in_charge_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CasePage {
    pub items: Vec<CaseListItem>,
    pub limit: i64,
    pub offset: i64,
}

/// Flattened case for NDJSON export.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CaseExportRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub contact_method: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub voter_name: Option<String>,
    pub voter_phone: Option<String>,
    pub voter_email: Option<String>,
    pub category: Option<String>,
    pub district: Option<String>,
    pub county: Option<String>,
    pub in_charge: Option<String>,
    pub accepted_by: Option<String>,
}

// =============================================================================
// INPUT
// =============================================================================

/// Flat intake form as posted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseForm {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub contact_method: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub received_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub contact_phone: String,
    pub contact_email: Option<String>,
    pub contact_address: Option<String>,
    pub contact_line_id: Option<String>,
    pub category: Option<String>,
    pub district_id: Option<i32>,
    pub in_charge_member_id: Option<Uuid>,
    pub acceptance_member_id: Option<Uuid>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
}

/// Validated intake form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCase {
    pub title: String,
    pub description: String,
    pub status: CaseStatus,
    pub priority: Priority,
    pub contact_method: ContactMethod,
    pub received_at: Option<OffsetDateTime>,
    pub contact: VoterContact,
    pub category: Option<String>,
    pub district_id: Option<i32>,
    pub in_charge_member_id: Option<Uuid>,
    pub acceptance_member_id: Option<Uuid>,
    pub participant_ids: Vec<Uuid>,
}

fn parse_status(raw: &str) -> Result<CaseStatus, FieldError> {
    validation::one_of("status", raw, CaseStatus::from_str, &CaseStatus::ALL)
}

fn parse_priority(raw: &str) -> Result<Priority, FieldError> {
    validation::one_of("priority", raw, Priority::from_str, &Priority::ALL)
}

fn parse_contact_method(raw: &str) -> Result<ContactMethod, FieldError> {
    validation::one_of("contact_method", raw, ContactMethod::from_str, &ContactMethod::ALL)
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

impl CaseForm {
    /// Validate and normalize the form.
    ///
    /// # Errors
    ///
    /// Returns the first [`FieldError`] found.
    pub fn validate(self) -> Result<NewCase, FieldError> {
        let title = validation::required("title", &self.title, validation::MAX_TITLE_LEN)?;
        let description = validation::optional("description", self.description.as_deref(), validation::MAX_DESCRIPTION_LEN)?
            .unwrap_or_default();
        let contact = VoterContact::parse(
            &self.contact_name,
            &self.contact_phone,
            self.contact_email.as_deref(),
            self.contact_address.as_deref(),
            self.contact_line_id.as_deref(),
        )?;
        let status = self.status.as_deref().map(parse_status).transpose()?.unwrap_or(CaseStatus::Pending);
        let priority = self.priority.as_deref().map(parse_priority).transpose()?.unwrap_or(Priority::Normal);
        let contact_method = self
            .contact_method
            .as_deref()
            .map(parse_contact_method)
            .transpose()?
            .unwrap_or(ContactMethod::Phone);
        let category = validation::optional("category", self.category.as_deref(), MAX_CATEGORY_LEN)?;

        Ok(NewCase {
            title,
            description,
            status,
            priority,
            contact_method,
            received_at: self.received_at,
            contact,
            category,
            district_id: self.district_id,
            in_charge_member_id: self.in_charge_member_id,
            acceptance_member_id: self.acceptance_member_id,
            participant_ids: dedup(self.participant_ids),
        })
    }
}

/// Patch body for `update_case`. Absent keys are left untouched; `null`
/// clears an optional relation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CasePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub contact_method: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub received_at: Option<OffsetDateTime>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub contact_address: Option<String>,
    pub contact_line_id: Option<String>,
    #[serde(default, deserialize_with = "validation::nullable")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "validation::nullable")]
    pub district_id: Option<Option<i32>>,
    #[serde(default, deserialize_with = "validation::nullable")]
    pub in_charge_member_id: Option<Option<Uuid>>,
    pub participant_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<CaseStatus>,
    pub priority: Option<Priority>,
    pub contact_method: Option<ContactMethod>,
    pub received_at: Option<OffsetDateTime>,
    pub contact: Option<VoterContact>,
    pub category: Option<Option<String>>,
    pub district_id: Option<Option<i32>>,
    pub in_charge_member_id: Option<Option<Uuid>>,
    pub participant_ids: Option<Vec<Uuid>>,
}

impl CasePatch {
    /// Validate provided fields. Any `contact_*` field changes the voter
    /// and then requires both `contact_name` and `contact_phone`.
    ///
    /// # Errors
    ///
    /// Returns the first [`FieldError`] found.
    pub fn validate(self) -> Result<CaseUpdate, FieldError> {
        let title = self
            .title
            .as_deref()
            .map(|t| validation::required("title", t, validation::MAX_TITLE_LEN))
            .transpose()?;
        let description = self
            .description
            .as_deref()
            .map(|d| {
                validation::optional("description", Some(d), validation::MAX_DESCRIPTION_LEN).map(Option::unwrap_or_default)
            })
            .transpose()?;
        let contact = match (self.contact_name.as_deref(), self.contact_phone.as_deref()) {
            (Some(name), Some(phone)) => Some(VoterContact::parse(
                name,
                phone,
                self.contact_email.as_deref(),
                self.contact_address.as_deref(),
                self.contact_line_id.as_deref(),
            )?),
            (None, None)
                if self.contact_email.is_none() && self.contact_address.is_none() && self.contact_line_id.is_none() =>
            {
                None
            }
            (name, _) => {
                let field = if name.is_none() { "contact_name" } else { "contact_phone" };
                return Err(FieldError {
                    field,
                    message: "contact_name and contact_phone are both required to change contact details".into(),
                });
            }
        };
        let category = match self.category {
            Some(Some(name)) => Some(validation::optional("category", Some(&name), MAX_CATEGORY_LEN)?),
            other => other,
        };

        Ok(CaseUpdate {
            title,
            description,
            status: self.status.as_deref().map(parse_status).transpose()?,
            priority: self.priority.as_deref().map(parse_priority).transpose()?,
            contact_method: self.contact_method.as_deref().map(parse_contact_method).transpose()?,
            received_at: self.received_at,
            contact,
            category,
            district_id: self.district_id,
            in_charge_member_id: self.in_charge_member_id,
            participant_ids: self.participant_ids.map(dedup),
        })
    }
}

/// List filter from query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseFilter {
    pub status: Option<String>,
    pub category_id: Option<Uuid>,
    pub district_id: Option<i32>,
    pub in_charge_member_id: Option<Uuid>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CaseFilter {
    /// `(limit, offset)` clamped to `1..=MAX_LIST_LIMIT` and `>= 0`.
    #[must_use]
    pub fn page(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }

    /// Parsed status filter; a blank value means no filter.
    ///
    /// # Errors
    ///
    /// Returns a field error for a non-blank unknown status.
    pub fn status(&self) -> Result<Option<CaseStatus>, FieldError> {
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(parse_status)
            .transpose()
    }
}

// =============================================================================
// STEP LOG
// =============================================================================

#[derive(Debug, Default)]
struct StepLog {
    steps: Vec<CaseStep>,
}

impl StepLog {
    fn record<T>(&mut self, step: CaseStepKind, result: Result<T, CaseError>) -> Result<T, CaseError> {
        match result {
            Ok(value) => {
                self.steps.push(CaseStep { step, ok: true });
                Ok(value)
            }
            Err(source) => {
                tracing::warn!(%step, error = %source, "case step failed; rolling back");
                Err(CaseError::Step { step, source: Box::new(source) })
            }
        }
    }
}

// =============================================================================
// RELATION HELPERS
// =============================================================================

/// Single-valued member relations keyed by `case_id`.
#[derive(Debug, Clone, Copy)]
enum MemberLink {
    InCharge,
    Acceptance,
}

impl MemberLink {
    fn upsert_sql(self) -> &'static str {
        match self {
            Self::InCharge => {
                "INSERT INTO in_charge_cases (case_id, member_id) VALUES ($1, $2)
                 ON CONFLICT (case_id) DO UPDATE SET member_id = EXCLUDED.member_id"
            }
            Self::Acceptance => {
                "INSERT INTO acceptance_cases (case_id, member_id) VALUES ($1, $2)
                 ON CONFLICT (case_id) DO UPDATE SET member_id = EXCLUDED.member_id"
            }
        }
    }
}

async fn resolve_member(conn: &mut PgConnection, group_id: Uuid, member_id: Uuid) -> Result<MemberRow, CaseError> {
    member::find_active_member(conn, group_id, member_id)
        .await
        .map_err(|e| match e {
            MemberError::NotFound(id) => CaseError::UnknownMember(id),
            other => CaseError::Access(other),
        })
}

async fn link_member(
    conn: &mut PgConnection,
    group_id: Uuid,
    case_id: Uuid,
    member_id: Uuid,
    link: MemberLink,
) -> Result<(), CaseError> {
    resolve_member(&mut *conn, group_id, member_id).await?;
    sqlx::query(link.upsert_sql())
        .bind(case_id)
        .bind(member_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn link_voter(conn: &mut PgConnection, case_id: Uuid, voter_id: Uuid) -> Result<(), CaseError> {
    sqlx::query(
        "INSERT INTO voter_cases (case_id, voter_id) VALUES ($1, $2)
         ON CONFLICT (case_id) DO UPDATE SET voter_id = EXCLUDED.voter_id",
    )
    .bind(case_id)
    .bind(voter_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn link_category(conn: &mut PgConnection, case_id: Uuid, category_id: Uuid) -> Result<(), CaseError> {
    sqlx::query(
        "INSERT INTO category_cases (case_id, category_id) VALUES ($1, $2)
         ON CONFLICT (case_id) DO UPDATE SET category_id = EXCLUDED.category_id",
    )
    .bind(case_id)
    .bind(category_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn link_district(conn: &mut PgConnection, case_id: Uuid, district_id: i32) -> Result<(), CaseError> {
    if !reference::district_exists(&mut *conn, district_id).await? {
        return Err(CaseError::UnknownDistrict(district_id));
    }
    sqlx::query(
        "INSERT INTO district_cases (case_id, district_id) VALUES ($1, $2)
         ON CONFLICT (case_id) DO UPDATE SET district_id = EXCLUDED.district_id",
    )
    .bind(case_id)
    .bind(district_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn add_participants(conn: &mut PgConnection, group_id: Uuid, case_id: Uuid, member_ids: &[Uuid]) -> Result<(), CaseError> {
    for member_id in member_ids {
        resolve_member(&mut *conn, group_id, *member_id).await?;
        sqlx::query("INSERT INTO case_members (case_id, member_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(case_id)
            .bind(member_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn unlink(conn: &mut PgConnection, table: &'static str, case_id: Uuid) -> Result<(), CaseError> {
    sqlx::query(&format!("DELETE FROM {table} WHERE case_id = $1"))
        .bind(case_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Lock the case row for the rest of the transaction.
async fn lock_case(conn: &mut PgConnection, group_id: Uuid, case_id: Uuid) -> Result<(), CaseError> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM cases WHERE id = $1 AND group_id = $2 FOR UPDATE")
        .bind(case_id)
        .bind(group_id)
        .fetch_optional(conn)
        .await?
        .ok_or(CaseError::NotFound(case_id))?;
    Ok(())
}

async fn current_in_charge(conn: &mut PgConnection, case_id: Uuid) -> Result<Option<Uuid>, CaseError> {
    Ok(sqlx::query_scalar("SELECT member_id FROM in_charge_cases WHERE case_id = $1")
        .bind(case_id)
        .fetch_optional(conn)
        .await?)
}

/// Whether `actor` may change who is in charge of a case.
///
/// Politicians and managers may reassign anything. Staff may hand off a
/// case they are in charge of, or claim an unassigned case for themselves.
pub(crate) fn check_reassign_allowed(
    actor: &MemberRow,
    current: Option<Uuid>,
    target: Option<Uuid>,
) -> Result<(), CaseError> {
    if actor.role.can_reassign_any_case() {
        return Ok(());
    }
    match current {
        Some(current) if current == actor.id => Ok(()),
        None if target == Some(actor.id) => Ok(()),
        _ => Err(CaseError::Forbidden("only the member in charge can reassign this case")),
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Register a case from an intake form.
///
/// # Errors
///
/// Validation and membership errors are returned before the transaction
/// opens. Failures inside it come back as [`CaseError::Step`] and leave
/// nothing persisted.
pub async fn create_case(pool: &PgPool, group_id: Uuid, actor_id: Uuid, form: CaseForm) -> Result<CaseCreated, CaseError> {
    let input = form.validate()?;
    let actor = member::require_active_member(pool, group_id, actor_id).await?;

    let mut tx = pool.begin().await?;
    let mut log = StepLog::default();

    let voter = log.record(
        CaseStepKind::UpsertVoter,
        voter::upsert_voter(&mut *tx, group_id, &input.contact).await.map_err(CaseError::from),
    )?;

    let category = match input.category.as_deref() {
        Some(name) => Some(log.record(
            CaseStepKind::UpsertCategory,
            reference::upsert_category(&mut *tx, group_id, name).await.map_err(CaseError::from),
        )?),
        None => None,
    };

    let case = log.record(
        CaseStepKind::InsertCase,
        sqlx::query_as::<_, CaseRow>(&format!(
            "INSERT INTO cases (group_id, title, description, status, priority, contact_method,
                                received_at, closed_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, now()), CASE WHEN $8 THEN now() END, $9)
             RETURNING {CASE_COLUMNS}"
        ))
        .bind(group_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.status.as_str())
        .bind(input.priority.as_str())
        .bind(input.contact_method.as_str())
        .bind(input.received_at)
        .bind(input.status.is_closed())
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(CaseError::from),
    )?;

    log.record(CaseStepKind::LinkVoter, link_voter(&mut tx, case.id, voter.id).await)?;

    if let Some(category) = &category {
        log.record(CaseStepKind::LinkCategory, link_category(&mut tx, case.id, category.id).await)?;
    }

    if let Some(district_id) = input.district_id {
        log.record(CaseStepKind::LinkDistrict, link_district(&mut tx, case.id, district_id).await)?;
    }

    if let Some(member_id) = input.in_charge_member_id {
        log.record(
            CaseStepKind::LinkInCharge,
            link_member(&mut tx, group_id, case.id, member_id, MemberLink::InCharge).await,
        )?;
    }

    let accepted_by = input.acceptance_member_id.unwrap_or(actor.id);
    log.record(
        CaseStepKind::LinkAcceptance,
        link_member(&mut tx, group_id, case.id, accepted_by, MemberLink::Acceptance).await,
    )?;

    if !input.participant_ids.is_empty() {
        log.record(
            CaseStepKind::LinkParticipants,
            add_participants(&mut tx, group_id, case.id, &input.participant_ids).await,
        )?;
    }

    tx.commit().await?;
    tracing::info!(%group_id, case_id = %case.id, voter_id = %voter.id, steps = log.steps.len(), "case created");
    Ok(CaseCreated { case, voter_id: voter.id, steps: log.steps })
}

/// Patch a case and re-sync the relations present in `update`.
///
/// # Errors
///
/// Returns [`CaseError::NotFound`] if the case is not in the group, or
/// [`CaseError::Forbidden`] if the in-charge change is not allowed.
pub async fn update_case(
    pool: &PgPool,
    group_id: Uuid,
    case_id: Uuid,
    actor_id: Uuid,
    update: CaseUpdate,
) -> Result<CaseDetail, CaseError> {
    let actor = member::require_active_member(pool, group_id, actor_id).await?;
    let mut tx = pool.begin().await?;
    lock_case(&mut tx, group_id, case_id).await?;

    sqlx::query(
        "UPDATE cases SET
             title = COALESCE($3, title),
             description = COALESCE($4, description),
             status = COALESCE($5::TEXT, status),
             priority = COALESCE($6, priority),
             contact_method = COALESCE($7, contact_method),
             received_at = COALESCE($8, received_at),
             closed_at = CASE
                 WHEN $5::TEXT IS NULL THEN closed_at
                 WHEN $9 THEN COALESCE(closed_at, now())
                 ELSE NULL
             END,
             updated_at = now()
         WHERE id = $1 AND group_id = $2",
    )
    .bind(case_id)
    .bind(group_id)
    .bind(update.title.as_deref())
    .bind(update.description.as_deref())
    .bind(update.status.map(CaseStatus::as_str))
    .bind(update.priority.map(Priority::as_str))
    .bind(update.contact_method.map(ContactMethod::as_str))
    .bind(update.received_at)
    .bind(update.status.is_some_and(CaseStatus::is_closed))
    .execute(&mut *tx)
    .await?;

    if let Some(contact) = &update.contact {
        let voter = voter::upsert_voter(&mut *tx, group_id, contact).await?;
        link_voter(&mut tx, case_id, voter.id).await?;
    }

    match update.category.as_ref() {
        Some(Some(name)) => {
            let category = reference::upsert_category(&mut *tx, group_id, name).await?;
            link_category(&mut tx, case_id, category.id).await?;
        }
        Some(None) => unlink(&mut tx, "category_cases", case_id).await?,
        None => {}
    }

    match update.district_id {
        Some(Some(district_id)) => link_district(&mut tx, case_id, district_id).await?,
        Some(None) => unlink(&mut tx, "district_cases", case_id).await?,
        None => {}
    }

    if let Some(target) = update.in_charge_member_id {
        let current = current_in_charge(&mut tx, case_id).await?;
        if current != target {
            check_reassign_allowed(&actor, current, target)?;
            match target {
                Some(member_id) => link_member(&mut tx, group_id, case_id, member_id, MemberLink::InCharge).await?,
                None => unlink(&mut tx, "in_charge_cases", case_id).await?,
            }
        }
    }

    if let Some(participants) = &update.participant_ids {
        unlink(&mut tx, "case_members", case_id).await?;
        add_participants(&mut tx, group_id, case_id, participants).await?;
    }

    tx.commit().await?;
    tracing::info!(%group_id, %case_id, actor_member_id = %actor.id, "case updated");
    load_detail(pool, group_id, case_id).await
}

/// Change only the status, applying the `closed_at` rule.
///
/// # Errors
///
/// Returns [`CaseError::NotFound`] if the case is not in the group.
pub async fn update_status(
    pool: &PgPool,
    group_id: Uuid,
    case_id: Uuid,
    actor_id: Uuid,
    status: CaseStatus,
) -> Result<CaseRow, CaseError> {
    member::require_active_member(pool, group_id, actor_id).await?;
    let row = sqlx::query_as::<_, CaseRow>(&format!(
        "UPDATE cases SET
             status = $3,
             closed_at = CASE WHEN $4 THEN COALESCE(closed_at, now()) ELSE NULL END,
             updated_at = now()
         WHERE id = $1 AND group_id = $2
         RETURNING {CASE_COLUMNS}"
    ))
    .bind(case_id)
    .bind(group_id)
    .bind(status.as_str())
    .bind(status.is_closed())
    .fetch_optional(pool)
    .await?
    .ok_or(CaseError::NotFound(case_id))?;
    tracing::info!(%group_id, %case_id, status = status.as_str(), "case status changed");
    Ok(row)
}

/// Put `member_id` in charge of the case.
///
/// # Errors
///
/// Returns [`CaseError::Forbidden`] when a staff member tries to reassign a
/// case they are not in charge of, and [`CaseError::UnknownMember`] if the
/// target is not active in the group.
pub async fn assign_case(
    pool: &PgPool,
    group_id: Uuid,
    case_id: Uuid,
    actor_id: Uuid,
    member_id: Uuid,
) -> Result<CaseDetail, CaseError> {
    let actor = member::require_active_member(pool, group_id, actor_id).await?;
    let mut tx = pool.begin().await?;
    lock_case(&mut tx, group_id, case_id).await?;

    let current = current_in_charge(&mut tx, case_id).await?;
    check_reassign_allowed(&actor, current, Some(member_id))?;
    link_member(&mut tx, group_id, case_id, member_id, MemberLink::InCharge).await?;
    sqlx::query("UPDATE cases SET updated_at = now() WHERE id = $1")
        .bind(case_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(%group_id, %case_id, %member_id, "case assigned");
    load_detail(pool, group_id, case_id).await
}

/// Full case view for a group member.
///
/// # Errors
///
/// Returns [`CaseError::NotFound`] if the case is not in the group.
pub async fn get_case(pool: &PgPool, group_id: Uuid, case_id: Uuid, viewer_id: Uuid) -> Result<CaseDetail, CaseError> {
    member::require_active_member(pool, group_id, viewer_id).await?;
    load_detail(pool, group_id, case_id).await
}

const MEMBER_SUMMARY_SELECT: &str = "SELECT m.id, m.user_id, u.name, m.role, m.title, m.is_active \
                                     FROM members m JOIN users u ON u.id = m.user_id";

async fn load_detail(pool: &PgPool, group_id: Uuid, case_id: Uuid) -> Result<CaseDetail, CaseError> {
    let case = sqlx::query_as::<_, CaseRow>(&format!(
        "SELECT {CASE_COLUMNS} FROM cases WHERE id = $1 AND group_id = $2"
    ))
    .bind(case_id)
    .bind(group_id)
    .fetch_optional(pool)
    .await?
    .ok_or(CaseError::NotFound(case_id))?;

    let voter = sqlx::query_as::<_, VoterRow>(
        "SELECT v.id, v.group_id, v.name, v.phone, v.email, v.address, v.line_id, v.created_at
         FROM voter_cases vc JOIN voters v ON v.id = vc.voter_id
         WHERE vc.case_id = $1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    let category = sqlx::query_as::<_, Category>(
        "SELECT c.id, c.name FROM category_cases cc JOIN categories c ON c.id = cc.category_id WHERE cc.case_id = $1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    let district = sqlx::query_as::<_, DistrictRef>(
        "SELECT d.id, d.name, d.county_id, co.name AS county_name
         FROM district_cases dc
         JOIN districts d ON d.id = dc.district_id
         JOIN counties co ON co.id = d.county_id
         WHERE dc.case_id = $1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    let in_charge = sqlx::query_as::<_, MemberSummary>(&format!(
        "{MEMBER_SUMMARY_SELECT} JOIN in_charge_cases r ON r.member_id = m.id WHERE r.case_id = $1"
    ))
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    let accepted_by = sqlx::query_as::<_, MemberSummary>(&format!(
        "{MEMBER_SUMMARY_SELECT} JOIN acceptance_cases r ON r.member_id = m.id WHERE r.case_id = $1"
    ))
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    let participants = sqlx::query_as::<_, MemberSummary>(&format!(
        "{MEMBER_SUMMARY_SELECT} JOIN case_members r ON r.member_id = m.id WHERE r.case_id = $1 ORDER BY u.name"
    ))
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    Ok(CaseDetail { case, voter, category, district, in_charge, accepted_by, participants })
}

/// Filtered, paginated case list, newest first.
///
/// # Errors
///
/// Returns a validation error for an unknown status filter.
pub async fn list_cases(pool: &PgPool, group_id: Uuid, viewer_id: Uuid, filter: &CaseFilter) -> Result<CasePage, CaseError> {
    let status = filter.status()?;
    member::require_active_member(pool, group_id, viewer_id).await?;
    let (limit, offset) = filter.page();
    let query = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let text_pattern = query.map(voter::like_pattern);
    let phone_pattern = query.and_then(voter::phone_pattern);

    let items = sqlx::query_as::<_, CaseListItem>(
        "SELECT c.id, c.title, c.status, c.priority, c.received_at, c.closed_at,
                v.name AS voter_name, v.phone AS voter_phone,
                cat.name AS category_name, d.name AS district_name,
                ic.member_id AS in_charge_member_id, icu.name AS in_charge_name
         FROM cases c
         LEFT JOIN voter_cases vc ON vc.case_id = c.id
         LEFT JOIN voters v ON v.id = vc.voter_id
         LEFT JOIN category_cases cc ON cc.case_id = c.id
         LEFT JOIN categories cat ON cat.id = cc.category_id
         LEFT JOIN district_cases dc ON dc.case_id = c.id
         LEFT JOIN districts d ON d.id = dc.district_id
         LEFT JOIN in_charge_cases ic ON ic.case_id = c.id
         LEFT JOIN members icm ON icm.id = ic.member_id
         LEFT JOIN users icu ON icu.id = icm.user_id
         WHERE c.group_id = $1
           AND ($2::TEXT IS NULL OR c.status = $2)
           AND ($3::UUID IS NULL OR cc.category_id = $3)
           AND ($4::INTEGER IS NULL OR dc.district_id = $4)
           AND ($5::UUID IS NULL OR ic.member_id = $5)
           AND ($6::TEXT IS NULL OR c.title ILIKE $6 OR v.name ILIKE $6 OR ($7::TEXT IS NOT NULL AND v.phone LIKE $7))
         ORDER BY c.received_at DESC, c.id DESC
         LIMIT $8 OFFSET $9",
    )
    .bind(group_id)
    .bind(status.map(CaseStatus::as_str))
    .bind(filter.category_id)
    .bind(filter.district_id)
    .bind(filter.in_charge_member_id)
    .bind(text_pattern)
    .bind(phone_pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(CasePage { items, limit, offset })
}

/// Delete a case; relation rows cascade.
///
/// # Errors
///
/// Returns [`CaseError::Forbidden`] for staff and [`CaseError::NotFound`]
/// if the case is not in the group.
pub async fn delete_case(pool: &PgPool, group_id: Uuid, case_id: Uuid, actor_id: Uuid) -> Result<(), CaseError> {
    let actor = member::require_active_member(pool, group_id, actor_id).await?;
    if !actor.role.can_manage_team() {
        return Err(CaseError::Forbidden("only politicians and managers can delete cases"));
    }
    let result = sqlx::query("DELETE FROM cases WHERE id = $1 AND group_id = $2")
        .bind(case_id)
        .bind(group_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CaseError::NotFound(case_id));
    }
    tracing::info!(%group_id, %case_id, actor_member_id = %actor.id, "case deleted");
    Ok(())
}

/// Every case in the group, flattened for export, oldest first.
///
/// # Errors
///
/// Returns [`CaseError::Access`] if the viewer is not an active member.
pub async fn list_export_cases(pool: &PgPool, group_id: Uuid, viewer_id: Uuid) -> Result<Vec<CaseExportRow>, CaseError> {
    member::require_active_member(pool, group_id, viewer_id).await?;
    let rows = sqlx::query_as::<_, CaseExportRow>(
        "SELECT c.id, c.title, c.description, c.status, c.priority, c.contact_method,
                c.received_at, c.closed_at,
                v.name AS voter_name, v.phone AS voter_phone, v.email AS voter_email,
                cat.name AS category, d.name AS district, co.name AS county,
                icu.name AS in_charge, acu.name AS accepted_by
         FROM cases c
         LEFT JOIN voter_cases vc ON vc.case_id = c.id
         LEFT JOIN voters v ON v.id = vc.voter_id
         LEFT JOIN category_cases cc ON cc.case_id = c.id
         LEFT JOIN categories cat ON cat.id = cc.category_id
         LEFT JOIN district_cases dc ON dc.case_id = c.id
         LEFT JOIN districts d ON d.id = dc.district_id
         LEFT JOIN counties co ON co.id = d.county_id
         LEFT JOIN in_charge_cases ic ON ic.case_id = c.id
         LEFT JOIN members icm ON icm.id = ic.member_id
         LEFT JOIN users icu ON icu.id = icm.user_id
         LEFT JOIN acceptance_cases ac ON ac.case_id = c.id
         LEFT JOIN members acm ON acm.id = ac.member_id
         LEFT JOIN users acu ON acu.id = acm.user_id
         WHERE c.group_id = $1
         ORDER BY c.received_at, c.id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Serialize)]
struct ExportMetaLine {
    #[serde(rename = "type")]
    line_type: &'static str,
    version: u8,
    group_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    exported_at: OffsetDateTime,
    case_count: usize,
}

#[derive(Serialize)]
struct ExportCaseLine<'a> {
    #[serde(rename = "type")]
    line_type: &'static str,
    #[serde(flatten)]
    case: &'a CaseExportRow,
}

/// Render the export as newline-terminated JSON lines: one
/// `case_export_meta` line, then one `case` line per row.
///
/// # Errors
///
/// Returns a serialization error.
pub fn export_lines(
    group_id: Uuid,
    rows: &[CaseExportRow],
    exported_at: OffsetDateTime,
) -> Result<Vec<String>, serde_json::Error> {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    let meta = ExportMetaLine {
        line_type: "case_export_meta",
        version: 1,
        group_id,
        exported_at,
        case_count: rows.len(),
    };
    lines.push(format!("{}\n", serde_json::to_string(&meta)?));
    for case in rows {
        let line = ExportCaseLine { line_type: "case", case };
        lines.push(format!("{}\n", serde_json::to_string(&line)?));
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "case_test.rs"]
mod tests;
