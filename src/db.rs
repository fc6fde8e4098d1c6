use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::backup::{FleetData, FleetSnapshot, StudyPlanDoc, TimetableDoc, UserSnapshot};
use crate::error::LedgerError;
use crate::ledger::{self, MergeDecision};
use crate::models::{
    AttendanceRecord, AttendanceStatus, AuditEntry, CourseLedger, Mark, ProfileScope, Role,
    UserProfile,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn conflict_on_unique(err: sqlx::Error, what: &str) -> anyhow::Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return LedgerError::Conflict(what.to_string()).into();
        }
    }
    err.into()
}

fn row_to_user(row: &PgRow) -> anyhow::Result<UserProfile> {
    let role: String = row.get("role");
    let role = Role::parse(&role)
        .with_context(|| format!("unknown role '{role}' in users table"))?;

    Ok(UserProfile {
        id: row.get("id"),
        first_name: row.get("first_name"),
        middle_name: row.get("middle_name"),
        last_name: row.get("last_name"),
        mobile: row.get("mobile"),
        role,
        details: ProfileScope {
            college_name: row.get("college_name"),
            year: row.get("year"),
            semester: row.get("semester"),
            courses: row.get("courses"),
        },
    })
}

fn row_to_record(row: &PgRow) -> anyhow::Result<AttendanceRecord> {
    let status: String = row.get("status");
    let status = AttendanceStatus::parse(&status)
        .with_context(|| format!("unknown status '{status}' in records table"))?;

    Ok(AttendanceRecord {
        date: row.get("date"),
        status,
        year: row.get("year"),
        semester: row.get("semester"),
        periods: row.get("periods"),
    })
}

pub async fn fetch_all_users(pool: &PgPool) -> anyhow::Result<Vec<UserProfile>> {
    let rows = sqlx::query(
        "SELECT id, first_name, middle_name, last_name, mobile, role, \
         college_name, year, semester, courses \
         FROM attendance_ledger.users ORDER BY last_name, first_name",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_user).collect()
}

pub async fn find_user_by_mobile(pool: &PgPool, mobile: &str) -> anyhow::Result<Option<UserProfile>> {
    let row = sqlx::query(
        "SELECT id, first_name, middle_name, last_name, mobile, role, \
         college_name, year, semester, courses \
         FROM attendance_ledger.users WHERE mobile = $1",
    )
    .bind(mobile)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_user).transpose()
}

pub async fn require_user(pool: &PgPool, mobile: &str) -> anyhow::Result<UserProfile> {
    find_user_by_mobile(pool, mobile)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("no user with mobile {mobile}")).into())
}

/// Resolve the acting principal for an admin-only command.
pub async fn require_admin(pool: &PgPool, mobile: &str) -> anyhow::Result<UserProfile> {
    let actor = require_user(pool, mobile).await?;
    if actor.role != Role::Admin {
        return Err(LedgerError::Forbidden(format!("{} is not an admin", actor.mobile)).into());
    }
    Ok(actor)
}

fn group_ledger_rows(rows: &[PgRow]) -> anyhow::Result<Vec<CourseLedger>> {
    let mut ledgers: Vec<CourseLedger> = Vec::new();

    for row in rows {
        let user_id: Uuid = row.get("user_id");
        let course: String = row.get("course");

        let needs_new = ledgers
            .last()
            .map(|l| l.user_id != user_id || l.course != course)
            .unwrap_or(true);
        if needs_new {
            ledgers.push(CourseLedger {
                user_id,
                course,
                records: Vec::new(),
            });
        }

        // LEFT JOIN: a ledger with no records yet yields NULL record columns.
        let date: Option<NaiveDate> = row.get("date");
        if date.is_some() {
            let ledger = ledgers.last_mut().context("ledger row grouping")?;
            ledger.records.push(row_to_record(row)?);
        }
    }

    Ok(ledgers)
}

pub async fn fetch_ledgers(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<CourseLedger>> {
    let rows = sqlx::query(
        "SELECT l.user_id, l.course, r.date, r.status, r.year, r.semester, r.periods \
         FROM attendance_ledger.ledgers l \
         LEFT JOIN attendance_ledger.records r ON r.ledger_id = l.id \
         WHERE l.user_id = $1 \
         ORDER BY l.course, r.position",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    group_ledger_rows(&rows)
}

pub async fn fetch_all_ledgers(pool: &PgPool) -> anyhow::Result<Vec<CourseLedger>> {
    let rows = sqlx::query(
        "SELECT l.user_id, l.course, r.date, r.status, r.year, r.semester, r.periods \
         FROM attendance_ledger.ledgers l \
         LEFT JOIN attendance_ledger.records r ON r.ledger_id = l.id \
         ORDER BY l.user_id, l.course, r.position",
    )
    .fetch_all(pool)
    .await?;

    group_ledger_rows(&rows)
}

pub async fn fetch_ledger(
    pool: &PgPool,
    user_id: Uuid,
    course: &str,
) -> anyhow::Result<Option<CourseLedger>> {
    let rows = sqlx::query(
        "SELECT l.user_id, l.course, r.date, r.status, r.year, r.semester, r.periods \
         FROM attendance_ledger.ledgers l \
         LEFT JOIN attendance_ledger.records r ON r.ledger_id = l.id \
         WHERE l.user_id = $1 AND l.course = $2 \
         ORDER BY r.position",
    )
    .bind(user_id)
    .bind(course)
    .fetch_all(pool)
    .await?;

    Ok(group_ledger_rows(&rows)?.into_iter().next())
}

/// Merge one mark into the (user, course) ledger and persist it.
///
/// The decision and the write happen inside one transaction; a concurrent
/// same-key append is caught by the records table's natural-key unique
/// index and surfaces as `Conflict` rather than a silent duplicate.
pub async fn record_mark(
    pool: &PgPool,
    user_id: Uuid,
    course: &str,
    mark: &Mark,
) -> anyhow::Result<CourseLedger> {
    let user_exists = sqlx::query("SELECT 1 FROM attendance_ledger.users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .is_some();
    if !user_exists {
        return Err(LedgerError::NotFound(format!("no user {user_id}")).into());
    }

    let mut tx = pool.begin().await?;

    let rows = sqlx::query(
        "SELECT r.id, r.date, r.status, r.year, r.semester, r.periods \
         FROM attendance_ledger.records r \
         JOIN attendance_ledger.ledgers l ON l.id = r.ledger_id \
         WHERE l.user_id = $1 AND l.course = $2 \
         ORDER BY r.position",
    )
    .bind(user_id)
    .bind(course)
    .fetch_all(&mut *tx)
    .await?;

    let mut record_ids: Vec<Uuid> = Vec::with_capacity(rows.len());
    let mut records: Vec<AttendanceRecord> = Vec::with_capacity(rows.len());
    for row in &rows {
        record_ids.push(row.get("id"));
        records.push(row_to_record(row)?);
    }

    match ledger::merge_decision(&records, mark) {
        MergeDecision::Update { index } => {
            sqlx::query("UPDATE attendance_ledger.records SET periods = $1 WHERE id = $2")
                .bind(mark.periods)
                .bind(record_ids[index])
                .execute(&mut *tx)
                .await?;
        }
        MergeDecision::Append => {
            let ledger_id: Uuid = sqlx::query(
                "INSERT INTO attendance_ledger.ledgers (id, user_id, course) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (user_id, course) DO UPDATE SET course = EXCLUDED.course \
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(course)
            .fetch_one(&mut *tx)
            .await?
            .get("id");

            sqlx::query(
                "INSERT INTO attendance_ledger.records \
                 (id, ledger_id, date, status, year, semester, periods) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(ledger_id)
            .bind(mark.date)
            .bind(mark.status.as_str())
            .bind(&mark.year)
            .bind(&mark.semester)
            .bind(mark.periods)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                conflict_on_unique(err, "a record with this date, scope and status already exists")
            })?;
        }
    }

    tx.commit().await?;

    fetch_ledger(pool, user_id, course)
        .await?
        .context("ledger missing after mark")
}

pub async fn set_scope(pool: &PgPool, user_id: Uuid, scope: &ProfileScope) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE attendance_ledger.users \
         SET college_name = $2, year = $3, semester = $4, courses = $5 \
         WHERE id = $1",
    )
    .bind(user_id)
    .bind(&scope.college_name)
    .bind(&scope.year)
    .bind(&scope.semester)
    .bind(&scope.courses)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound(format!("no user {user_id}")).into());
    }
    Ok(())
}

pub async fn create_user(pool: &PgPool, user: &UserProfile) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO attendance_ledger.users \
         (id, first_name, middle_name, last_name, mobile, role, \
          college_name, year, semester, courses) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(user.id)
    .bind(&user.first_name)
    .bind(&user.middle_name)
    .bind(&user.last_name)
    .bind(&user.mobile)
    .bind(user.role.as_str())
    .bind(&user.details.college_name)
    .bind(&user.details.year)
    .bind(&user.details.semester)
    .bind(&user.details.courses)
    .execute(pool)
    .await
    .map_err(|err| conflict_on_unique(err, &format!("mobile {} already registered", user.mobile)))?;

    Ok(())
}

/// Deletes the user and, via FK cascade, their ledgers, records, timetable
/// and study plan. Returns the deleted profile for the audit trail.
pub async fn delete_user(pool: &PgPool, user_id: Uuid) -> anyhow::Result<UserProfile> {
    let row = sqlx::query(
        "DELETE FROM attendance_ledger.users WHERE id = $1 \
         RETURNING id, first_name, middle_name, last_name, mobile, role, \
                   college_name, year, semester, courses",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_user(&row),
        None => Err(LedgerError::NotFound(format!("no user {user_id}")).into()),
    }
}

pub async fn set_role(pool: &PgPool, user_id: Uuid, role: Role) -> anyhow::Result<()> {
    let result = sqlx::query("UPDATE attendance_ledger.users SET role = $2 WHERE id = $1")
        .bind(user_id)
        .bind(role.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound(format!("no user {user_id}")).into());
    }
    Ok(())
}

/// Append an audit record. Best-effort: a failed write is logged and
/// swallowed so it can never fail the operation being audited.
pub async fn log_action(pool: &PgPool, actor: &UserProfile, action: &str, details: &str) {
    let result = sqlx::query(
        "INSERT INTO attendance_ledger.audit_logs (id, action, actor_id, actor_name, details) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(action)
    .bind(actor.id)
    .bind(actor.full_name())
    .bind(details)
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(action, error = %err, "audit log write failed");
    }
}

fn row_to_audit(row: &PgRow) -> AuditEntry {
    AuditEntry {
        action: row.get("action"),
        actor_id: row.get("actor_id"),
        actor_name: row.get("actor_name"),
        details: row.get("details"),
        logged_at: row.get("logged_at"),
    }
}

pub async fn fetch_logs(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT action, actor_id, actor_name, details, logged_at \
         FROM attendance_ledger.audit_logs ORDER BY logged_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_audit).collect())
}

async fn fetch_timetables(pool: &PgPool) -> anyhow::Result<Vec<TimetableDoc>> {
    let rows = sqlx::query("SELECT user_id, days FROM attendance_ledger.timetables")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| TimetableDoc {
            user_id: row.get("user_id"),
            days: row.get("days"),
        })
        .collect())
}

async fn fetch_study_plans(pool: &PgPool) -> anyhow::Result<Vec<StudyPlanDoc>> {
    let rows = sqlx::query("SELECT user_id, body FROM attendance_ledger.study_plans")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| StudyPlanDoc {
            user_id: row.get("user_id"),
            body: row.get("body"),
        })
        .collect())
}

pub async fn fetch_timetable(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Option<serde_json::Value>> {
    let row = sqlx::query("SELECT days FROM attendance_ledger.timetables WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get("days")))
}

pub async fn fetch_study_plan(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Option<serde_json::Value>> {
    let row = sqlx::query("SELECT body FROM attendance_ledger.study_plans WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get("body")))
}

/// Whole-fleet export: pure aggregation of every collection.
pub async fn export_fleet(pool: &PgPool, by: String) -> anyhow::Result<FleetSnapshot> {
    let data = FleetData {
        users: Some(fetch_all_users(pool).await?),
        attendance: fetch_all_ledgers(pool).await?,
        timetables: fetch_timetables(pool).await?,
        study_plans: fetch_study_plans(pool).await?,
        logs: fetch_logs(pool, i64::MAX).await?,
    };

    Ok(FleetSnapshot::new(by, data))
}

async fn insert_ledger(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ledger: &CourseLedger,
) -> anyhow::Result<()> {
    let ledger_id = Uuid::new_v4();
    sqlx::query("INSERT INTO attendance_ledger.ledgers (id, user_id, course) VALUES ($1, $2, $3)")
        .bind(ledger_id)
        .bind(user_id)
        .bind(&ledger.course)
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            conflict_on_unique(err, &format!("duplicate ledger for course {}", ledger.course))
        })?;

    for record in &ledger.records {
        sqlx::query(
            "INSERT INTO attendance_ledger.records \
             (id, ledger_id, date, status, year, semester, periods) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(ledger_id)
        .bind(record.date)
        .bind(record.status.as_str())
        .bind(&record.year)
        .bind(&record.semester)
        .bind(record.periods)
        .execute(&mut **tx)
        .await
        .map_err(|err| conflict_on_unique(err, "duplicate record key in snapshot"))?;
    }

    Ok(())
}

/// Whole-fleet restore: wipe everything (logs included), then re-insert the
/// snapshot's contents. One transaction, so a failed restore leaves the
/// prior state untouched.
pub async fn restore_fleet(pool: &PgPool, snapshot: &FleetSnapshot) -> anyhow::Result<()> {
    let users = snapshot.users()?;

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM attendance_ledger.audit_logs").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM attendance_ledger.study_plans").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM attendance_ledger.timetables").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM attendance_ledger.records").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM attendance_ledger.ledgers").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM attendance_ledger.users").execute(&mut *tx).await?;

    for user in users {
        sqlx::query(
            "INSERT INTO attendance_ledger.users \
             (id, first_name, middle_name, last_name, mobile, role, \
              college_name, year, semester, courses) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.middle_name)
        .bind(&user.last_name)
        .bind(&user.mobile)
        .bind(user.role.as_str())
        .bind(&user.details.college_name)
        .bind(&user.details.year)
        .bind(&user.details.semester)
        .bind(&user.details.courses)
        .execute(&mut *tx)
        .await
        .map_err(|err| conflict_on_unique(err, &format!("duplicate user {}", user.mobile)))?;
    }

    for ledger in &snapshot.data.attendance {
        insert_ledger(&mut tx, ledger.user_id, ledger).await?;
    }

    for timetable in &snapshot.data.timetables {
        sqlx::query("INSERT INTO attendance_ledger.timetables (user_id, days) VALUES ($1, $2)")
            .bind(timetable.user_id)
            .bind(&timetable.days)
            .execute(&mut *tx)
            .await?;
    }

    for plan in &snapshot.data.study_plans {
        sqlx::query("INSERT INTO attendance_ledger.study_plans (user_id, body) VALUES ($1, $2)")
            .bind(plan.user_id)
            .bind(&plan.body)
            .execute(&mut *tx)
            .await?;
    }

    for entry in &snapshot.data.logs {
        sqlx::query(
            "INSERT INTO attendance_ledger.audit_logs \
             (id, action, actor_id, actor_name, details, logged_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.action)
        .bind(entry.actor_id)
        .bind(&entry.actor_name)
        .bind(&entry.details)
        .bind(entry.logged_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Single-user export: the user's scope plus their dependent collections.
pub async fn export_user(pool: &PgPool, user: &UserProfile) -> anyhow::Result<UserSnapshot> {
    Ok(UserSnapshot {
        user_details: Some(user.details.clone()),
        attendance_data: fetch_ledgers(pool, user.id).await?,
        timetable_data: fetch_timetable(pool, user.id).await?,
        study_plan_data: fetch_study_plan(pool, user.id).await?,
    })
}

/// Single-user import: replace this user's scope, ledgers, timetable and
/// study plan with the snapshot's versions. Other users are untouched.
pub async fn import_user(
    pool: &PgPool,
    user_id: Uuid,
    snapshot: &UserSnapshot,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    if let Some(details) = &snapshot.user_details {
        sqlx::query(
            "UPDATE attendance_ledger.users \
             SET college_name = $2, year = $3, semester = $4, courses = $5 \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(&details.college_name)
        .bind(&details.year)
        .bind(&details.semester)
        .bind(&details.courses)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM attendance_ledger.ledgers WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM attendance_ledger.timetables WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM attendance_ledger.study_plans WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    // Ledgers are re-keyed to the importing user regardless of what the
    // snapshot's rows claim.
    for ledger in &snapshot.attendance_data {
        insert_ledger(&mut tx, user_id, ledger).await?;
    }

    if let Some(days) = &snapshot.timetable_data {
        sqlx::query("INSERT INTO attendance_ledger.timetables (user_id, days) VALUES ($1, $2)")
            .bind(user_id)
            .bind(days)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(body) = &snapshot.study_plan_data {
        sqlx::query("INSERT INTO attendance_ledger.study_plans (user_id, body) VALUES ($1, $2)")
            .bind(user_id)
            .bind(body)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        (
            Uuid::parse_str("8a4f0e2d-6b1c-4f3a-9d52-1c7e9b0a4e11")?,
            "Asha", "Rao", "9000000001", Role::User,
            Some(("GEC Vizag", "1", "1", vec!["Math", "Physics"])),
        ),
        (
            Uuid::parse_str("2f9c7b15-3e8d-4a60-b1f4-77d2a6c0e5b3")?,
            "Kiran", "Mehta", "9000000002", Role::User,
            Some(("GEC Vizag", "2", "1", vec!["Circuits"])),
        ),
        (
            Uuid::parse_str("c1d2e3f4-5a6b-4c7d-8e9f-0a1b2c3d4e5f")?,
            "Nalini", "Iyer", "9000000000", Role::Admin,
            None,
        ),
    ];

    for (id, first_name, last_name, mobile, role, scope) in users {
        let (college, year, semester, courses) = match scope {
            Some((college, year, semester, courses)) => (
                Some(college.to_string()),
                Some(year.to_string()),
                Some(semester.to_string()),
                courses.into_iter().map(str::to_string).collect(),
            ),
            None => (None, None, None, Vec::new()),
        };

        sqlx::query(
            "INSERT INTO attendance_ledger.users \
             (id, first_name, last_name, mobile, role, college_name, year, semester, courses) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (mobile) DO UPDATE \
             SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name",
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .bind(mobile)
        .bind(role.as_str())
        .bind(college)
        .bind(year)
        .bind(semester)
        .bind::<Vec<String>>(courses)
        .execute(pool)
        .await?;
    }

    let marks = vec![
        ("9000000001", "Math", "2026-01-05", AttendanceStatus::Present, "1", "1", 2),
        ("9000000001", "Math", "2026-01-06", AttendanceStatus::Absent, "1", "1", 2),
        ("9000000001", "Physics", "2026-01-05", AttendanceStatus::Absent, "1", "1", 1),
        ("9000000002", "Circuits", "2026-01-05", AttendanceStatus::Present, "2", "1", 3),
        ("9000000002", "Circuits", "2026-01-07", AttendanceStatus::Present, "2", "1", 1),
    ];

    for (mobile, course, date, status, year, semester, periods) in marks {
        let user = require_user(pool, mobile).await?;
        let mark = Mark {
            date: date.parse().context("invalid seed date")?,
            status,
            year: year.to_string(),
            semester: semester.to_string(),
            periods,
        };
        record_mark(pool, user.id, course, &mark).await?;
    }

    Ok(())
}
