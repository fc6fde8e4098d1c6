use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod backup;
mod db;
mod error;
mod ledger;
mod models;
mod report;
mod risk;
mod stats;

use crate::backup::{FleetSnapshot, UserSnapshot};
use crate::error::LedgerError;
use crate::models::{
    AttendanceStatus, CourseLedger, Mark, ProfileScope, Role, UserProfile, DEFAULT_THRESHOLD,
};

#[derive(Parser)]
#[command(name = "attendance-ledger")]
#[command(about = "Attendance ledger and risk analytics for an institution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Record one attendance mark (re-marking the same key corrects its period count)
    Mark {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, value_enum)]
        status: AttendanceStatus,
        #[arg(long)]
        year: String,
        #[arg(long)]
        semester: String,
        #[arg(long, default_value_t = 1)]
        periods: i32,
    },
    /// Bulk-apply marks from a CSV file through the merge policy
    ImportMarks {
        #[arg(long)]
        user: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Scoped attendance statistics for one course
    Stats {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// What-if projections: classes needed to reach the threshold, classes miss-able above it
    Projection {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
    /// Update a user's current academic scope (the lens on their history)
    SetScope {
        #[arg(long)]
        user: String,
        #[arg(long)]
        college: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        semester: Option<String>,
        #[arg(long, value_delimiter = ',')]
        courses: Vec<String>,
    },
    /// Register a new student (admin)
    CreateUser {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        middle_name: Option<String>,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        mobile: String,
    },
    /// Delete a user and all of their data (admin)
    DeleteUser {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        user: String,
    },
    /// Change a user's role (admin)
    SetRole {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        user: String,
        #[arg(long, value_enum)]
        role: Role,
    },
    /// One user's profile with current-scope statistics (admin)
    UserDetails {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        user: String,
    },
    /// Scan the whole fleet for students below the attendance threshold (admin)
    AtRisk {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
    /// Write a markdown at-risk report (admin)
    Report {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show recent audit log entries (admin)
    Logs {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Export the whole fleet to a JSON snapshot (admin)
    Backup {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "backup.json")]
        out: PathBuf,
    },
    /// Replace the whole fleet from a JSON snapshot (admin)
    Restore {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        input: PathBuf,
    },
    /// Export one user's data to a JSON snapshot
    Export {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "export.json")]
        out: PathBuf,
    },
    /// Replace one user's data from a JSON snapshot
    Import {
        #[arg(long)]
        user: String,
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Mark {
            user,
            course,
            date,
            status,
            year,
            semester,
            periods,
        } => {
            let user = db::require_user(&pool, &user).await?;
            let mark = Mark {
                date,
                status,
                year,
                semester,
                periods,
            };
            let ledger = db::record_mark(&pool, user.id, &course, &mark).await?;
            println!(
                "Marked {} on {} as {} ({} period(s)); {} now holds {} record(s).",
                course,
                date,
                status.as_str(),
                periods,
                course,
                ledger.records.len()
            );
        }
        Commands::ImportMarks { user, csv } => {
            let user = db::require_user(&pool, &user).await?;
            let applied = import_marks(&pool, &user, &csv).await?;
            println!("Applied {applied} marks from {}.", csv.display());
        }
        Commands::Stats {
            user,
            course,
            year,
            semester,
            as_of,
        } => {
            let user = db::require_user(&pool, &user).await?;
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let records = course_records(&pool, user.id, &course).await?;
            let stats = stats::course_stats(&records, &year, &semester, as_of);
            println!(
                "{course} (year {year}, semester {semester}, through {as_of}): \
                 {} period(s), {} present, {} absent — {:.1}%",
                stats.total,
                stats.present,
                stats.absent,
                stats.percentage()
            );
        }
        Commands::Projection {
            user,
            course,
            year,
            semester,
            as_of,
            threshold,
        } => {
            let user = db::require_user(&pool, &user).await?;
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let records = course_records(&pool, user.id, &course).await?;
            let stats = stats::course_stats(&records, &year, &semester, as_of);
            let projection = stats::project(&stats, threshold);
            let pct = threshold * 100.0;
            println!("{course}: {:.1}% of {} period(s).", stats.percentage(), stats.total);
            println!(
                "To reach {pct:.0}%, attend {} more class(es) without missing any.",
                projection.needed
            );
            println!(
                "Or, attending nothing extra, you can miss {} more class(es) and stay at or above {pct:.0}%.",
                projection.can_miss
            );
        }
        Commands::SetScope {
            user,
            college,
            year,
            semester,
            courses,
        } => {
            let user = db::require_user(&pool, &user).await?;
            let scope = ProfileScope {
                college_name: college,
                year,
                semester,
                courses,
            };
            db::set_scope(&pool, user.id, &scope).await?;
            println!("Scope updated for {}.", user.mobile);
        }
        Commands::CreateUser {
            actor,
            first_name,
            middle_name,
            last_name,
            mobile,
        } => {
            let actor = db::require_admin(&pool, &actor).await?;
            let user = UserProfile {
                id: Uuid::new_v4(),
                first_name,
                middle_name,
                last_name,
                mobile,
                role: Role::User,
                details: ProfileScope::default(),
            };
            db::create_user(&pool, &user).await?;
            db::log_action(
                &pool,
                &actor,
                "CREATE_USER",
                &format!("Created: {} ({})", user.full_name(), user.mobile),
            )
            .await;
            println!("User {} created.", user.mobile);
        }
        Commands::DeleteUser { actor, user } => {
            let actor = db::require_admin(&pool, &actor).await?;
            let target = db::require_user(&pool, &user).await?;
            if target.id == actor.id {
                return Err(LedgerError::Forbidden("cannot delete yourself".to_string()).into());
            }
            let deleted = db::delete_user(&pool, target.id).await?;
            db::log_action(
                &pool,
                &actor,
                "DELETE_USER",
                &format!("Deleted: {} ({})", deleted.full_name(), deleted.mobile),
            )
            .await;
            println!("User {} deleted.", deleted.mobile);
        }
        Commands::SetRole { actor, user, role } => {
            let actor = db::require_admin(&pool, &actor).await?;
            let target = db::require_user(&pool, &user).await?;
            if target.id == actor.id && role == Role::User {
                return Err(LedgerError::Forbidden("cannot demote yourself".to_string()).into());
            }
            db::set_role(&pool, target.id, role).await?;
            db::log_action(
                &pool,
                &actor,
                "ROLE_CHANGE",
                &format!("Role change: {} -> {}", target.mobile, role.as_str()),
            )
            .await;
            println!("{} is now {}.", target.mobile, role.as_str());
        }
        Commands::UserDetails { actor, user } => {
            db::require_admin(&pool, &actor).await?;
            let target = db::require_user(&pool, &user).await?;
            print_user_details(&pool, &target).await?;
        }
        Commands::AtRisk { actor, threshold } => {
            db::require_admin(&pool, &actor).await?;
            let mut roster = scan_fleet(&pool, threshold).await?;
            if roster.is_empty() {
                println!("No students below {:.0}%.", threshold * 100.0);
            } else {
                roster.sort_by(|a, b| {
                    a.percentage
                        .partial_cmp(&b.percentage)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                println!("Students below {:.0}%:", threshold * 100.0);
                for entry in &roster {
                    println!(
                        "- {} ({}, {}) at {:.1}%",
                        entry.name,
                        entry.mobile,
                        entry.college.as_deref().unwrap_or("unknown college"),
                        entry.percentage
                    );
                }
            }
        }
        Commands::Report {
            actor,
            threshold,
            out,
        } => {
            db::require_admin(&pool, &actor).await?;
            let roster = scan_fleet(&pool, threshold).await?;
            let report = report::build_report(threshold, Utc::now().date_naive(), &roster);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Logs { actor, limit } => {
            db::require_admin(&pool, &actor).await?;
            let entries = db::fetch_logs(&pool, limit).await?;
            if entries.is_empty() {
                println!("No audit entries.");
            }
            for entry in entries {
                println!(
                    "{} {} by {}: {}",
                    entry.logged_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action,
                    entry.actor_name,
                    entry.details
                );
            }
        }
        Commands::Backup { actor, out } => {
            let actor = db::require_admin(&pool, &actor).await?;
            let snapshot = db::export_fleet(&pool, actor.full_name()).await?;
            std::fs::write(&out, serde_json::to_string_pretty(&snapshot)?)?;
            db::log_action(&pool, &actor, "DB_BACKUP", "Backup downloaded").await;
            println!("Backup written to {}.", out.display());
        }
        Commands::Restore { actor, input } => {
            let actor = db::require_admin(&pool, &actor).await?;
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let snapshot: FleetSnapshot =
                serde_json::from_str(&raw).map_err(|err| {
                    anyhow::Error::from(LedgerError::InvalidSnapshot(err.to_string()))
                })?;
            db::restore_fleet(&pool, &snapshot).await?;
            db::log_action(&pool, &actor, "DB_RESTORE", "System restored").await;
            println!("Restored from {}.", input.display());
        }
        Commands::Export { user, out } => {
            let user = db::require_user(&pool, &user).await?;
            let snapshot = db::export_user(&pool, &user).await?;
            std::fs::write(&out, serde_json::to_string_pretty(&snapshot)?)?;
            println!("Export written to {}.", out.display());
        }
        Commands::Import { user, input } => {
            let user = db::require_user(&pool, &user).await?;
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let snapshot: UserSnapshot =
                serde_json::from_str(&raw).map_err(|err| {
                    anyhow::Error::from(LedgerError::InvalidSnapshot(err.to_string()))
                })?;
            db::import_user(&pool, user.id, &snapshot).await?;
            println!("Imported data for {}.", user.mobile);
        }
    }

    Ok(())
}

async fn course_records(
    pool: &PgPool,
    user_id: Uuid,
    course: &str,
) -> anyhow::Result<Vec<models::AttendanceRecord>> {
    Ok(db::fetch_ledger(pool, user_id, course)
        .await?
        .map(|ledger| ledger.records)
        .unwrap_or_default())
}

async fn scan_fleet(pool: &PgPool, threshold: f64) -> anyhow::Result<Vec<models::RiskEntry>> {
    let users = db::fetch_all_users(pool).await?;
    let mut ledgers_by_user: HashMap<Uuid, Vec<CourseLedger>> = HashMap::new();
    for ledger in db::fetch_all_ledgers(pool).await? {
        ledgers_by_user.entry(ledger.user_id).or_default().push(ledger);
    }

    Ok(risk::scan_at_risk(&users, &ledgers_by_user, threshold))
}

async fn print_user_details(pool: &PgPool, target: &UserProfile) -> anyhow::Result<()> {
    println!("{} ({}), role {}", target.full_name(), target.mobile, target.role.as_str());

    let (year, semester) = match (&target.details.year, &target.details.semester) {
        (Some(year), Some(semester)) => (year.clone(), semester.clone()),
        _ => {
            println!("No current scope set; no statistics to show.");
            return Ok(());
        }
    };
    println!(
        "Current scope: year {year}, semester {semester}, college {}",
        target.details.college_name.as_deref().unwrap_or("unknown")
    );

    let ledgers = db::fetch_ledgers(pool, target.id).await?;
    let mut combined = models::CourseStats::default();
    for ledger in &ledgers {
        let stats = stats::course_stats(&ledger.records, &year, &semester, NaiveDate::MAX);
        combined = combined.combine(&stats);
        println!(
            "- {}: {} period(s), {} present ({:.1}%)",
            ledger.course,
            stats.total,
            stats.present,
            stats.percentage()
        );
    }
    println!(
        "Overall: {} period(s), {} present, {} absent — {:.1}%",
        combined.total,
        combined.present,
        combined.absent,
        combined.percentage()
    );

    Ok(())
}

async fn import_marks(pool: &PgPool, user: &UserProfile, csv_path: &PathBuf) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvMark {
        course: String,
        date: NaiveDate,
        status: String,
        year: String,
        semester: String,
        periods: Option<i32>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut applied = 0usize;

    for result in reader.deserialize::<CsvMark>() {
        let row = result?;
        let status = AttendanceStatus::parse(&row.status)
            .with_context(|| format!("unknown status '{}' in {}", row.status, csv_path.display()))?;
        let mark = Mark {
            date: row.date,
            status,
            year: row.year,
            semester: row.semester,
            periods: row.periods.unwrap_or(1),
        };
        db::record_mark(pool, user.id, &row.course, &mark).await?;
        applied += 1;
    }

    Ok(applied)
}
