use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Present-ratio below which a student counts as at risk.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Upper bound on the `classes_can_miss` search loop.
pub const CAN_MISS_CAP: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Present" => Some(AttendanceStatus::Present),
            "Absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// One attendance fact. Only `periods` is ever rewritten in place, and only
/// through the merge policy; everything else is part of the record's key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub year: String,
    pub semester: String,
    #[serde(default = "default_periods")]
    pub periods: i32,
}

fn default_periods() -> i32 {
    1
}

/// An incoming mark, before it has been merged into a ledger.
#[derive(Debug, Clone)]
pub struct Mark {
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub year: String,
    pub semester: String,
    pub periods: i32,
}

/// All attendance records for one user's one course, in insertion order.
/// At most one ledger exists per (user, course).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseLedger {
    pub user_id: Uuid,
    pub course: String,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
}

/// The user's *current* academic scope. It doubles as the filter applied to
/// historical records, so changing it re-scopes every derived statistic
/// without touching the records themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileScope {
    #[serde(default)]
    pub college_name: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub courses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub mobile: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub details: ProfileScope,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Period-weighted counts for one scoped slice of a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CourseStats {
    pub total: i64,
    pub present: i64,
    pub absent: i64,
}

impl CourseStats {
    /// Unrounded present-ratio; 0.0 when there is no data. Threshold
    /// comparisons must use this, not the display percentage.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.present as f64 / self.total as f64
        }
    }

    /// Ratio as a percentage, rounded to one decimal for display.
    pub fn percentage(&self) -> f64 {
        (self.ratio() * 1000.0).round() / 10.0
    }

    pub fn combine(&self, other: &CourseStats) -> CourseStats {
        CourseStats {
            total: self.total + other.total,
            present: self.present + other.present,
            absent: self.absent + other.absent,
        }
    }
}

/// What-if projections for one course. `needed` and `can_miss` are
/// independent scenarios (attend N more vs. miss N more), not complementary
/// halves of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub needed: i64,
    pub can_miss: i64,
}

/// Transient roster entry produced by the risk scan; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RiskEntry {
    pub id: Uuid,
    pub name: String,
    pub mobile: String,
    pub college: Option<String>,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_name: String,
    pub details: String,
    #[serde(rename = "timestamp")]
    pub logged_at: DateTime<Utc>,
}
