use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{AuditEntry, CourseLedger, ProfileScope, UserProfile};

/// One user's timetable, body passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableDoc {
    pub user_id: Uuid,
    #[serde(default)]
    pub days: serde_json::Value,
}

/// One user's study plan, body passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlanDoc {
    pub user_id: Uuid,
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub by: String,
    pub date: DateTime<Utc>,
}

/// Whole-fleet dataset. Only the presence of `users` is validated; nested
/// bodies are pass-through and restored as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetData {
    pub users: Option<Vec<UserProfile>>,
    #[serde(default)]
    pub attendance: Vec<CourseLedger>,
    #[serde(default)]
    pub timetables: Vec<TimetableDoc>,
    #[serde(default)]
    pub study_plans: Vec<StudyPlanDoc>,
    #[serde(default)]
    pub logs: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub meta: SnapshotMeta,
    pub data: FleetData,
}

/// Single-user export: profile scope plus the user's dependent collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    #[serde(default)]
    pub user_details: Option<ProfileScope>,
    #[serde(default)]
    pub attendance_data: Vec<CourseLedger>,
    #[serde(default)]
    pub timetable_data: Option<serde_json::Value>,
    #[serde(default)]
    pub study_plan_data: Option<serde_json::Value>,
}

impl FleetSnapshot {
    pub fn new(by: String, data: FleetData) -> Self {
        FleetSnapshot {
            meta: SnapshotMeta {
                by,
                date: Utc::now(),
            },
            data,
        }
    }

    /// A restore is refused only when the users collection is missing
    /// outright; empty or partially-filled collections are legitimate.
    pub fn users(&self) -> Result<&[UserProfile], LedgerError> {
        match &self.data.users {
            Some(users) => Ok(users),
            None => Err(LedgerError::InvalidSnapshot(
                "missing users collection".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn snapshot_from(json: serde_json::Value) -> FleetSnapshot {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn snapshot_without_users_is_invalid() {
        let snapshot = snapshot_from(serde_json::json!({
            "meta": { "by": "root", "date": "2025-06-01T00:00:00Z" },
            "data": { "attendance": [] }
        }));

        assert!(matches!(
            snapshot.users(),
            Err(LedgerError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn empty_optional_collections_are_accepted() {
        let snapshot = snapshot_from(serde_json::json!({
            "meta": { "by": "root", "date": "2025-06-01T00:00:00Z" },
            "data": { "users": [] }
        }));

        assert!(snapshot.users().unwrap().is_empty());
        assert!(snapshot.data.study_plans.is_empty());
        assert!(snapshot.data.timetables.is_empty());
        assert!(snapshot.data.logs.is_empty());
    }

    #[test]
    fn nested_bodies_pass_through_unchanged() {
        let days = serde_json::json!({
            "monday": [{ "time": "09:00", "subject": "Math", "room": "A1", "extra": true }]
        });
        let snapshot = snapshot_from(serde_json::json!({
            "meta": { "by": "root", "date": "2025-06-01T00:00:00Z" },
            "data": {
                "users": [],
                "timetables": [{ "userId": Uuid::new_v4(), "days": days.clone() }]
            }
        }));

        assert_eq!(snapshot.data.timetables[0].days, days);
    }

    #[test]
    fn user_rows_default_role_and_scope() {
        let snapshot = snapshot_from(serde_json::json!({
            "meta": { "by": "root", "date": "2025-06-01T00:00:00Z" },
            "data": {
                "users": [{
                    "id": Uuid::new_v4(),
                    "first_name": "Asha",
                    "last_name": "Rao",
                    "mobile": "9000000001"
                }]
            }
        }));

        let users = snapshot.users().unwrap();
        assert_eq!(users[0].role, Role::User);
        assert!(users[0].details.year.is_none());
    }

    #[test]
    fn user_snapshot_records_default_missing_periods_to_one() {
        let parsed: UserSnapshot = serde_json::from_value(serde_json::json!({
            "attendanceData": [{
                "userId": Uuid::new_v4(),
                "course": "Math",
                "records": [{
                    "date": "2025-01-10",
                    "status": "Present",
                    "year": "1",
                    "semester": "1"
                }]
            }]
        }))
        .unwrap();

        assert_eq!(parsed.attendance_data[0].records[0].periods, 1);
    }
}
