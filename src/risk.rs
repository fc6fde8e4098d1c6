use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{CourseLedger, CourseStats, RiskEntry, Role, UserProfile};
use crate::stats;

/// Fleet-wide below-threshold roster.
///
/// Each student is judged against their *current* (year, semester) scope
/// only, combined across every course. Records from earlier scopes never
/// contaminate the verdict, and a student with no current-scope data is
/// excluded rather than reported at 0%.
pub fn scan_at_risk(
    users: &[UserProfile],
    ledgers_by_user: &HashMap<Uuid, Vec<CourseLedger>>,
    threshold: f64,
) -> Vec<RiskEntry> {
    let mut roster = Vec::new();

    for user in users {
        if user.role != Role::User {
            continue;
        }
        let (year, semester) = match (&user.details.year, &user.details.semester) {
            (Some(year), Some(semester)) => (year.as_str(), semester.as_str()),
            _ => continue,
        };

        let mut combined = CourseStats::default();
        if let Some(ledgers) = ledgers_by_user.get(&user.id) {
            for ledger in ledgers {
                let course = stats::course_stats(&ledger.records, year, semester, NaiveDate::MAX);
                combined = combined.combine(&course);
            }
        }

        if combined.total > 0 && combined.ratio() < threshold {
            roster.push(RiskEntry {
                id: user.id,
                name: user.first_name.clone(),
                mobile: user.mobile.clone(),
                college: user.details.college_name.clone(),
                percentage: combined.percentage(),
            });
        }
    }

    roster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttendanceRecord, AttendanceStatus, ProfileScope};

    fn student(name: &str, year: &str, semester: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            first_name: name.to_string(),
            middle_name: None,
            last_name: "Rao".to_string(),
            mobile: format!("9{}", name.len()),
            role: Role::User,
            details: ProfileScope {
                college_name: Some("GEC".to_string()),
                year: Some(year.to_string()),
                semester: Some(semester.to_string()),
                courses: vec!["Math".to_string()],
            },
        }
    }

    fn ledger(user_id: Uuid, course: &str, records: Vec<AttendanceRecord>) -> CourseLedger {
        CourseLedger {
            user_id,
            course: course.to_string(),
            records,
        }
    }

    fn record(status: AttendanceStatus, year: &str, semester: &str, periods: i32) -> AttendanceRecord {
        AttendanceRecord {
            date: "2025-01-10".parse().unwrap(),
            status,
            year: year.to_string(),
            semester: semester.to_string(),
            periods,
        }
    }

    #[test]
    fn below_threshold_student_is_reported() {
        let user = student("Asha", "1", "1");
        let mut ledgers = HashMap::new();
        ledgers.insert(
            user.id,
            vec![ledger(
                user.id,
                "Math",
                vec![
                    record(AttendanceStatus::Present, "1", "1", 1),
                    record(AttendanceStatus::Absent, "1", "1", 1),
                ],
            )],
        );

        let roster = scan_at_risk(&[user.clone()], &ledgers, 0.75);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].mobile, user.mobile);
        assert_eq!(roster[0].percentage, 50.0);
    }

    #[test]
    fn student_at_threshold_is_not_reported() {
        let user = student("Asha", "1", "1");
        let mut ledgers = HashMap::new();
        ledgers.insert(
            user.id,
            vec![ledger(
                user.id,
                "Math",
                vec![
                    record(AttendanceStatus::Present, "1", "1", 3),
                    record(AttendanceStatus::Absent, "1", "1", 1),
                ],
            )],
        );

        let roster = scan_at_risk(&[user], &ledgers, 0.75);
        assert!(roster.is_empty());
    }

    #[test]
    fn historical_scope_never_contaminates_current_verdict() {
        // All absences belong to year 1; the student has moved to year 2,
        // so there is no current-scope data and no roster entry.
        let user = student("Asha", "2", "1");
        let mut ledgers = HashMap::new();
        ledgers.insert(
            user.id,
            vec![ledger(
                user.id,
                "Math",
                vec![
                    record(AttendanceStatus::Absent, "1", "1", 5),
                    record(AttendanceStatus::Absent, "1", "1", 3),
                ],
            )],
        );

        let roster = scan_at_risk(&[user], &ledgers, 0.75);
        assert!(roster.is_empty());
    }

    #[test]
    fn totals_combine_across_courses() {
        // 3/4 in Math alone passes, but 3/6 overall does not.
        let user = student("Asha", "1", "1");
        let mut ledgers = HashMap::new();
        ledgers.insert(
            user.id,
            vec![
                ledger(
                    user.id,
                    "Math",
                    vec![
                        record(AttendanceStatus::Present, "1", "1", 3),
                        record(AttendanceStatus::Absent, "1", "1", 1),
                    ],
                ),
                ledger(
                    user.id,
                    "Physics",
                    vec![record(AttendanceStatus::Absent, "1", "1", 2)],
                ),
            ],
        );

        let roster = scan_at_risk(&[user], &ledgers, 0.75);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].percentage, 50.0);
    }

    #[test]
    fn admins_are_skipped() {
        let mut user = student("Root", "1", "1");
        user.role = Role::Admin;
        let mut ledgers = HashMap::new();
        ledgers.insert(
            user.id,
            vec![ledger(
                user.id,
                "Math",
                vec![record(AttendanceStatus::Absent, "1", "1", 4)],
            )],
        );

        let roster = scan_at_risk(&[user], &ledgers, 0.75);
        assert!(roster.is_empty());
    }

    #[test]
    fn unscoped_profiles_are_skipped() {
        let mut user = student("Asha", "1", "1");
        user.details.semester = None;
        let mut ledgers = HashMap::new();
        ledgers.insert(
            user.id,
            vec![ledger(
                user.id,
                "Math",
                vec![record(AttendanceStatus::Absent, "1", "1", 4)],
            )],
        );

        let roster = scan_at_risk(&[user], &ledgers, 0.75);
        assert!(roster.is_empty());
    }

    #[test]
    fn student_with_no_ledgers_is_excluded() {
        let user = student("Asha", "1", "1");
        let roster = scan_at_risk(&[user], &HashMap::new(), 0.75);
        assert!(roster.is_empty());
    }
}
