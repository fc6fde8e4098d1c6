use crate::models::{AttendanceRecord, CourseLedger, Mark};

/// Whether an incoming mark corrects an existing record or starts a new one.
///
/// The natural key is (date, year, semester, status) — not date alone. A
/// second mark for the same day with the opposite status is a distinct
/// record; that pairing is kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Re-submission of a known mark; only `periods` is rewritten.
    Update { index: usize },
    Append,
}

pub fn merge_decision(records: &[AttendanceRecord], mark: &Mark) -> MergeDecision {
    let found = records.iter().position(|record| {
        record.date == mark.date
            && record.year == mark.year
            && record.semester == mark.semester
            && record.status == mark.status
    });

    match found {
        Some(index) => MergeDecision::Update { index },
        None => MergeDecision::Append,
    }
}

/// Merge a mark into an in-memory ledger. After this returns, exactly one
/// record exists for the mark's natural key, carrying the mark's `periods`.
pub fn apply_mark(ledger: &mut CourseLedger, mark: &Mark) -> MergeDecision {
    let decision = merge_decision(&ledger.records, mark);

    match decision {
        MergeDecision::Update { index } => {
            ledger.records[index].periods = mark.periods;
        }
        MergeDecision::Append => {
            ledger.records.push(AttendanceRecord {
                date: mark.date,
                status: mark.status,
                year: mark.year.clone(),
                semester: mark.semester.clone(),
                periods: mark.periods,
            });
        }
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn mark(date: &str, status: AttendanceStatus, periods: i32) -> Mark {
        Mark {
            date: date.parse::<NaiveDate>().unwrap(),
            status,
            year: "1".to_string(),
            semester: "1".to_string(),
            periods,
        }
    }

    fn empty_ledger() -> CourseLedger {
        CourseLedger {
            user_id: Uuid::new_v4(),
            course: "Math".to_string(),
            records: Vec::new(),
        }
    }

    #[test]
    fn first_mark_appends() {
        let mut ledger = empty_ledger();
        let decision = apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Present, 1));

        assert_eq!(decision, MergeDecision::Append);
        assert_eq!(ledger.records.len(), 1);
        assert_eq!(ledger.records[0].periods, 1);
    }

    #[test]
    fn remark_same_key_updates_periods_in_place() {
        let mut ledger = empty_ledger();
        apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Present, 1));
        let decision = apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Present, 3));

        assert_eq!(decision, MergeDecision::Update { index: 0 });
        assert_eq!(ledger.records.len(), 1);
        assert_eq!(ledger.records[0].periods, 3);
        assert_eq!(ledger.records[0].status, AttendanceStatus::Present);
    }

    #[test]
    fn last_submitted_periods_wins() {
        let mut ledger = empty_ledger();
        for periods in [2, 5, 1] {
            apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Absent, periods));
        }

        assert_eq!(ledger.records.len(), 1);
        assert_eq!(ledger.records[0].periods, 1);
    }

    #[test]
    fn same_date_different_status_stays_two_records() {
        let mut ledger = empty_ledger();
        apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Present, 1));
        apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Absent, 1));

        assert_eq!(ledger.records.len(), 2);
    }

    #[test]
    fn different_scope_is_a_new_record() {
        let mut ledger = empty_ledger();
        apply_mark(&mut ledger, &mark("2025-01-10", AttendanceStatus::Present, 1));

        let mut other_semester = mark("2025-01-10", AttendanceStatus::Present, 2);
        other_semester.semester = "2".to_string();
        let decision = apply_mark(&mut ledger, &other_semester);

        assert_eq!(decision, MergeDecision::Append);
        assert_eq!(ledger.records.len(), 2);
        assert_eq!(ledger.records[0].periods, 1);
    }
}
