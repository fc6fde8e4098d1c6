use chrono::NaiveDate;

use crate::models::{AttendanceRecord, AttendanceStatus, CourseStats, Projection, CAN_MISS_CAP};

/// Period-weighted counts for the records matching the requested scope.
///
/// A record counts only if its year and semester match by string equality
/// and its date is on or before `as_of`. ISO dates keep lexical and
/// chronological order identical, so `NaiveDate` comparison is exactly the
/// source data's string comparison.
pub fn course_stats(
    records: &[AttendanceRecord],
    year: &str,
    semester: &str,
    as_of: NaiveDate,
) -> CourseStats {
    let mut total = 0i64;
    let mut present = 0i64;

    for record in records {
        if record.year != year || record.semester != semester || record.date > as_of {
            continue;
        }

        // Records imported without a period count read as one period.
        let periods = if record.periods < 1 {
            1
        } else {
            i64::from(record.periods)
        };

        total += periods;
        if record.status == AttendanceStatus::Present {
            present += periods;
        }
    }

    CourseStats {
        total,
        present,
        absent: total - present,
    }
}

/// Minimum additional all-present periods needed for the ratio to reach the
/// threshold, where each added period raises both `present` and `total`.
pub fn classes_needed(total: i64, present: i64, threshold: f64) -> i64 {
    if total == 0 {
        return 0;
    }

    let needed = (threshold * total as f64).ceil() as i64 - present;
    needed.max(0)
}

/// How many further absences (raising `total` only) can accumulate before
/// the ratio first drops below the threshold. Iterative on purpose: the
/// boundary is "first index at which the ratio is strictly below", which a
/// closed-form division gets off-by-one on at exact threshold points.
pub fn classes_can_miss(total: i64, present: i64, threshold: f64, cap: i64) -> i64 {
    if total == 0 {
        return 0;
    }

    let mut extra = 0i64;
    loop {
        let ratio = present as f64 / (total + extra + 1) as f64;
        if ratio < threshold {
            return extra;
        }
        extra += 1;
        if extra > cap {
            return cap;
        }
    }
}

pub fn project(stats: &CourseStats, threshold: f64) -> Projection {
    Projection {
        needed: classes_needed(stats.total, stats.present, threshold),
        can_miss: classes_can_miss(stats.total, stats.present, threshold, CAN_MISS_CAP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_THRESHOLD;

    fn record(date: &str, status: AttendanceStatus, year: &str, semester: &str, periods: i32) -> AttendanceRecord {
        AttendanceRecord {
            date: date.parse::<NaiveDate>().unwrap(),
            status,
            year: year.to_string(),
            semester: semester.to_string(),
            periods,
        }
    }

    fn as_of(date: &str) -> NaiveDate {
        date.parse().unwrap()
    }

    #[test]
    fn empty_ledger_yields_zero_stats() {
        let stats = course_stats(&[], "1", "1", as_of("2025-06-01"));
        assert_eq!(stats, CourseStats::default());
        assert_eq!(stats.ratio(), 0.0);
        assert_eq!(stats.percentage(), 0.0);
    }

    #[test]
    fn single_present_mark_is_full_attendance() {
        let records = vec![record("2025-01-10", AttendanceStatus::Present, "1", "1", 1)];
        let stats = course_stats(&records, "1", "1", as_of("2025-06-01"));

        assert_eq!(stats.total, 1);
        assert_eq!(stats.present, 1);
        assert_eq!(stats.percentage(), 100.0);
    }

    #[test]
    fn totals_are_period_weighted() {
        let records = vec![
            record("2025-01-10", AttendanceStatus::Present, "1", "1", 3),
            record("2025-01-11", AttendanceStatus::Absent, "1", "1", 2),
        ];
        let stats = course_stats(&records, "1", "1", as_of("2025-06-01"));

        assert_eq!(stats.total, 5);
        assert_eq!(stats.present, 3);
        assert_eq!(stats.absent, 2);
        assert_eq!(stats.percentage(), 60.0);
    }

    #[test]
    fn total_is_present_plus_absent() {
        let records = vec![
            record("2025-01-10", AttendanceStatus::Present, "1", "1", 4),
            record("2025-01-11", AttendanceStatus::Absent, "1", "1", 1),
            record("2025-01-12", AttendanceStatus::Present, "1", "1", 2),
        ];
        let stats = course_stats(&records, "1", "1", as_of("2025-06-01"));
        assert_eq!(stats.total, stats.present + stats.absent);
    }

    #[test]
    fn other_scopes_are_excluded() {
        let records = vec![
            record("2025-01-10", AttendanceStatus::Present, "1", "1", 1),
            record("2025-01-11", AttendanceStatus::Present, "1", "2", 1),
            record("2025-01-12", AttendanceStatus::Present, "2", "1", 1),
        ];
        let stats = course_stats(&records, "1", "1", as_of("2025-06-01"));
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn records_after_as_of_date_are_excluded() {
        let records = vec![
            record("2025-01-10", AttendanceStatus::Present, "1", "1", 1),
            record("2025-01-20", AttendanceStatus::Absent, "1", "1", 1),
        ];
        let stats = course_stats(&records, "1", "1", as_of("2025-01-15"));

        assert_eq!(stats.total, 1);
        assert_eq!(stats.present, 1);
    }

    #[test]
    fn as_of_date_is_inclusive() {
        let records = vec![record("2025-01-15", AttendanceStatus::Present, "1", "1", 1)];
        let stats = course_stats(&records, "1", "1", as_of("2025-01-15"));
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn zero_period_records_count_as_one() {
        let records = vec![record("2025-01-10", AttendanceStatus::Present, "1", "1", 0)];
        let stats = course_stats(&records, "1", "1", as_of("2025-06-01"));
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn percentage_rounds_to_one_decimal() {
        let stats = CourseStats {
            total: 3,
            present: 2,
            absent: 1,
        };
        assert_eq!(stats.percentage(), 66.7);
    }

    #[test]
    fn needed_rounds_up_to_the_threshold() {
        // 10 classes, 6 present: ceil(7.5) - 6 = 2.
        assert_eq!(classes_needed(10, 6, DEFAULT_THRESHOLD), 2);
    }

    #[test]
    fn needed_is_zero_when_already_above_threshold() {
        assert_eq!(classes_needed(10, 9, DEFAULT_THRESHOLD), 0);
    }

    #[test]
    fn needed_is_zero_without_data() {
        assert_eq!(classes_needed(0, 0, DEFAULT_THRESHOLD), 0);
    }

    #[test]
    fn needed_is_non_increasing_in_present() {
        let total = 20;
        let mut last = i64::MAX;
        for present in 0..=total {
            let needed = classes_needed(total, present, DEFAULT_THRESHOLD);
            assert!(needed <= last);
            last = needed;
        }
    }

    #[test]
    fn can_miss_is_zero_when_already_below_threshold() {
        // 6/11 is already below 75%, so not a single further absence fits.
        assert_eq!(classes_can_miss(10, 6, DEFAULT_THRESHOLD, CAN_MISS_CAP), 0);
    }

    #[test]
    fn can_miss_boundary_at_full_attendance() {
        // total=3, present=3: 3/4 = 0.75 holds, 3/5 = 0.6 fails, so exactly
        // one more absence is tolerable. Matches manual enumeration.
        assert_eq!(classes_can_miss(3, 3, DEFAULT_THRESHOLD, CAN_MISS_CAP), 1);
    }

    #[test]
    fn can_miss_is_zero_without_data() {
        assert_eq!(classes_can_miss(0, 0, DEFAULT_THRESHOLD, CAN_MISS_CAP), 0);
    }

    #[test]
    fn can_miss_stops_at_cap() {
        assert_eq!(classes_can_miss(1000, 1000, 0.0001, CAN_MISS_CAP), CAN_MISS_CAP);
    }

    #[test]
    fn projection_combines_both_scenarios() {
        let stats = CourseStats {
            total: 10,
            present: 6,
            absent: 4,
        };
        let projection = project(&stats, DEFAULT_THRESHOLD);
        assert_eq!(projection.needed, 2);
        assert_eq!(projection.can_miss, 0);
    }
}
