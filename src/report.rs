use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::RiskEntry;

/// Markdown roster of at-risk students, worst attendance first.
pub fn build_report(threshold: f64, generated_on: NaiveDate, entries: &[RiskEntry]) -> String {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        a.percentage
            .partial_cmp(&b.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Risk Report");
    let _ = writeln!(
        output,
        "Generated on {} (threshold {:.0}%)",
        generated_on,
        threshold * 100.0
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Below Threshold");

    if sorted.is_empty() {
        let _ = writeln!(output, "No students below threshold.");
    } else {
        for entry in sorted.iter() {
            let _ = writeln!(
                output,
                "- {} ({}, {}) at {:.1}%",
                entry.name,
                entry.mobile,
                entry.college.as_deref().unwrap_or("unknown college"),
                entry.percentage
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "{} student(s) need follow-up.", sorted.len());
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(name: &str, percentage: f64) -> RiskEntry {
        RiskEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mobile: "9000000001".to_string(),
            college: Some("GEC".to_string()),
            percentage,
        }
    }

    #[test]
    fn empty_roster_reads_as_all_clear() {
        let report = build_report(0.75, "2025-06-01".parse().unwrap(), &[]);
        assert!(report.contains("No students below threshold."));
    }

    #[test]
    fn roster_is_sorted_worst_first() {
        let report = build_report(
            0.75,
            "2025-06-01".parse().unwrap(),
            &[entry("Asha", 70.0), entry("Kiran", 40.0)],
        );

        let kiran = report.find("Kiran").unwrap();
        let asha = report.find("Asha").unwrap();
        assert!(kiran < asha);
        assert!(report.contains("2 student(s) need follow-up."));
    }
}
