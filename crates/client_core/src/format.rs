//! Text helpers shared by the console front ends.

use chrono::{DateTime, Duration, Utc};
use shared::domain::MailingStatus;

/// Time of day for recent timestamps, full date otherwise.
pub fn format_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if now.signed_duration_since(ts) < Duration::hours(24) {
        ts.format("%H:%M:%S").to_string()
    } else {
        ts.format("%-d %b %Y %H:%M:%S").to_string()
    }
}

pub fn ellipsize(text: &str, len: usize) -> String {
    if text.chars().count() <= len {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(len.saturating_sub(4)).collect();
    cut.push_str(" ...");
    cut
}

pub fn mailing_progress(status: &MailingStatus) -> String {
    match status.progress() {
        Some((processed, total)) => format!("{processed}/{total}"),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn recent_times_show_only_the_clock() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 13, 7, 9).unwrap();
        assert_eq!(format_time(ts, now), "13:07:09");
    }

    #[test]
    fn older_times_include_the_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        assert_eq!(format_time(ts, now), "4 Mar 2024 12:00:00");
    }

    #[test]
    fn ellipsize_cuts_long_text() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("0123456789", 10), "0123456789");
        assert_eq!(ellipsize("0123456789abc", 10), "012345 ...");
        assert_eq!(ellipsize("привет мир!", 8), "прив ...");
    }

    #[test]
    fn progress_of_idle_mailing_is_a_dash() {
        assert_eq!(mailing_progress(&MailingStatus::Idle), "-");
        let started_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let running = MailingStatus::Running {
            processed: 3,
            total: 7,
            started_at,
        };
        assert_eq!(mailing_progress(&running), "3/7");
    }
}
