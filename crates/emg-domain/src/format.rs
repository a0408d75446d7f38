//! Display formatting shared by tables and the dashboard (Swiss German).

use chrono::NaiveDate;

pub const EMPTY: &str = "-";

/// Maintenance interval in months as shown in the admin table.
pub fn interval(months: Option<i32>) -> String {
    match months {
        None => EMPTY.to_string(),
        Some(m) if m <= 0 => EMPTY.to_string(),
        Some(1) => "1 Monat".to_string(),
        Some(12) => "1 Jahr".to_string(),
        Some(m) if m % 12 == 0 => format!("{} Jahre", m / 12),
        Some(m) => format!("{m} Monate"),
    }
}

/// `dd.MM.yyyy`, or `-` when absent.
pub fn date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| EMPTY.to_string())
}

pub fn date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> String {
    match (start, end) {
        (None, None) => EMPTY.to_string(),
        (None, Some(_)) => format!("bis {}", date(end)),
        (Some(_), None) => format!("ab {}", date(start)),
        (Some(_), Some(_)) => format!("{} - {}", date(start), date(end)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_labels() {
        assert_eq!(interval(Some(1)), "1 Monat");
        assert_eq!(interval(Some(12)), "1 Jahr");
        assert_eq!(interval(Some(24)), "2 Jahre");
        assert_eq!(interval(Some(5)), "5 Monate");
        assert_eq!(interval(None), "-");
    }

    #[test]
    fn non_positive_intervals_show_as_empty() {
        assert_eq!(interval(Some(0)), "-");
        assert_eq!(interval(Some(-12)), "-");
    }

    #[test]
    fn date_and_range() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 5);
        let b = NaiveDate::from_ymd_opt(2024, 2, 29);
        assert_eq!(date(a), "05.01.2024");
        assert_eq!(date(None), "-");
        assert_eq!(date_range(a, b), "05.01.2024 - 29.02.2024");
        assert_eq!(date_range(a, None), "ab 05.01.2024");
        assert_eq!(date_range(None, b), "bis 29.02.2024");
        assert_eq!(date_range(None, None), "-");
    }
}
