//! Sequential order numbers in the form `51MMMM.SSSS`.
//!
//! `MMMM` is the main counter, `SSSS` the sub-counter. The sub-counter rolls
//! over into the main counter after `9999`.

use std::sync::OnceLock;

use regex::Regex;

pub const FIRST_ORDER_NUMBER: &str = "510001.0001";

const COUNTER_MAX: u32 = 9999;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^51(\d{4})\.(\d{4})$").expect("order number regex"))
}

/// Parsed `(main, sub)` counters, or `None` if `raw` is not a valid order number.
pub fn parse(raw: &str) -> Option<(u32, u32)> {
    let caps = pattern().captures(raw.trim())?;
    let main = caps.get(1)?.as_str().parse().ok()?;
    let sub = caps.get(2)?.as_str().parse().ok()?;
    Some((main, sub))
}

pub fn is_valid(raw: &str) -> bool {
    parse(raw).is_some()
}

pub fn format(main: u32, sub: u32) -> String {
    format!("51{main:04}.{sub:04}")
}

/// Successor of the highest existing order number.
///
/// No previous number, or one that does not parse, restarts the sequence.
/// `None` once both counters are exhausted (`519999.9999`).
pub fn next_after(latest: Option<&str>) -> Option<String> {
    let Some((main, sub)) = latest.and_then(parse) else {
        return Some(FIRST_ORDER_NUMBER.to_string());
    };

    if sub < COUNTER_MAX {
        Some(format(main, sub + 1))
    } else if main < COUNTER_MAX {
        Some(format(main + 1, 1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_sub_counter() {
        assert_eq!(next_after(Some("510001.0001")).as_deref(), Some("510001.0002"));
        assert_eq!(next_after(Some("510042.0999")).as_deref(), Some("510042.1000"));
    }

    #[test]
    fn sub_counter_overflow_rolls_main_counter() {
        assert_eq!(next_after(Some("510001.9999")).as_deref(), Some("510002.0001"));
    }

    #[test]
    fn exhausted_sequence_yields_nothing() {
        assert_eq!(next_after(Some("519999.9999")), None);
        let last = next_after(Some("519999.9998")).unwrap();
        assert_eq!(last, "519999.9999");
        assert!(is_valid(&last));
    }

    #[test]
    fn restarts_without_a_usable_predecessor() {
        for latest in [None, Some(""), Some("A-17"), Some("520001.0001"), Some("510001.001")] {
            assert_eq!(next_after(latest).as_deref(), Some(FIRST_ORDER_NUMBER));
        }
    }

    #[test]
    fn validates_format() {
        assert!(is_valid("510123.0456"));
        assert!(!is_valid("510123-0456"));
        assert!(!is_valid("5101230456"));
    }
}
