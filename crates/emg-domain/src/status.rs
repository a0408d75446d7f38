//! Device status labels the assignment workflow depends on.
//!
//! Statuses are free-text reference data; the workflow finds the two it needs
//! by label. Renaming one of them in the admin screen breaks the lookup.

pub const IN_OFFICE: &str = "Im Büro";
pub const IN_USE: &str = "Im Einsatz";
pub const IN_MAINTENANCE: &str = "In Wartung";
pub const DEFECTIVE: &str = "Defekt";

/// Seeded on first boot as `(label, color, sort_order)`.
pub const DEFAULT_STATUSES: [(&str, &str, i32); 4] = [
    (IN_OFFICE, "#16a34a", 1),
    (IN_USE, "#2563eb", 2),
    (IN_MAINTENANCE, "#ea580c", 3),
    (DEFECTIVE, "#dc2626", 4),
];

pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

pub fn label_matches(label: &str, wanted: &str) -> bool {
    normalize_label(label) == normalize_label(wanted)
}

/// First item whose label matches `wanted` case-insensitively.
pub fn find_by_label<'a, T>(
    items: &'a [T],
    wanted: &str,
    label: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    items.iter().find(|s| label_matches(label(s), wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ignoring_case_and_whitespace() {
        assert!(label_matches("  im büro ", IN_OFFICE));
        assert!(label_matches("IM EINSATZ", IN_USE));
        assert!(!label_matches("Im Einsatz (alt)", IN_USE));
    }

    #[test]
    fn finds_first_matching_item() {
        let statuses = vec![("a", "Defekt"), ("b", "im einsatz"), ("c", "Im Einsatz")];
        let hit = find_by_label(&statuses, IN_USE, |s| s.1).unwrap();
        assert_eq!(hit.0, "b");
        assert!(find_by_label(&statuses, IN_OFFICE, |s| s.1).is_none());
    }
}
