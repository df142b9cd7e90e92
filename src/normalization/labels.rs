/// Label stored for items whose difficulty is missing upstream.
pub const UNKNOWN_DIFFICULTY: &str = "Unknown";

pub const MULTIPLE_CHOICE: &str = "Multiple Choice";
pub const TRUE_FALSE: &str = "True/False";

/// Canonical difficulty label: first character upper-cased, the rest untouched.
///
/// `easy` -> `Easy`, `HARD` -> `HARD`, absent/empty -> `Unknown`.
pub fn difficulty_label(raw: Option<&str>) -> String {
    let raw = match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => UNKNOWN_DIFFICULTY,
    };
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Translate the catalog's question format code into a display label.
pub fn type_label(raw: &str) -> String {
    match raw {
        "multiple" => MULTIPLE_CHOICE.to_string(),
        "boolean" => TRUE_FALSE.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalizes_first_letter_only() {
        assert_eq!(difficulty_label(Some("easy")), "Easy");
        assert_eq!(difficulty_label(Some("medium")), "Medium");
        assert_eq!(difficulty_label(Some("HARD")), "HARD");
    }

    #[test]
    fn missing_difficulty_is_unknown() {
        assert_eq!(difficulty_label(None), "Unknown");
        assert_eq!(difficulty_label(Some("  ")), "Unknown");
    }

    #[test]
    fn boolean_maps_to_true_false() {
        assert_eq!(type_label("boolean"), "True/False");
        assert_eq!(type_label("multiple"), "Multiple Choice");
        assert_eq!(type_label("open"), "open");
    }
}
