//! Quality checks for variable labels.

use microdata_types::Variable;

/// Labels whose digit share of non-space characters exceeds this are dropped.
pub const MAX_DIGIT_RATIO: f64 = 0.5;

/// Whether a label is usable for clustering.
///
/// A label is rejected when it is blank, when more than half of its
/// non-space characters are ASCII digits, or when it starts with `(` (aggregates
/// such as "(sum) cgrp05" or "(mean) internet").
pub fn is_valid_label(raw: &str) -> bool {
    let label = raw.trim();
    if label.is_empty() {
        return false;
    }

    let num_digits = label.chars().filter(char::is_ascii_digit).count();
    let num_chars = label.chars().filter(|c| *c != ' ').count();
    if num_chars == 0 || num_digits as f64 / num_chars as f64 > MAX_DIGIT_RATIO {
        return false;
    }

    !label.starts_with('(')
}

/// Whether a variable has a usable label.
pub fn is_valid_variable(var: &Variable) -> bool {
    is_valid_label(var.label_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_label() {
        assert!(is_valid_label("Age of respondent"));
        assert!(is_valid_label("  Toilet type  "));
    }

    #[test]
    fn test_blank_label() {
        assert!(!is_valid_label(""));
        assert!(!is_valid_label("   \t"));
    }

    #[test]
    fn test_digit_ratio() {
        assert!(!is_valid_label("123456"));
        // 3 digits of 6 non-space chars is exactly 0.5 and kept
        assert!(is_valid_label("abc 123"));
        // 4 of 7 is over the threshold
        assert!(!is_valid_label("abc 1234"));
        // spaces do not count towards the denominator
        assert!(!is_valid_label("q 1 2"));
    }

    #[test]
    fn test_numeric_symbols_are_not_digits() {
        assert!(is_valid_label("½½½"));
        assert!(is_valid_label("Grade Ⅷ Ⅷ Ⅷ Ⅷ Ⅷ"));
        assert!(is_valid_label("Share ¼ ¾ ½ ¼"));
    }

    #[test]
    fn test_parenthesis_prefix() {
        assert!(!is_valid_label("(sum) income"));
        assert!(!is_valid_label(" (mean) internet"));
        assert!(is_valid_label("income (sum)"));
    }

    #[test]
    fn test_variable_uses_label_fallback() {
        let mut var = Variable::new("v1", "");
        var.labl = None;
        var.label = Some("Household size".to_string());
        assert!(is_valid_variable(&var));
        assert!(!is_valid_variable(&Variable::new("v2", "(sum) health")));
    }
}
