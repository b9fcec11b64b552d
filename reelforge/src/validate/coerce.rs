//! Safe type coercion for external text.
//!
//! Each coercer parses leniently, clamps to the caller's declared range, and
//! falls back to a default instead of panicking. These replace every place
//! the legacy system evaluated configuration strings dynamically.

use super::ValidationError;

/// Parses an integer from external text, clamped to `[min, max]`.
///
/// Returns `default` when the text is empty, unparseable, or out of the
/// representable range. Surrounding whitespace is tolerated.
pub fn safe_int(s: &str, min: i64, max: i64, default: i64) -> i64 {
    debug_assert!(min <= max);
    match s.trim().parse::<i64>() {
        Ok(v) => v.clamp(min, max),
        Err(_) => default,
    }
}

/// Parses a float from external text, clamped to `[min, max]`.
///
/// Non-finite values (NaN, infinities) are rejected and replaced with
/// `default`.
pub fn safe_float(s: &str, min: f64, max: f64, default: f64) -> f64 {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v.clamp(min, max),
        _ => default,
    }
}

/// Parses a boolean from external text.
///
/// Accepts the usual spellings (`true/false`, `yes/no`, `on/off`, `1/0`),
/// case-insensitively. Anything else yields `default`.
pub fn safe_bool(s: &str, default: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => true,
        "false" | "no" | "off" | "0" => false,
        _ => default,
    }
}

/// Matches external text against a closed set of allowed values.
///
/// The comparison is case-insensitive but the returned value is the canonical
/// spelling from `allowed`, so downstream code never sees caller-controlled
/// casing.
pub fn safe_enum<'a>(
    s: &str,
    allowed: &[&'a str],
    field: &str,
) -> Result<&'a str, ValidationError> {
    let needle = s.trim();
    allowed
        .iter()
        .find(|v| v.eq_ignore_ascii_case(needle))
        .copied()
        .ok_or_else(|| ValidationError::NotAllowed {
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_int_parses_and_clamps() {
        assert_eq!(safe_int("42", 0, 100, 7), 42);
        assert_eq!(safe_int("  42  ", 0, 100, 7), 42);
        assert_eq!(safe_int("500", 0, 100, 7), 100);
        assert_eq!(safe_int("-3", 0, 100, 7), 0);
    }

    #[test]
    fn safe_int_falls_back_on_garbage() {
        assert_eq!(safe_int("", 0, 100, 7), 7);
        assert_eq!(safe_int("forty-two", 0, 100, 7), 7);
        assert_eq!(safe_int("42; rm -rf /", 0, 100, 7), 7);
        assert_eq!(safe_int("__import__('os')", 0, 100, 7), 7);
    }

    #[test]
    fn safe_float_rejects_non_finite() {
        assert_eq!(safe_float("1.5", 0.0, 10.0, 2.0), 1.5);
        assert_eq!(safe_float("NaN", 0.0, 10.0, 2.0), 2.0);
        assert_eq!(safe_float("inf", 0.0, 10.0, 2.0), 2.0);
        assert_eq!(safe_float("1e99", 0.0, 10.0, 2.0), 10.0);
    }

    #[test]
    fn safe_bool_accepts_usual_spellings() {
        for s in ["true", "TRUE", "yes", "on", "1"] {
            assert!(safe_bool(s, false));
        }
        for s in ["false", "No", "off", "0"] {
            assert!(!safe_bool(s, true));
        }
        assert!(safe_bool("maybe", true));
        assert!(!safe_bool("maybe", false));
    }

    #[test]
    fn safe_enum_returns_canonical_spelling() {
        let allowed = ["Pending Approval", "Approved"];
        assert_eq!(
            safe_enum("approved", &allowed, "status").unwrap(),
            "Approved"
        );
        assert!(safe_enum("Rejected", &allowed, "status").is_err());
    }
}
