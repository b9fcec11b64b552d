//! Text and JSON payload validation.

use super::ValidationError;
use regex::Regex;
use std::sync::OnceLock;

/// Maximum length accepted for any single dashboard cell.
pub const MAX_CELL_LEN: usize = 5_000;

/// Patterns that are never allowed to cross a trust boundary, regardless of
/// which field they appear in.
fn dangerous_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)<\s*script",
            r"|javascript\s*:",
            r"|\.\./",
            r"|\.\.\\",
            r"|\beval\s*\(",
            r"|\bexec\s*\(",
            r"|__import__",
        ))
        .expect("dangerous pattern regex is valid")
    })
}

/// Rejects text containing script tags, `javascript:` URIs, path traversal
/// segments, evaluation attempts, or control characters.
///
/// Newlines and tabs are tolerated; every other C0 control byte is not.
pub fn check_text(s: &str, field: &str) -> Result<(), ValidationError> {
    if let Some(m) = dangerous_pattern().find(s) {
        return Err(ValidationError::DangerousPattern {
            field: field.to_string(),
            reason: format!("matched {:?}", m.as_str()),
        });
    }
    if s.chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
    {
        return Err(ValidationError::DangerousPattern {
            field: field.to_string(),
            reason: "control character".to_string(),
        });
    }
    Ok(())
}

/// Validates a value destined for a dashboard cell: dangerous patterns and
/// the cell length limit.
pub fn check_cell(s: &str, field: &str) -> Result<(), ValidationError> {
    check_text(s, field)?;
    if s.len() > MAX_CELL_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_CELL_LEN,
        });
    }
    Ok(())
}

/// Validates a cell value and truncates it to the limit on success.
///
/// Truncation respects char boundaries; rejection is still an error so the
/// caller can surface which field carried the bad value.
pub fn sanitize_cell(s: &str, field: &str) -> Result<String, ValidationError> {
    check_text(s, field)?;
    if s.len() <= MAX_CELL_LEN {
        return Ok(s.to_string());
    }
    let mut end = MAX_CELL_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    Ok(s[..end].to_string())
}

/// Validates a filename component: no separators, no traversal, a closed
/// charset of `[A-Za-z0-9._-]`, and a sane length.
pub fn check_filename(s: &str, field: &str) -> Result<(), ValidationError> {
    if s.is_empty() {
        return Err(ValidationError::Missing {
            field: field.to_string(),
        });
    }
    if s.len() > 255 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 255,
        });
    }
    if s == "." || s == ".." {
        return Err(ValidationError::DangerousPattern {
            field: field.to_string(),
            reason: "dot segment".to_string(),
        });
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ValidationError::DangerousPattern {
            field: field.to_string(),
            reason: "character outside [A-Za-z0-9._-]".to_string(),
        });
    }
    Ok(())
}

/// Checks that a JSON object only carries keys from the declared schema.
///
/// External API responses are checked against their allowed key set before
/// any field is read, so a provider cannot smuggle unexpected structure into
/// downstream stages.
pub fn check_allowed_keys(
    value: &serde_json::Value,
    allowed: &[&str],
    context: &str,
) -> Result<(), ValidationError> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ValidationError::UnexpectedKey {
                context: context.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_text_rejects_script_tags() {
        assert!(check_text("<script>alert(1)</script>", "title").is_err());
        assert!(check_text("< SCRIPT src=x>", "title").is_err());
    }

    #[test]
    fn check_text_rejects_javascript_uris_and_traversal() {
        assert!(check_text("javascript:void(0)", "url").is_err());
        assert!(check_text("JavaScript : alert(1)", "url").is_err());
        assert!(check_text("../../etc/passwd", "path").is_err());
        assert!(check_text("..\\windows", "path").is_err());
    }

    #[test]
    fn check_text_rejects_evaluation_attempts() {
        assert!(check_text("eval('code')", "cell").is_err());
        assert!(check_text("exec (payload)", "cell").is_err());
        assert!(check_text("__import__('os').system('id')", "cell").is_err());
    }

    #[test]
    fn check_text_rejects_control_characters() {
        assert!(check_text("hello\x00world", "cell").is_err());
        assert!(check_text("hello\x1bworld", "cell").is_err());
        // Newlines and tabs are normal in scripts
        assert!(check_text("line one\nline two\ttabbed", "cell").is_ok());
    }

    #[test]
    fn check_text_accepts_ordinary_content() {
        assert!(check_text("Three Morning Habits That Changed My Life", "title").is_ok());
        assert!(check_text("50% off! (limited)", "title").is_ok());
    }

    #[test]
    fn sanitize_cell_truncates_on_boundary() {
        let long = "é".repeat(MAX_CELL_LEN); // 2 bytes per char
        let cell = sanitize_cell(&long, "script").unwrap();
        assert!(cell.len() <= MAX_CELL_LEN);
        assert!(cell.chars().all(|c| c == 'é'));
    }

    #[test]
    fn check_filename_enforces_charset() {
        assert!(check_filename("narration-01.mp3", "file").is_ok());
        assert!(check_filename("a/b.mp3", "file").is_err());
        assert!(check_filename("..", "file").is_err());
        assert!(check_filename("", "file").is_err());
        assert!(check_filename("clip one.mp4", "file").is_err());
    }

    #[test]
    fn check_allowed_keys_flags_extras() {
        let v = json!({"id": "x", "url": "https://example"});
        assert!(check_allowed_keys(&v, &["id", "url"], "upload response").is_ok());
        assert!(check_allowed_keys(&v, &["id"], "upload response").is_err());
        // Non-objects pass through; their shape is checked by deserialization
        assert!(check_allowed_keys(&json!([1, 2]), &[], "list").is_ok());
    }
}
