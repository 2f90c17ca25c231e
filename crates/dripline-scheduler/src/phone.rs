//! Phone normalization for the Peruvian numbering plan.

/// Normalize a free-form phone to international format.
///
/// - `51` + 9 digits → `+51XXXXXXXXX`
/// - 9 digits (local mobile) → `+51` prefix
/// - input already starting with `+` is kept verbatim
/// - anything else gets a `+` in front of its digits
///
/// Empty input, or input without any digit, yields an empty string.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    if digits.starts_with("51") && digits.len() == 11 {
        return format!("+{digits}");
    }
    if digits.len() == 9 {
        return format!("+51{digits}");
    }
    if raw.starts_with('+') {
        return raw.to_string();
    }
    format!("+{digits}")
}

/// Normalized phone, or `None` when nothing dialable remains.
pub fn normalized(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_phone).filter(|p| !p.is_empty())
}
