//! Template variable substitution.
//!
//! `{{key}}` placeholders are replaced in one pass from a flat key-value
//! map. Unknown keys stay as literal text and substituted values are never
//! re-scanned.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder pattern"));

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<String, String>,
}

impl TemplateVars {
    /// The standard contact lookup: named keys plus the positional `{{1}}`
    /// (name) and `{{2}}` (phone) used by WhatsApp-style templates.
    pub fn for_contact(name: &str, phone: &str) -> Self {
        Self::default()
            .with("nombre", name)
            .with("nombre_cliente", name)
            .with("telefono", phone)
            .with("1", name)
            .with("2", phone)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Substitute every known `{{key}}` in `text`.
pub fn render(text: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Minimal HTML rendition of a plain-text body for templates without
/// authored HTML.
pub fn text_to_html(text: &str, name: Option<&str>) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\n', "<br>");

    let greeting = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => format!(
            "<p style=\"color:#666;font-size:14px;\">Hola {},</p>\n  ",
            n.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
        ),
        None => String::new(),
    };

    format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head><meta charset=\"UTF-8\"></head>\n\
         <body style=\"font-family:Arial,sans-serif;max-width:600px;margin:0 auto;padding:20px;color:#333;\">\n  \
         {greeting}<div style=\"line-height:1.6;font-size:15px;\">{escaped}</div>\n</body>\n</html>"
    )
}
