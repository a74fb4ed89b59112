use crate::error::{ApiError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// A prompt with `{{name}}` placeholders filled from a JSON object.
///
/// String values are inserted verbatim; anything else is inserted as compact JSON.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: &'static str,
}

impl PromptTemplate {
    pub const fn new(template: &'static str) -> Self {
        Self { template }
    }

    pub fn placeholders(&self) -> Vec<&str> {
        PLACEHOLDER
            .captures_iter(self.template)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
            .collect()
    }

    pub fn render(&self, vars: &Value) -> Result<String> {
        let object = vars.as_object().ok_or_else(|| {
            ApiError::InvalidInput("Prompt variables must be a JSON object".to_string())
        })?;

        let mut rendered = String::with_capacity(self.template.len());
        let mut last = 0;
        for cap in PLACEHOLDER.captures_iter(self.template) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let value = object.get(name.as_str()).ok_or_else(|| {
                ApiError::InvalidInput(format!("Missing prompt variable '{}'", name.as_str()))
            })?;

            rendered.push_str(&self.template[last..whole.start()]);
            match value {
                Value::String(s) => rendered.push_str(s),
                Value::Null => {}
                other => rendered.push_str(&other.to_string()),
            }
            last = whole.end();
        }
        rendered.push_str(&self.template[last..]);

        Ok(rendered)
    }
}
