use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ResolverError;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("template token pattern")
});

/// Template values keyed by name. Values are plain strings; nested structures never get here.
pub type TemplateContext = BTreeMap<String, String>;

/// Substitute every `{{name}}` token in `source` with `context[name]`.
///
/// Substituted text is inserted verbatim: reserved URI characters such as `:` or `/` are
/// never percent-encoded. Expansion is a single pass, so a value that itself contains a
/// token is rejected rather than expanded.
pub fn apply_templates(context: &TemplateContext, source: &str) -> Result<String, ResolverError> {
    if !source.contains("{{") {
        return Ok(source.to_string());
    }

    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for captures in TOKEN.captures_iter(source) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = context
            .get(name.as_str())
            .ok_or_else(|| ResolverError::UnresolvedTemplate {
                token: name.as_str().to_string(),
                source_text: source.to_string(),
            })?;
        if let Some(nested) = TOKEN.captures(value).and_then(|inner| inner.get(1)) {
            return Err(ResolverError::UnresolvedTemplate {
                token: nested.as_str().to_string(),
                source_text: source.to_string(),
            });
        }
        out.push_str(&source[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&source[last..]);
    Ok(out)
}

/// Placeholder names in `source`, in order of first appearance.
pub fn template_names(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in TOKEN.captures_iter(source) {
        if let Some(name) = captures.get(1) {
            if !names.iter().any(|seen| seen == name.as_str()) {
                names.push(name.as_str().to_string());
            }
        }
    }
    names
}

/// Build a context from a JSON `templates` object, accepting scalar values only.
pub fn context_from_json(value: &Value) -> Result<TemplateContext, ResolverError> {
    let object = value
        .as_object()
        .ok_or_else(|| ResolverError::Parse("`templates` must be an object".to_string()))?;
    object
        .iter()
        .map(|(name, value)| Ok((name.clone(), scalar_to_string(name, value)?)))
        .collect()
}

pub(crate) fn scalar_to_string(name: &str, value: &Value) -> Result<String, ResolverError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(ResolverError::Parse(format!(
            "template `{name}` must be a string, number or boolean"
        ))),
    }
}
