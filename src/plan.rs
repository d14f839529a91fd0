//! Uploaded test plan validation

use crate::error::{ControlError, Result};

const PLAN_EXTENSION: &str = ".jmx";
const PLAN_ROOT_ELEMENT: &str = "jmeterTestPlan";

/// Reduce an uploaded file name to `[A-Za-z0-9._-]`, dropping any directory
/// components
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "plan.jmx".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Check an upload is a well-formed test plan document and return the name
/// to store it under
pub fn validate(file_name: &str, content: &[u8]) -> Result<String> {
    if file_name.trim().is_empty() {
        return Err(ControlError::Validation("no file selected".to_string()));
    }
    if !file_name.to_ascii_lowercase().ends_with(PLAN_EXTENSION) {
        return Err(ControlError::Validation(format!(
            "'{}' is not a .jmx test plan",
            file_name
        )));
    }

    let text = std::str::from_utf8(content).map_err(|_| {
        ControlError::Validation(format!("'{}' is not valid UTF-8", file_name))
    })?;
    let document = roxmltree::Document::parse(text).map_err(|e| {
        ControlError::Validation(format!("'{}' is not well-formed XML: {}", file_name, e))
    })?;
    let root = document.root_element().tag_name().name();
    if root != PLAN_ROOT_ELEMENT {
        return Err(ControlError::Validation(format!(
            "'{}' has root element <{}>, expected <{}>",
            file_name, root, PLAN_ROOT_ELEMENT
        )));
    }

    Ok(sanitize_file_name(file_name))
}
