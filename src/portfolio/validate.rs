use crate::store::{FieldErrors, StoreError};
use crate::types::NewProject;

/// Check the creation form before anything reaches the store
pub fn validate_new_project(project: &NewProject) -> Result<(), StoreError> {
    let mut errors = FieldErrors::new();

    for (field, value) in [
        ("title", &project.title),
        ("description", &project.description),
        ("tech", &project.tech),
    ] {
        if value.trim().is_empty() {
            errors.add(field, "This field is required");
        }
    }

    if let Err(message) = validate_link(&project.link) {
        errors.add("link", message);
    }

    errors.into_result()
}

/// Absolute http(s) URL with a host
pub fn validate_link(link: &str) -> Result<(), String> {
    let link = link.trim();
    if link.is_empty() {
        return Err("This field is required".to_string());
    }

    let parsed = url::Url::parse(link).map_err(|e| format!("Invalid URL: {}", e))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(()),
        "http" | "https" => Err("URL must include a host".to_string()),
        other => Err(format!("Unsupported URL scheme '{}'", other)),
    }
}
