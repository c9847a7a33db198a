// Pure derivations and the cascade that applies them
pub mod cascade;
pub mod pricing;

// Catalog services
pub mod categories;
pub mod components;
pub mod compositions;
pub mod products;

// Order services
pub mod orders;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::ServiceError;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());

/// Checks a caller supplied slug.
pub fn validate_slug(slug: &str) -> Result<(), ServiceError> {
    if SLUG_RE.is_match(slug) {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "Slug '{}' must contain only lowercase letters, digits and single hyphens",
            slug
        )))
    }
}

/// Builds a slug from a title: lowercase ASCII alphanumerics separated by
/// single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Uses the explicit slug if given, otherwise derives one from `title`.
pub fn resolve_slug(explicit: Option<&str>, title: &str) -> Result<String, ServiceError> {
    let slug = match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_string(),
        None => slugify(title),
    };
    validate_slug(&slug)?;
    Ok(slug)
}

/// Trims a required text field, rejecting blanks.
pub fn require_text(field: &str, value: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be blank",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Maps a foreign-key violation on delete to `Conflict`.
pub(crate) fn protect_delete(err: sea_orm::DbErr, message: String) -> ServiceError {
    match err.sql_err() {
        Some(sea_orm::SqlErr::ForeignKeyConstraintViolation(_)) => ServiceError::Conflict(message),
        _ => ServiceError::db_error(err),
    }
}

/// Maps a unique-constraint violation on insert or update to `Conflict`.
pub(crate) fn unique_violation(err: sea_orm::DbErr, message: String) -> ServiceError {
    match err.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(message),
        _ => ServiceError::db_error(err),
    }
}
