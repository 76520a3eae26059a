//! Validation utilities for user-supplied fields

use regex_lite::Regex;
use std::sync::OnceLock;

use crate::config::limits;
use crate::error::{AppError, Result};

fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, value: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn is_email(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    matches(
        &RE,
        r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$",
        value,
    )
}

fn is_phone(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    matches(&RE, r"^\+?[0-9 ]{6,20}$", value)
}

/// Validate an email address and return its normalised form
///
/// # Returns
/// The trimmed, lowercased address, or a validation error
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.len() > 254 || !is_email(&email) {
        return Err(AppError::Validation("Indirizzo email non valido".to_string()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if len < limits::MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "La password deve avere almeno {} caratteri",
            limits::MIN_PASSWORD_LEN
        )));
    }
    if len > limits::MAX_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "La password non puo' superare {} caratteri",
            limits::MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<String> {
    let phone = phone.trim();
    if !is_phone(phone) {
        return Err(AppError::Validation("Numero di telefono non valido".to_string()));
    }
    Ok(phone.to_string())
}

/// Validate a mandatory text field
///
/// # Arguments
/// * `field` - Field name used in the error message
/// * `value` - Raw value from the request
/// * `max` - Maximum length in characters
///
/// # Returns
/// The trimmed value
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("Il campo {} e' obbligatorio", field)));
    }
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "Il campo {} non puo' superare {} caratteri",
            field, max
        )));
    }
    Ok(value.to_string())
}

/// Come `required_text`, ma un valore vuoto diventa `None`
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => required_text(field, v, max).map(Some),
    }
}

pub fn validate_rating(rating: i64) -> Result<()> {
    if !(limits::MIN_RATING..=limits::MAX_RATING).contains(&rating) {
        return Err(AppError::Validation(format!(
            "Il voto deve essere tra {} e {}",
            limits::MIN_RATING,
            limits::MAX_RATING
        )));
    }
    Ok(())
}

/// Normalizza le competenze: minuscole, senza duplicati, senza voci vuote
pub fn normalize_skills(skills: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for skill in skills {
        let skill = required_text("skills", skill, limits::MAX_CATEGORY_LEN)?.to_lowercase();
        if !normalized.contains(&skill) {
            normalized.push(skill);
        }
    }
    if normalized.len() > limits::MAX_SKILLS {
        return Err(AppError::Validation(format!(
            "Massimo {} competenze",
            limits::MAX_SKILLS
        )));
    }
    Ok(normalized)
}

pub fn validate_url(field: &str, url: &str) -> Result<String> {
    let url = url.trim();
    let valid = (url.starts_with("https://") || url.starts_with("http://"))
        && url.len() > "https://".len()
        && url.len() <= 2048
        && !url.chars().any(char::is_whitespace);
    if !valid {
        return Err(AppError::Validation(format!(
            "Il campo {} deve essere un URL http(s)",
            field
        )));
    }
    Ok(url.to_string())
}
