//! Input validation for names, keys and paging
//!
//! The request layer validates before calling in, but every engine entry
//! point re-checks its inputs here.

use crate::{ModbError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Maximum length of database names, index names and tags
pub const MAX_NAME_LEN: usize = 128;

/// Maximum length of record keys
pub const MAX_KEY_LEN: usize = 512;

fn database_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid pattern"))
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9@_.:-]+$").expect("valid pattern"))
}

fn index_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9@_-]+$").expect("valid pattern"))
}

/// Database names double as directory names
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ModbError::validation(
            "name",
            format!("database name must be 1-{} characters", MAX_NAME_LEN),
        ));
    }
    if !database_name_pattern().is_match(name) {
        return Err(ModbError::validation(
            "name",
            "database name must match ^[A-Za-z0-9_.-]+$",
        ));
    }
    // Leading dots are reserved for staging and retired copies
    if name.starts_with('.') {
        return Err(ModbError::validation(
            "name",
            "database name must not start with '.'",
        ));
    }
    Ok(())
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(ModbError::validation(
            "key",
            format!("key must be 1-{} characters", MAX_KEY_LEN),
        ));
    }
    if !key_pattern().is_match(key) {
        return Err(ModbError::validation(
            "key",
            "key must match ^[A-Za-z0-9@_.:-]+$",
        ));
    }
    Ok(())
}

pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !index_name_pattern().is_match(name) {
        return Err(ModbError::validation(
            "index",
            format!("index name '{}' must match ^[A-Za-z0-9@_-]+$", name),
        ));
    }
    Ok(())
}

pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > MAX_NAME_LEN {
        return Err(ModbError::validation(
            "tags",
            format!("tags must be 1-{} characters", MAX_NAME_LEN),
        ));
    }
    if tag.chars().any(|c| c.is_control() || c == ',') {
        return Err(ModbError::validation(
            "tags",
            format!("tag '{}' contains a control character or comma", tag.escape_debug()),
        ));
    }
    Ok(())
}

/// Manifest count of a new database
pub fn validate_manifests(manifests: usize) -> Result<()> {
    if manifests == 0 || manifests > crate::config::MAX_MANIFESTS {
        return Err(ModbError::validation(
            "manifests",
            format!("manifests must be 1-{}", crate::config::MAX_MANIFESTS),
        ));
    }
    Ok(())
}

pub fn validate_page(page: usize, page_size: usize) -> Result<()> {
    if page == 0 {
        return Err(ModbError::validation("page", "page must be >= 1"));
    }
    if page_size == 0 {
        return Err(ModbError::validation("page_size", "page_size must be >= 1"));
    }
    Ok(())
}
