//! Localized message catalog.
//!
//! The catalog is a JSON object of nested sections; leaves are maps from
//! locale (`en-US`, `fr`, `es-ES`, `de`, `it`) to message template. It is
//! loaded once at startup and validated up front: a missing, oversized,
//! empty, unparseable, non-object or overly deep file aborts the process.
//!
//! Lookups take dotted keys (`app_initialize.messages.success`), fall back
//! to `en-US` per leaf, and format `{placeholder}` parameters from
//! sanitized arguments. A template referencing a missing placeholder is
//! returned unformatted rather than erroring mid-command.

use std::{collections::HashMap, path::Path, sync::Arc};

use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::cache::CacheStore;

/// Default locale and final fallback of every locale chain.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Maximum dotted-key depth of a lookup.
const MAX_KEY_DEPTH: usize = 5;

/// Maximum formatted length of a single message argument.
const MAX_ARG_LEN: usize = 200;

/// Maximum dotted-key length accepted by lookups.
const MAX_KEY_LEN: usize = 100;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Failed to read translation catalog '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Translation catalog '{path}' exceeds size limit ({size} > {limit} bytes)")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Translation catalog '{path}' is empty")]
    Empty { path: String },

    #[error("Failed to parse translation catalog '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Translation catalog '{path}' must be a top-level JSON object")]
    NotAnObject { path: String },

    #[error("Translation catalog '{path}' exceeds maximum nesting depth {limit}")]
    TooDeep { path: String, limit: usize },
}

/// Immutable message catalog.
pub struct TranslationStore {
    catalog: Value,
}

impl TranslationStore {
    /// Load and validate the catalog. Called once at startup; any failure
    /// is fatal.
    pub fn load(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self, TranslationError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let metadata = std::fs::metadata(path).map_err(|source| TranslationError::Io {
            path: display.clone(),
            source,
        })?;
        if metadata.len() > max_bytes {
            return Err(TranslationError::TooLarge {
                path: display,
                size: metadata.len(),
                limit: max_bytes,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|source| TranslationError::Io {
            path: display.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Err(TranslationError::Empty { path: display });
        }

        let catalog: Value = serde_json::from_str(&raw).map_err(|source| TranslationError::Parse {
            path: display.clone(),
            source,
        })?;
        Self::from_value(catalog, &display)
    }

    /// Validate an already parsed catalog. Used by `load` and by tests.
    pub fn from_value(catalog: Value, path: &str) -> Result<Self, TranslationError> {
        if !catalog.is_object() {
            return Err(TranslationError::NotAnObject {
                path: path.to_string(),
            });
        }
        // Dotted keys traverse at most MAX_KEY_DEPTH objects; the leaf adds
        // one more level (the locale map).
        if object_depth(&catalog) > MAX_KEY_DEPTH + 1 {
            return Err(TranslationError::TooDeep {
                path: path.to_string(),
                limit: MAX_KEY_DEPTH + 1,
            });
        }
        Ok(Self { catalog })
    }

    /// Resolve a dotted key to its leaf locale map and pick `locale`,
    /// falling back to `en-US`. Returns the raw template, unformatted.
    pub fn lookup(&self, key: &str, locale: &str) -> Option<String> {
        let key = validate_key(key)?;
        let keys: Vec<&str> = key.split('.').collect();
        let entry = get_nested_value(&self.catalog, &keys, MAX_KEY_DEPTH)?;

        let Some(leaf) = entry.as_object() else {
            error!(key = %key, "Final value for translation key is not an object");
            return None;
        };

        let message = [locale, DEFAULT_LOCALE].iter().find_map(|loc| {
            leaf.get(*loc)
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
        });
        match message {
            Some(m) => Some(m.to_string()),
            None => {
                warn!(key = %key, locale = %locale, "No message found for translation key");
                None
            }
        }
    }

    /// Localized message for a user-facing reply. Returns an empty string
    /// on any failure (callers always have something to send).
    pub fn get_user_message(
        &self,
        locale: &str,
        key: &str,
        args: &[(&str, Value)],
    ) -> String {
        match self.lookup(key, locale) {
            Some(template) => format_message(&template, &sanitize_args(args), key),
            None => String::new(),
        }
    }

    /// Localized message resolved via the guild's configured language.
    pub async fn get_guild_message(
        &self,
        cache: &CacheStore,
        guild_id: u64,
        key: &str,
        args: &[(&str, Value)],
    ) -> String {
        let locale = cache
            .get_guild_data(guild_id, "guild_lang")
            .await
            .and_then(|v| v.as_str().map(normalize_locale))
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());
        self.get_user_message(&locale, key, args)
    }
}

/// Effective locale for a member: roster language, then user-setup locale,
/// then guild language, then `en-US`.
pub async fn get_effective_locale(
    cache: &Arc<CacheStore>,
    guild_id: u64,
    user_id: u64,
) -> String {
    if let Some(roster) = cache
        .get(
            crate::cache::Category::RosterData,
            &[crate::cache::KeyPart::from("guild_members")],
        )
        .await
        && let Some(member) = roster.get(format!("{guild_id}:{user_id}"))
        && let Some(language) = member.get("language").and_then(Value::as_str)
        && !language.is_empty()
    {
        return normalize_locale(language);
    }

    if let Some(setup) = cache.get_user_data(guild_id, user_id, "setup").await
        && let Some(locale) = setup.get("locale").and_then(Value::as_str)
        && !locale.is_empty()
    {
        return normalize_locale(locale);
    }

    if let Some(lang) = cache.get_guild_data(guild_id, "guild_lang").await
        && let Some(lang) = lang.as_str()
        && !lang.is_empty()
    {
        return normalize_locale(lang);
    }

    DEFAULT_LOCALE.to_string()
}

/// `en` is the catalog's `en-US`.
pub fn normalize_locale(locale: &str) -> String {
    if locale == "en" {
        DEFAULT_LOCALE.to_string()
    } else {
        locale.to_string()
    }
}

/// Traverse nested objects by key chain. Returns `None` on a missing key,
/// a structural mismatch, or a chain longer than `max_depth`.
pub fn get_nested_value<'a>(data: &'a Value, keys: &[&str], max_depth: usize) -> Option<&'a Value> {
    if keys.len() > max_depth {
        warn!(key = %keys.join("."), "Translation key depth exceeds limit");
        return None;
    }

    let mut entry = data;
    for (i, k) in keys.iter().enumerate() {
        let Some(map) = entry.as_object() else {
            error!(
                key = %keys[..=i].join("."),
                "Unexpected catalog structure at key level"
            );
            return None;
        };
        match map.get(*k) {
            Some(next) => entry = next,
            None => {
                warn!(key = %keys[..=i].join("."), "Translation key not found");
                return None;
            }
        }
    }
    Some(entry)
}

/// Keep only identifier-shaped argument names; render scalars as strings
/// (truncated) and replace non-scalars with their type name.
pub fn sanitize_args(args: &[(&str, Value)]) -> HashMap<String, String> {
    let mut safe = HashMap::new();
    for (name, value) in args {
        if !is_identifier(name) {
            warn!(name = %name, "Unsafe message argument name filtered");
            continue;
        }
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Object(_) => "object".to_string(),
        };
        safe.insert(name.to_string(), truncate_arg(&rendered));
    }
    safe
}

/// Substitute `{name}` placeholders. If the template references a name the
/// arguments do not provide, the template is returned unformatted.
fn format_message(template: &str, args: &HashMap<String, String>, key: &str) -> String {
    let re = regex::Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(template) {
        if !args.contains_key(&cap[1]) {
            error!(key = %key, placeholder = %&cap[1], "Missing placeholder for translation key");
            return template.to_string();
        }
    }

    re.replace_all(template, |caps: &regex::Captures<'_>| {
        args[&caps[1]].clone()
    })
    .into_owned()
}

fn validate_key(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        error!("Empty translation key");
        return None;
    }
    let key = if key.len() > MAX_KEY_LEN {
        let mut end = MAX_KEY_LEN;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        warn!(len = key.len(), "Translation key too long, truncating");
        &key[..end]
    } else {
        key
    };
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        error!(key = %key, "Invalid translation key format");
        return None;
    }
    Some(key.to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn truncate_arg(value: &str) -> String {
    if value.len() <= MAX_ARG_LEN {
        return value.to_string();
    }
    let mut end = MAX_ARG_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

fn object_depth(value: &Value) -> usize {
    match value.as_object() {
        Some(map) => 1 + map.values().map(object_depth).max().unwrap_or(0),
        None => 0,
    }
}
