//! Cache key construction.
//!
//! Keys are composite strings `category:arg1:arg2:...`. Nil arguments are
//! dropped. Keys are opaque to callers; only the maintenance preload path
//! inspects them (by prefix and guild-id segment).

use super::categories::Category;

/// One segment of a composite cache key. `None` segments are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPart(pub Option<String>);

impl From<u64> for KeyPart {
    fn from(v: u64) -> Self {
        KeyPart(Some(v.to_string()))
    }
}

impl From<i64> for KeyPart {
    fn from(v: i64) -> Self {
        KeyPart(Some(v.to_string()))
    }
}

impl From<&str> for KeyPart {
    fn from(v: &str) -> Self {
        KeyPart(Some(v.to_string()))
    }
}

impl From<String> for KeyPart {
    fn from(v: String) -> Self {
        KeyPart(Some(v))
    }
}

impl<T> From<Option<T>> for KeyPart
where
    T: Into<KeyPart>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => KeyPart(None),
        }
    }
}

/// Build the composite key for a category and argument sequence.
pub fn cache_key(category: Category, parts: &[KeyPart]) -> String {
    let joined: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.0.as_deref())
        .collect();
    format!("{}:{}", category.as_str(), joined.join(":"))
}

/// Guild id segment of a key, when the first argument is a numeric id.
pub(super) fn guild_id_segment(key: &str) -> Option<u64> {
    key.split(':').nth(1)?.parse().ok()
}
