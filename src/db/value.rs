//! Dynamic parameter and row values.
//!
//! The statement-level API (`run_query`) binds heterogeneous parameters and
//! returns decoded rows without tying callers to the driver's row type; the
//! cache loader composes these rows into JSON values.

use serde_json::Value;

use super::error::{DbError, DbResult};

/// A bindable statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(v as i64)
    }
}

impl From<u64> for SqlParam {
    fn from(v: u64) -> Self {
        SqlParam::Uint(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<Value> for SqlParam {
    fn from(v: Value) -> Self {
        SqlParam::Json(v)
    }
}

impl<T> From<Option<T>> for SqlParam
where
    T: Into<SqlParam>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlParam::Null,
        }
    }
}

/// A decoded result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// JSON rendering used when composing cached aggregates.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Uint(u) => Value::from(*u),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            SqlValue::Json(v) => v.clone(),
        }
    }
}

/// A decoded result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbRow(pub Vec<SqlValue>);

impl DbRow {
    pub fn new(cells: Vec<SqlValue>) -> Self {
        Self(cells)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> DbResult<&SqlValue> {
        self.0
            .get(index)
            .ok_or_else(|| DbError::Decode(format!("column index {index} out of range")))
    }

    /// Signed integer at `index`; unsigned and boolean cells coerce.
    pub fn i64(&self, index: usize) -> DbResult<i64> {
        match self.get(index)? {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::Uint(v) => i64::try_from(*v)
                .map_err(|_| DbError::Decode(format!("column {index} overflows i64"))),
            SqlValue::Bool(b) => Ok(*b as i64),
            other => Err(DbError::Decode(format!(
                "column {index}: expected integer, found {other:?}"
            ))),
        }
    }

    /// Unsigned integer at `index` (ids are unsigned snowflakes).
    pub fn u64(&self, index: usize) -> DbResult<u64> {
        match self.get(index)? {
            SqlValue::Uint(v) => Ok(*v),
            SqlValue::Int(v) => u64::try_from(*v)
                .map_err(|_| DbError::Decode(format!("column {index} is negative"))),
            other => Err(DbError::Decode(format!(
                "column {index}: expected unsigned integer, found {other:?}"
            ))),
        }
    }

    pub fn opt_u64(&self, index: usize) -> DbResult<Option<u64>> {
        if self.get(index)?.is_null() {
            return Ok(None);
        }
        self.u64(index).map(Some)
    }

    pub fn opt_i64(&self, index: usize) -> DbResult<Option<i64>> {
        if self.get(index)?.is_null() {
            return Ok(None);
        }
        self.i64(index).map(Some)
    }

    pub fn text(&self, index: usize) -> DbResult<String> {
        match self.get(index)? {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            other => Err(DbError::Decode(format!(
                "column {index}: expected text, found {other:?}"
            ))),
        }
    }

    pub fn opt_text(&self, index: usize) -> DbResult<Option<String>> {
        if self.get(index)?.is_null() {
            return Ok(None);
        }
        self.text(index).map(Some)
    }

    pub fn bool(&self, index: usize) -> DbResult<bool> {
        match self.get(index)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(v) => Ok(*v != 0),
            SqlValue::Uint(v) => Ok(*v != 0),
            other => Err(DbError::Decode(format!(
                "column {index}: expected boolean, found {other:?}"
            ))),
        }
    }

    pub fn json(&self, index: usize) -> DbResult<Value> {
        Ok(self.get(index)?.to_json())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_param_conversions() {
        assert_eq!(SqlParam::from(42i64), SqlParam::Int(42));
        assert_eq!(SqlParam::from(42u64), SqlParam::Uint(42));
        assert_eq!(SqlParam::from("abc"), SqlParam::Text("abc".into()));
        assert_eq!(SqlParam::from(None::<i64>), SqlParam::Null);
        assert_eq!(SqlParam::from(Some(7i64)), SqlParam::Int(7));
    }

    #[test]
    fn test_row_accessors() {
        let row = DbRow::new(vec![
            SqlValue::Uint(111),
            SqlValue::Text("en-US".into()),
            SqlValue::Null,
            SqlValue::Int(1),
        ]);
        assert_eq!(row.u64(0).unwrap(), 111);
        assert_eq!(row.i64(0).unwrap(), 111);
        assert_eq!(row.text(1).unwrap(), "en-US");
        assert_eq!(row.opt_text(2).unwrap(), None);
        assert_eq!(row.opt_u64(2).unwrap(), None);
        assert!(row.bool(3).unwrap());
    }

    #[test]
    fn test_row_accessor_errors() {
        let row = DbRow::new(vec![SqlValue::Text("abc".into()), SqlValue::Int(-1)]);
        assert!(matches!(row.i64(0), Err(DbError::Decode(_))));
        assert!(matches!(row.u64(1), Err(DbError::Decode(_))));
        assert!(matches!(row.get(5), Err(DbError::Decode(_))));
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(SqlValue::Null.to_json(), Value::Null);
        assert_eq!(SqlValue::Uint(7).to_json(), json!(7));
        assert_eq!(SqlValue::Text("x".into()).to_json(), json!("x"));
        assert_eq!(SqlValue::Json(json!({"a": 1})).to_json(), json!({"a": 1}));
        assert_eq!(SqlValue::Float(f64::NAN).to_json(), Value::Null);
    }
}
