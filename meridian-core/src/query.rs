//! SQL-opaque query and result containers.
//!
//! The router treats SQL as text plus a bag of named bind variables. Row
//! cells reuse [`BindValue`] so results stay equally opaque.

use std::collections::HashMap;

use bytes::Bytes;

use crate::types::KeyspaceId;

/// A value bound to a named placeholder, or a cell in a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// SQL NULL.
    Null,
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Opaque byte string.
    Bytes(Bytes),
    /// UTF-8 string.
    Str(String),
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for BindValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<KeyspaceId> for BindValue {
    fn from(id: KeyspaceId) -> Self {
        Self::Bytes(id.into_bytes())
    }
}

/// Named bind variables accompanying a SQL string.
pub type BindVariables = HashMap<String, BindValue>;

/// One SQL statement with its bind variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundQuery {
    /// The SQL text.
    pub sql: String,
    /// Values for the named placeholders in `sql`.
    pub bind_variables: BindVariables,
}

impl BoundQuery {
    /// Creates a bound query.
    pub fn new(sql: impl Into<String>, bind_variables: BindVariables) -> Self {
        Self {
            sql: sql.into(),
            bind_variables,
        }
    }
}

/// Result column metadata.
///
/// Shards of one keyspace share a schema; the scatter layer verifies that
/// every shard reports identical fields before merging rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Backend type code, opaque to the router.
    pub field_type: i64,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, field_type: i64) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// One aggregated row set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Column metadata, identical across contributing shards.
    pub fields: Vec<Field>,
    /// Total rows affected across contributing shards.
    pub rows_affected: u64,
    /// Last nonzero insert id seen, in shard-iteration order. Not a
    /// cross-shard correctness guarantee.
    pub insert_id: u64,
    /// Rows, concatenated in shard-iteration order.
    pub rows: Vec<Vec<BindValue>>,
}

impl QueryResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one shard's result into this aggregate. The caller checks
    /// field agreement before calling.
    pub fn merge(&mut self, other: Self) {
        if self.fields.is_empty() {
            self.fields = other.fields;
        }
        self.rows_affected += other.rows_affected;
        if other.insert_id != 0 {
            self.insert_id = other.insert_id;
        }
        self.rows.extend(other.rows);
    }
}

/// Aggregated results for a batch of queries, in input-query order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResultList {
    /// One aggregated result per input query.
    pub list: Vec<QueryResult>,
}

impl QueryResultList {
    /// Creates a list of `n` empty results.
    #[must_use]
    pub fn with_len(n: usize) -> Self {
        Self {
            list: vec![QueryResult::new(); n],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_value_conversions() {
        assert_eq!(BindValue::from(7_i64), BindValue::Int(7));
        assert_eq!(BindValue::from("x"), BindValue::Str("x".to_string()));

        let id = KeyspaceId::new(&b"\x80"[..]);
        assert_eq!(
            BindValue::from(id),
            BindValue::Bytes(Bytes::from_static(b"\x80"))
        );
    }

    #[test]
    fn test_merge_sums_and_concatenates() {
        let fields = vec![Field::new("id", 8)];
        let mut agg = QueryResult::new();

        agg.merge(QueryResult {
            fields: fields.clone(),
            rows_affected: 2,
            insert_id: 10,
            rows: vec![vec![BindValue::Int(1)]],
        });
        agg.merge(QueryResult {
            fields: fields.clone(),
            rows_affected: 3,
            insert_id: 0,
            rows: vec![vec![BindValue::Int(2)], vec![BindValue::Int(3)]],
        });

        assert_eq!(agg.fields, fields);
        assert_eq!(agg.rows_affected, 5);
        // Zero insert ids do not overwrite the last nonzero one.
        assert_eq!(agg.insert_id, 10);
        assert_eq!(agg.rows.len(), 3);
        assert_eq!(agg.rows[0], vec![BindValue::Int(1)]);
        assert_eq!(agg.rows[2], vec![BindValue::Int(3)]);
    }
}
