//! Filter conditions
//!
//! A small boolean expression tree over field values and tag values.
//! Tag predicates are resolved once per series by the shard, field
//! predicates are evaluated per row by the leaf cursors.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::query::chunk::{Chunk, ChunkTags};
use crate::query::schema::{compare_values, Value};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    fn matches(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        }
    }
}

/// Filter expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Compare a field value against a literal; NULL never matches
    Field {
        /// Field name
        name: String,
        /// Operator
        op: CompareOp,
        /// Literal
        value: Value,
    },
    /// Compare a tag value against a literal; missing tags read as ""
    Tag {
        /// Tag key
        key: String,
        /// Operator
        op: CompareOp,
        /// Literal
        value: String,
    },
    /// Both sides hold
    And(Box<Condition>, Box<Condition>),
    /// Either side holds
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Field predicate
    pub fn field(name: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Condition::Field {
            name: name.into(),
            op,
            value,
        }
    }

    /// Tag predicate
    pub fn tag(key: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Condition::Tag {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// `self AND other`
    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`
    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Field names referenced by the condition, deduplicated in first-use order
    pub fn field_refs(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Condition::Field { name, .. } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Condition::Tag { .. } => {}
            Condition::And(l, r) | Condition::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
        }
    }

    /// True when the condition references any field
    pub fn has_field_refs(&self) -> bool {
        match self {
            Condition::Field { .. } => true,
            Condition::Tag { .. } => false,
            Condition::And(l, r) | Condition::Or(l, r) => l.has_field_refs() || r.has_field_refs(),
        }
    }

    /// Evaluate against a series' tags
    ///
    /// Field predicates cannot be decided here and are treated as true, so a
    /// `false` result always means the series can be skipped.
    pub fn matches_tags(&self, tags: &ChunkTags) -> bool {
        match self {
            Condition::Field { .. } => true,
            Condition::Tag { key, op, value } => {
                let actual = tags.get(key).unwrap_or_default();
                op.matches(actual.cmp(value.as_str()))
            }
            Condition::And(l, r) => l.matches_tags(tags) && r.matches_tags(tags),
            Condition::Or(l, r) => l.matches_tags(tags) || r.matches_tags(tags),
        }
    }

    /// Evaluate against row `row` of `chunk` with the series' `tags`
    ///
    /// Fields missing from the chunk schema read as NULL.
    pub fn matches_row(&self, chunk: &Chunk, tags: &ChunkTags, row: usize) -> bool {
        match self {
            Condition::Field { name, op, value } => {
                let Some(idx) = chunk.schema().index_of(name) else {
                    return false;
                };
                match chunk.column(idx).value(row) {
                    Some(v) => op.matches(compare_values(&v, &value.as_value_ref())),
                    None => false,
                }
            }
            Condition::Tag { .. } => self.matches_tags(tags),
            Condition::And(l, r) => {
                l.matches_row(chunk, tags, row) && r.matches_row(chunk, tags, row)
            }
            Condition::Or(l, r) => {
                l.matches_row(chunk, tags, row) || r.matches_row(chunk, tags, row)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::schema::{DataType, Field, RowDataType, ValueRef};

    fn chunk() -> Chunk {
        let schema = RowDataType::shared(vec![Field::new("age", DataType::Float)]);
        let mut c = Chunk::new("students", schema);
        c.append_row(1, &[Some(ValueRef::Float(20.5))]);
        c.append_row(2, &[None]);
        c
    }

    #[test]
    fn test_field_condition_per_row() {
        let c = chunk();
        let tags = ChunkTags::parse("country=china");
        let cond = Condition::field("age", CompareOp::Gt, Value::Float(10.0));
        assert!(cond.matches_row(&c, &tags, 0));
        assert!(!cond.matches_row(&c, &tags, 1));
    }

    #[test]
    fn test_tag_condition() {
        let cond = Condition::tag("country", CompareOp::Eq, "china")
            .or(Condition::tag("country", CompareOp::Eq, "japan"));
        assert!(cond.matches_tags(&ChunkTags::parse("country=japan")));
        assert!(!cond.matches_tags(&ChunkTags::parse("country=canada")));
    }

    #[test]
    fn test_field_refs() {
        let cond = Condition::field("a", CompareOp::Eq, Value::Integer(1))
            .and(Condition::tag("t", CompareOp::Eq, "x"))
            .and(Condition::field("b", CompareOp::Lt, Value::Integer(2)))
            .and(Condition::field("a", CompareOp::Gt, Value::Integer(0)));
        assert_eq!(cond.field_refs(), vec!["a".to_string(), "b".to_string()]);
        assert!(cond.has_field_refs());
        assert!(Condition::tag("t", CompareOp::Eq, "x").matches_tags(&ChunkTags::parse("t=x")));
    }
}
