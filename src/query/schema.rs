//! Row schemas and scalar values
//!
//! A `RowDataType` is the ordered list of typed fields every chunk on a port
//! carries. Values travel as `ValueRef` when borrowed from a column and as
//! `Value` once a reducer has to keep them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// Data Types
// ============================================================================

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Float,
    /// Boolean
    Boolean,
    /// UTF-8 string (variable length)
    String,
}

impl DataType {
    /// True for integer and float columns
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "integer"),
            DataType::Float => write!(f, "float"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::String => write!(f, "string"),
        }
    }
}

/// A named, typed column of a row schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Column name (e.g. `value1` or `count("value1")`)
    pub name: String,
    /// Column type
    pub data_type: DataType,
}

impl Field {
    /// Create a field
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered column schema of the rows flowing through a port
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDataType {
    fields: Vec<Field>,
}

impl RowDataType {
    /// Create a schema from fields
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Create a shared schema
    pub fn shared(fields: Vec<Field>) -> Arc<Self> {
        Arc::new(Self::new(fields))
    }

    /// All fields in order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field at position `index`
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if there are no columns
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the column called `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Two schemas can share a port when their column types line up
    ///
    /// Names may differ (a producer may alias columns), types may not.
    pub fn is_compatible(&self, other: &RowDataType) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.data_type == b.data_type)
    }
}

// ============================================================================
// Values
// ============================================================================

/// Owned scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// String value
    String(String),
}

impl Value {
    /// Borrow as a `ValueRef`
    pub fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Float(v) => ValueRef::Float(*v),
            Value::Boolean(v) => ValueRef::Boolean(*v),
            Value::String(v) => ValueRef::String(v.as_str()),
        }
    }

    /// Type of the value
    pub fn data_type(&self) -> DataType {
        self.as_value_ref().data_type()
    }

    /// Numeric view (integers widen to float)
    pub fn as_f64(&self) -> Option<f64> {
        self.as_value_ref().as_f64()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

/// Borrowed scalar value read from a column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// String value
    String(&'a str),
}

impl<'a> ValueRef<'a> {
    /// Copy into an owned `Value`
    pub fn to_owned_value(&self) -> Value {
        match *self {
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Float(v) => Value::Float(v),
            ValueRef::Boolean(v) => Value::Boolean(v),
            ValueRef::String(v) => Value::String(v.to_string()),
        }
    }

    /// Type of the value
    pub fn data_type(&self) -> DataType {
        match self {
            ValueRef::Integer(_) => DataType::Integer,
            ValueRef::Float(_) => DataType::Float,
            ValueRef::Boolean(_) => DataType::Boolean,
            ValueRef::String(_) => DataType::String,
        }
    }

    /// Numeric view (integers widen to float)
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ValueRef::Integer(v) => Some(v as f64),
            ValueRef::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// Total order over values of the same type
///
/// Floats use IEEE total ordering, booleans order `false < true`. Values of
/// different types order by type tag, which only happens on a schema bug.
pub fn compare_values(a: &ValueRef<'_>, b: &ValueRef<'_>) -> Ordering {
    match (a, b) {
        (ValueRef::Integer(x), ValueRef::Integer(y)) => x.cmp(y),
        (ValueRef::Float(x), ValueRef::Float(y)) => x.total_cmp(y),
        (ValueRef::Integer(x), ValueRef::Float(y)) => (*x as f64).total_cmp(y),
        (ValueRef::Float(x), ValueRef::Integer(y)) => x.total_cmp(&(*y as f64)),
        (ValueRef::Boolean(x), ValueRef::Boolean(y)) => x.cmp(y),
        (ValueRef::String(x), ValueRef::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &ValueRef<'_>) -> u8 {
    match v {
        ValueRef::Integer(_) | ValueRef::Float(_) => 0,
        ValueRef::Boolean(_) => 1,
        ValueRef::String(_) => 2,
    }
}
