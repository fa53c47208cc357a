//! Parameter values bound into generated statements.

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::query_builder::Separated;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::backend::Db;

/// SQL type of a NULL parameter.
///
/// PostgreSQL takes parameter types from the bind, so a NULL has to be sent
/// with the type of the column it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
    Uuid,
}

/// A single positional parameter.
///
/// Values are always sent to the store as bind parameters, never spliced into
/// SQL text. `None` converts to a NULL of the matching kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(NullKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

macro_rules! bind_value {
    ($value:expr, $target:expr) => {
        match $value {
            Value::Null(NullKind::Bool) => $target.push_bind(None::<bool>),
            Value::Null(NullKind::Int) => $target.push_bind(None::<i64>),
            Value::Null(NullKind::Float) => $target.push_bind(None::<f64>),
            Value::Null(NullKind::Text) => $target.push_bind(None::<String>),
            Value::Null(NullKind::Bytes) => $target.push_bind(None::<Vec<u8>>),
            Value::Null(NullKind::Timestamp) => $target.push_bind(None::<DateTime<Utc>>),
            Value::Null(NullKind::Uuid) => $target.push_bind(None::<Uuid>),
            Value::Bool(v) => $target.push_bind(v),
            Value::Int(v) => $target.push_bind(v),
            Value::Float(v) => $target.push_bind(v),
            Value::Text(v) => $target.push_bind(v),
            Value::Bytes(v) => $target.push_bind(v),
            Value::Timestamp(v) => $target.push_bind(v),
            Value::Uuid(v) => $target.push_bind(v),
        }
    };
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// Push this value as the next bind parameter of `builder`.
    pub(crate) fn bind_to(self, builder: &mut QueryBuilder<'_, Db>) {
        bind_value!(self, builder);
    }

    /// Push this value as the next item of a separated list (`VALUES (...)`).
    pub(crate) fn bind_separated<Sep: fmt::Display>(self, list: &mut Separated<'_, '_, Db, Sep>) {
        bind_value!(self, list);
    }
}

/// `From<T>` and `From<Option<T>>`, with `None` as a NULL of `$kind`.
macro_rules! impl_from {
    ($kind:ident: $($t:ty => $conv:expr),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    $conv(v)
                }
            }

            impl From<Option<$t>> for Value {
                fn from(v: Option<$t>) -> Self {
                    v.map_or(Value::Null(NullKind::$kind), Value::from)
                }
            }
        )*
    };
}

impl_from!(Bool: bool => Value::Bool);
impl_from!(Int:
    i8 => |v: i8| Value::Int(i64::from(v)),
    i16 => |v: i16| Value::Int(i64::from(v)),
    i32 => |v: i32| Value::Int(i64::from(v)),
    i64 => Value::Int,
    u8 => |v: u8| Value::Int(i64::from(v)),
    u16 => |v: u16| Value::Int(i64::from(v)),
    u32 => |v: u32| Value::Int(i64::from(v)),
);
impl_from!(Float:
    f32 => |v: f32| Value::Float(f64::from(v)),
    f64 => Value::Float,
);
impl_from!(Text:
    String => Value::Text,
    &str => |v: &str| Value::Text(v.to_owned()),
    &String => |v: &String| Value::Text(v.clone()),
);
impl_from!(Bytes: Vec<u8> => Value::Bytes);
impl_from!(Timestamp: DateTime<Utc> => Value::Timestamp);
impl_from!(Uuid: Uuid => Value::Uuid);
