//! Dynamic row decoding for arbitrary user tables
//!
//! Sync and SQL branches run over schemas we have never seen, so rows are
//! decoded column-by-column from the wire type into JSON values:
//! timestamps become ISO-8601 strings, decimals become floats, and binary
//! payloads are replaced by a `<binary:N>` placeholder.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use uuid::Uuid;

/// Decode a row into a JSON object keyed by column name.
///
/// Unknown types degrade to their text representation rather than failing the
/// whole row; a column that cannot be decoded at all becomes `null`.
pub fn row_to_json(row: &PgRow) -> Map<String, Value> {
    let mut out = Map::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = decode_column(row, idx, column.type_info().name());
        out.insert(name, value);
    }

    out
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx), Value::Bool),
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx), |v| Value::from(v)),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx), |v| Value::from(v)),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx), |v| Value::from(v)),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx), |v| Value::from(v as f64)),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx), Value::from),
        "NUMERIC" => opt(row.try_get::<Option<Decimal>, _>(idx), |v| {
            // Decimals are stored as floats in metadata
            Value::from(v.to_f64().unwrap_or_default())
        }),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            opt(row.try_get::<Option<String>, _>(idx), Value::String)
        }
        "TIMESTAMPTZ" => opt(row.try_get::<Option<DateTime<Utc>>, _>(idx), |v| {
            Value::String(v.to_rfc3339())
        }),
        "TIMESTAMP" => opt(row.try_get::<Option<NaiveDateTime>, _>(idx), |v| {
            Value::String(v.and_utc().to_rfc3339())
        }),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(idx), |v| {
            Value::String(v.to_string())
        }),
        "UUID" => opt(row.try_get::<Option<Uuid>, _>(idx), |v| {
            Value::String(v.to_string())
        }),
        "JSON" | "JSONB" => opt(row.try_get::<Option<Value>, _>(idx), |v| v),
        "BYTEA" => opt(row.try_get::<Option<Vec<u8>>, _>(idx), |v| {
            Value::String(format!("<binary:{}>", v.len()))
        }),
        _ => {
            // Fallback: try text decoding, else null
            match row.try_get::<Option<String>, _>(idx) {
                Ok(Some(s)) => Value::String(s),
                _ => Value::Null,
            }
        }
    }
}

fn opt<T>(res: sqlx::Result<Option<T>>, f: impl FnOnce(T) -> Value) -> Value {
    match res {
        Ok(Some(v)) => f(v),
        _ => Value::Null,
    }
}
