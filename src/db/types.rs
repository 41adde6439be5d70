//! Row decoding for raw driver results.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. A per-backend decoder extracts the value as JSON
//!
//! Binary values are base64 encoded.

use crate::db::DatabaseType;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary column data for JSON output.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Read a nullable column as `T`, treating decode failures as absent.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        (col.name().to_string(), $decode(self, idx, category))
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySql, decode_mysql);
impl_row_to_json!(PgRow, DatabaseType::Postgres, decode_postgres);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, decode_sqlite);

fn decode_mysql(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|v| JsonValue::String(v.0)),
        TypeCategory::Integer => get::<_, i64>(row, idx)
            .map(JsonValue::from)
            .or_else(|| get::<_, u64>(row, idx).map(JsonValue::from)),
        TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map(float_value),
        TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
        TypeCategory::Json => get::<_, JsonValue>(row, idx),
        TypeCategory::Text => get::<_, String>(row, idx).map(JsonValue::String),
    };
    value.unwrap_or(JsonValue::Null)
}

fn decode_postgres(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|v| JsonValue::String(v.0)),
        TypeCategory::Integer => get::<_, i64>(row, idx)
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i16>(row, idx).map(i64::from))
            .map(JsonValue::from),
        TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map(float_value),
        TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
        TypeCategory::Json => get::<_, JsonValue>(row, idx),
        TypeCategory::Text => get::<_, String>(row, idx).map(JsonValue::String),
    };
    value.unwrap_or(JsonValue::Null)
}

fn decode_sqlite(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::Integer => get::<_, i64>(row, idx).map(JsonValue::from),
        TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float | TypeCategory::Decimal => get::<_, f64>(row, idx).map(float_value),
        TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
        // SQLite has no JSON storage class; expression columns report no type at all
        TypeCategory::Json | TypeCategory::Text => get::<_, String>(row, idx)
            .map(|s| serde_json::from_str(&s).unwrap_or(JsonValue::String(s)))
            .filter(|_| category == TypeCategory::Json)
            .or_else(|| get::<_, String>(row, idx).map(JsonValue::String))
            .or_else(|| get::<_, i64>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, f64>(row, idx).map(float_value)),
    };
    value.unwrap_or(JsonValue::Null)
}
