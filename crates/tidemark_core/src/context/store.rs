//! Descriptor-driven SQL for entity rows.
//!
//! # Responsibility
//! - Translate `EntityType` descriptors into SELECT/INSERT/UPDATE/DELETE.
//! - Convert between `PropertyValues` and SQLite values.
//!
//! # Invariants
//! - Read paths reject malformed persisted values instead of masking them.
//! - Soft-delete filtering is not applied here; callers decide.
//! - `created_by`/`created_time` are never part of an UPDATE.

use super::{ContextError, ContextResult};
use crate::model::capability::{CREATED_BY, CREATED_TIME, ROW_VERSION};
use crate::model::entity::{EntityKey, EntityType};
use crate::model::value::{Column, ColumnKind, PropertyValues, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use uuid::Uuid;

/// Bound parameters per `IN (...)` list; stays well below SQLite's limit.
const KEY_CHUNK: usize = 500;

/// Row selection for one entity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    All,
    Key(EntityKey),
    /// Rows whose uuid `column` is one of `keys`.
    ForeignKeyIn {
        column: &'static str,
        keys: Vec<EntityKey>,
    },
}

/// Loads rows matching `filter`, in insertion (rowid) order.
pub fn select_rows(
    conn: &Connection,
    entity_type: &EntityType,
    filter: &RowFilter,
) -> ContextResult<Vec<PropertyValues>> {
    let columns = entity_type.column_names().collect::<Vec<_>>().join(", ");
    let base = format!("SELECT {columns} FROM {}", entity_type.table);

    match filter {
        RowFilter::All => query(conn, entity_type, &format!("{base} ORDER BY rowid"), Vec::new()),
        RowFilter::Key(key) => query(
            conn,
            entity_type,
            &format!("{base} WHERE {} = ?1", entity_type.key_column),
            vec![SqlValue::Text(key.to_string())],
        ),
        RowFilter::ForeignKeyIn { column, keys } => {
            if entity_type.column(column).is_none() {
                return Err(ContextError::InvalidData(format!(
                    "{} has no column `{column}`",
                    entity_type.name
                )));
            }

            let mut rows = Vec::new();
            for chunk in keys.chunks(KEY_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!("{base} WHERE {column} IN ({placeholders}) ORDER BY rowid");
                let bind = chunk.iter().map(|key| SqlValue::Text(key.to_string())).collect();
                rows.extend(query(conn, entity_type, &sql, bind)?);
            }
            Ok(rows)
        }
    }
}

pub fn insert_row(
    conn: &Connection,
    entity_type: &EntityType,
    values: &PropertyValues,
) -> ContextResult<usize> {
    let names = entity_type.column_names().collect::<Vec<_>>();
    let placeholders = (1..=names.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        entity_type.table,
        names.join(", ")
    );

    let bind = entity_type
        .columns
        .iter()
        .map(|column| bind_value(entity_type, column, values))
        .collect::<ContextResult<Vec<_>>>()?;
    Ok(conn.execute(&sql, params_from_iter(bind))?)
}

/// Updates every mutable column of the row keyed by `values`.
///
/// With `expected_version`, the row must still carry that token.
pub fn update_row(
    conn: &Connection,
    entity_type: &EntityType,
    values: &PropertyValues,
    expected_version: Option<&[u8]>,
) -> ContextResult<usize> {
    let assigned = entity_type
        .columns
        .iter()
        .filter(|column| column.name != entity_type.key_column)
        .filter(|column| column.name != CREATED_BY && column.name != CREATED_TIME)
        .collect::<Vec<_>>();

    let mut bind = Vec::with_capacity(assigned.len() + 2);
    let mut sets = Vec::with_capacity(assigned.len());
    for column in &assigned {
        bind.push(bind_value(entity_type, column, values)?);
        sets.push(format!("{} = ?{}", column.name, bind.len()));
    }

    bind.push(key_param(entity_type, values)?);
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        entity_type.table,
        sets.join(", "),
        entity_type.key_column,
        bind.len()
    );
    if let Some(version) = expected_version {
        bind.push(SqlValue::Blob(version.to_vec()));
        sql.push_str(&format!(" AND {ROW_VERSION} = ?{}", bind.len()));
    }

    Ok(conn.execute(&sql, params_from_iter(bind))?)
}

pub fn delete_row(
    conn: &Connection,
    entity_type: &EntityType,
    key: EntityKey,
    expected_version: Option<&[u8]>,
) -> ContextResult<usize> {
    let mut bind = vec![SqlValue::Text(key.to_string())];
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        entity_type.table, entity_type.key_column
    );
    if let Some(version) = expected_version {
        bind.push(SqlValue::Blob(version.to_vec()));
        sql.push_str(&format!(" AND {ROW_VERSION} = ?2"));
    }
    Ok(conn.execute(&sql, params_from_iter(bind))?)
}

fn query(
    conn: &Connection,
    entity_type: &EntityType,
    sql: &str,
    bind: Vec<SqlValue>,
) -> ContextResult<Vec<PropertyValues>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(bind))?;
    let mut loaded = Vec::new();
    while let Some(row) = rows.next()? {
        loaded.push(read_row(entity_type, row)?);
    }
    Ok(loaded)
}

fn read_row(entity_type: &EntityType, row: &Row<'_>) -> ContextResult<PropertyValues> {
    let mut values = PropertyValues::new();
    for (index, column) in entity_type.columns.iter().enumerate() {
        let raw: SqlValue = row.get(index)?;
        values.set(column.name, from_sql_value(entity_type, column, raw)?);
    }
    Ok(values)
}

fn from_sql_value(entity_type: &EntityType, column: &Column, raw: SqlValue) -> ContextResult<Value> {
    let value = match (column.kind, raw) {
        (_, SqlValue::Null) if column.nullable => Value::Null,
        (ColumnKind::Uuid, SqlValue::Text(text)) => Uuid::parse_str(&text)
            .map(Value::Uuid)
            .map_err(|err| invalid(entity_type, column, format!("invalid uuid `{text}`: {err}")))?,
        (ColumnKind::Text, SqlValue::Text(text)) => Value::Text(text),
        (ColumnKind::Integer, SqlValue::Integer(number)) => Value::Integer(number),
        (ColumnKind::Bool, SqlValue::Integer(0)) => Value::Bool(false),
        (ColumnKind::Bool, SqlValue::Integer(1)) => Value::Bool(true),
        (ColumnKind::Blob, SqlValue::Blob(bytes)) => Value::Blob(bytes),
        (kind, other) => {
            return Err(invalid(
                entity_type,
                column,
                format!("expected {}, found {other:?}", kind.as_str()),
            ))
        }
    };
    Ok(value)
}

fn bind_value(
    entity_type: &EntityType,
    column: &Column,
    values: &PropertyValues,
) -> ContextResult<SqlValue> {
    let value = values.get(column.name).unwrap_or(&Value::Null);
    if !value.fits(column) {
        return Err(invalid(
            entity_type,
            column,
            format!("cannot store {value} as {}", column.kind.as_str()),
        ));
    }
    Ok(to_sql_value(value))
}

fn key_param(entity_type: &EntityType, values: &PropertyValues) -> ContextResult<SqlValue> {
    let key = values
        .get(entity_type.key_column)
        .and_then(Value::as_uuid)
        .ok_or_else(|| {
            ContextError::InvalidData(format!("{} row has no uuid key", entity_type.name))
        })?;
    Ok(SqlValue::Text(key.to_string()))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Integer(number) => SqlValue::Integer(*number),
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Blob(bytes) => SqlValue::Blob(bytes.clone()),
        Value::Uuid(uuid) => SqlValue::Text(uuid.to_string()),
    }
}

fn invalid(entity_type: &EntityType, column: &Column, detail: String) -> ContextError {
    ContextError::InvalidData(format!("{}.{}: {detail}", entity_type.name, column.name))
}
