//! Generic read path used by the guarded executor.
//!
//! Callers hand in statement text they have already vetted. Columns declared
//! `DATE` or `TIMESTAMP`/`DATETIME` come back as typed temporal cells so the
//! executor can render them canonically.

use super::ReconStore;
use crate::error::ReconResult;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{types::ValueRef, Statement, ToSql};
use std::time::{Duration, Instant};

/// SQLite checks the progress handler every this many VM instructions.
const PROGRESS_STEP: i32 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Cell {
    /// JSON rendering with temporal values in ISO-8601 text.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Cell::Null => Value::Null,
            Cell::Integer(i) => Value::from(*i),
            Cell::Real(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Blob(b) => Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect()),
            Cell::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Cell::Timestamp(t) => Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Temporal {
    None,
    Date,
    Timestamp,
}

fn temporal_kind(decl_type: Option<&str>) -> Temporal {
    match decl_type.map(|t| t.to_ascii_uppercase()) {
        Some(t) if t == "DATE" => Temporal::Date,
        Some(t) if t.contains("TIMESTAMP") || t.contains("DATETIME") => Temporal::Timestamp,
        _ => Temporal::None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn to_cell(value: ValueRef<'_>, temporal: Temporal) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Integer(i),
        ValueRef::Real(f) => Cell::Real(f),
        ValueRef::Blob(b) => Cell::Blob(b.to_vec()),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            let typed = match temporal {
                Temporal::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok().map(Cell::Date),
                Temporal::Timestamp => parse_timestamp(&text).map(Cell::Timestamp),
                Temporal::None => None,
            };
            typed.unwrap_or(Cell::Text(text))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryRows {
    pub columns: Vec<String>,
    /// False for statements with no result columns.
    pub returns_rows: bool,
    pub rows: Vec<Vec<Cell>>,
}

fn collect_rows(stmt: &mut Statement<'_>, params: &[&dyn ToSql]) -> ReconResult<QueryRows> {
    let meta = stmt.columns();
    let columns: Vec<String> = meta.iter().map(|c| c.name().to_string()).collect();
    let temporal: Vec<Temporal> = meta.iter().map(|c| temporal_kind(c.decl_type())).collect();

    if columns.is_empty() {
        stmt.execute(params)?;
        return Ok(QueryRows {
            columns,
            returns_rows: false,
            rows: Vec::new(),
        });
    }

    let mut out = Vec::new();
    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(temporal.len());
        for (i, kind) in temporal.iter().enumerate() {
            cells.push(to_cell(row.get_ref(i)?, *kind));
        }
        out.push(cells);
    }
    Ok(QueryRows {
        columns,
        returns_rows: true,
        rows: out,
    })
}

impl ReconStore {
    /// Run one statement with positional parameters.
    pub fn query(&self, sql: &str, params: &[&dyn ToSql]) -> ReconResult<QueryRows> {
        let mut stmt = self.conn.prepare(sql)?;
        collect_rows(&mut stmt, params)
    }

    /// Run one statement, interrupting it inside SQLite once `timeout` elapses.
    /// An interrupted statement fails with an error for which
    /// `ReconError::is_interrupted` is true.
    pub fn execute_with_timeout(&self, sql: &str, timeout: Duration) -> ReconResult<QueryRows> {
        let deadline = Instant::now() + timeout;
        self.conn
            .progress_handler(PROGRESS_STEP, Some(move || Instant::now() >= deadline));
        let result = self
            .conn
            .prepare(sql)
            .map_err(Into::into)
            .and_then(|mut stmt| collect_rows(&mut stmt, &[]));
        self.conn.progress_handler(0, None::<fn() -> bool>);
        result
    }
}
