use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Ms;

/// Parsed command from SQL input.
///
/// The dialect is deliberately tiny: three tables (`rooms`, `bookings`, the
/// virtual `utilization`) plus `LISTEN room_<id>`. Timestamps are ISO-8601
/// strings or raw unix millis. `page_limit` / `page_offset` are pseudo-columns
/// on `bookings` (LIMIT and OFFSET are reserved words).
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateRoom {
        name: String,
        capacity: u32,
        floor: i32,
        amenities: Vec<String>,
    },
    ListRooms {
        min_capacity: Option<u32>,
        amenity: Option<String>,
    },
    CreateBooking {
        room_id: Ulid,
        title: String,
        organizer_email: String,
        start: Ms,
        end: Ms,
        idempotency_key: Option<String>,
    },
    ListBookings {
        room_id: Option<Ulid>,
        from: Option<Ms>,
        to: Option<Ms>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    /// DELETE FROM bookings — a cancellation, not a removal.
    CancelBooking {
        id: Ulid,
    },
    Utilization {
        from: Ms,
        to: Ms,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "rooms" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("rooms", 2, values.len()));
            }
            Ok(Command::CreateRoom {
                name: parse_string(&values[0])?,
                capacity: parse_u32(&values[1])?,
                floor: if values.len() >= 3 {
                    parse_i32_or_null(&values[2])?.unwrap_or(0)
                } else {
                    0
                },
                amenities: if values.len() >= 4 {
                    parse_amenities(&values[3])?
                } else {
                    Vec::new()
                },
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            Ok(Command::CreateBooking {
                room_id: parse_ulid_expr(&values[0])?,
                title: parse_string(&values[1])?,
                organizer_email: parse_string(&values[2])?,
                start: parse_timestamp_expr(&values[3])?,
                end: parse_timestamp_expr(&values[4])?,
                idempotency_key: if values.len() >= 6 {
                    parse_string_or_null(&values[5])?
                } else {
                    None
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "bookings" => {
            let id = extract_where_id(&delete.selection)?;
            Ok(Command::CancelBooking { id })
        }
        "rooms" => Err(SqlError::Unsupported("rooms cannot be deleted".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "rooms" => {
            let (mut min_capacity, mut amenity) = (None, None);
            if let Some(selection) = &select.selection {
                extract_room_filters(selection, &mut min_capacity, &mut amenity)?;
            }
            Ok(Command::ListRooms {
                min_capacity,
                amenity,
            })
        }
        "bookings" => {
            let mut filters = BookingFilters::default();
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut filters)?;
            }
            Ok(Command::ListBookings {
                room_id: filters.room_id,
                from: filters.from,
                to: filters.to,
                limit: filters.limit,
                offset: filters.offset,
            })
        }
        "utilization" => {
            let (mut from, mut to) = (None, None);
            if let Some(selection) = &select.selection {
                extract_utilization_filters(selection, &mut from, &mut to)?;
            }
            Ok(Command::Utilization {
                from: from.ok_or(SqlError::MissingFilter("start_time"))?,
                to: to.ok_or(SqlError::MissingFilter("end_time"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE-clause walkers ──────────────────────────────────────

fn extract_room_filters(
    expr: &Expr,
    min_capacity: &mut Option<u32>,
    amenity: &mut Option<String>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_room_filters(left, min_capacity, amenity)?;
                extract_room_filters(right, min_capacity, amenity)?;
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("capacity") {
                    *min_capacity = Some(parse_u32(right)?);
                }
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("amenity") {
                    *amenity = Some(parse_string(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Default)]
struct BookingFilters {
    room_id: Option<Ulid>,
    from: Option<Ms>,
    to: Option<Ms>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn extract_booking_filters(expr: &Expr, filters: &mut BookingFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, filters)?;
                extract_booking_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("room_id") => filters.room_id = Some(parse_ulid_expr(right)?),
                Some("page_limit") => filters.limit = Some(parse_usize(right)?),
                Some("page_offset") => filters.offset = Some(parse_usize(right)?),
                _ => {}
            },
            // from: bookings still running at or after this instant.
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("end_time") {
                    filters.from = Some(parse_timestamp_expr(right)?);
                }
            }
            // to: bookings starting at or before this instant.
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("start_time") {
                    filters.to = Some(parse_timestamp_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_utilization_filters(
    expr: &Expr,
    from: &mut Option<Ms>,
    to: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_utilization_filters(left, from, to)?;
                extract_utilization_filters(right, from, to)?;
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start_time") {
                    *from = Some(parse_timestamp_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end_time") {
                    *to = Some(parse_timestamp_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// ISO-8601 string (with or without offset, date-only allowed) or raw unix
/// millis. Naive timestamps are taken as UTC, the service calendar.
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        return parse_iso_timestamp(s);
    }
    parse_i64_expr(expr)
}

pub fn parse_iso_timestamp(s: &str) -> Result<Ms, SqlError> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(midnight.and_utc().timestamp_millis());
    }
    Err(SqlError::Parse(format!("invalid timestamp: {s}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64_expr(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_i32_or_null(expr: &Expr) -> Result<Option<i32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let v = parse_i64_expr(expr)?;
    i32::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_amenities(expr: &Expr) -> Result<Vec<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::SingleQuotedString(s) => serde_json::from_str(s)
                .map_err(|e| SqlError::Parse(format!("bad amenities JSON: {e}"))),
            _ => Err(SqlError::Parse(format!(
                "expected JSON array string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl SqlError {
    /// Input-shaped errors (bad value, bad arity, missing filter) map to a
    /// validation SQLSTATE; the rest are syntax-class errors.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SqlError::Parse(_) | SqlError::WrongArity(..) | SqlError::MissingFilter(_)
        )
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
