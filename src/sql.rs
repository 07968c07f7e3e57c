use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::DEFAULT_PAGE_SIZE;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVenue {
        id: Ulid,
        owner_id: Ulid,
        hourly_rate: Option<Money>,
    },
    InsertField {
        id: Ulid,
        venue_id: Ulid,
        hourly_rate: Option<Money>,
    },
    InsertPriceRule {
        id: Ulid,
        field_id: Ulid,
        day_of_week: u8,
        start: Minute,
        end: Minute,
        price_per_hour: Money,
    },
    DeletePriceRule {
        id: Ulid,
    },
    InsertBooking(BookingRequest),
    SelectBooking {
        id: Ulid,
    },
    SelectBookingHistory {
        customer_id: Ulid,
        page: usize,
        size: usize,
    },
    SelectUnavailableSlots {
        field_id: Ulid,
        date: NaiveDate,
    },
    SelectPaymentRedirect {
        booking_id: Ulid,
        customer_id: Ulid,
    },
    InsertCashConfirmation {
        booking_id: Ulid,
        owner_id: Ulid,
        status: PaymentStatus,
    },
    InsertGatewayConfirmation {
        booking_id: Ulid,
        amount: Money,
        transaction_ref: String,
    },
    SelectReviewEligibility {
        booking_id: Ulid,
        customer_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
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
        "venues" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("venues", 2, values.len()));
            }
            Ok(Command::InsertVenue {
                id: parse_ulid(&values[0])?,
                owner_id: parse_ulid(&values[1])?,
                hourly_rate: values.get(2).map(parse_money_or_null).transpose()?.flatten(),
            })
        }
        "fields" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("fields", 2, values.len()));
            }
            Ok(Command::InsertField {
                id: parse_ulid(&values[0])?,
                venue_id: parse_ulid(&values[1])?,
                hourly_rate: values.get(2).map(parse_money_or_null).transpose()?.flatten(),
            })
        }
        "price_rules" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("price_rules", 6, values.len()));
            }
            Ok(Command::InsertPriceRule {
                id: parse_ulid(&values[0])?,
                field_id: parse_ulid(&values[1])?,
                day_of_week: parse_u8(&values[2])?,
                start: parse_start_time(&values[3])?,
                end: parse_time(&values[4])?,
                price_per_hour: parse_money(&values[5])?,
            })
        }
        "bookings" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, values.len()));
            }
            Ok(Command::InsertBooking(BookingRequest {
                customer_id: parse_ulid(&values[0])?,
                field_id: parse_ulid(&values[1])?,
                venue_id: parse_ulid(&values[2])?,
                date: parse_date(&values[3])?,
                start: parse_start_time(&values[4])?,
                end: parse_time(&values[5])?,
                payment_method: values.get(6).map(parse_payment_method).transpose()?.flatten(),
                payment_provider: values.get(7).map(parse_string_or_null).transpose()?.flatten(),
            }))
        }
        "cash_confirmations" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("cash_confirmations", 3, values.len()));
            }
            let status = parse_string(&values[2])?;
            Ok(Command::InsertCashConfirmation {
                booking_id: parse_ulid(&values[0])?,
                owner_id: parse_ulid(&values[1])?,
                status: PaymentStatus::parse(&status)
                    .ok_or_else(|| SqlError::Parse(format!("bad payment status: {status}")))?,
            })
        }
        "gateway_confirmations" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("gateway_confirmations", 3, values.len()));
            }
            Ok(Command::InsertGatewayConfirmation {
                booking_id: parse_ulid(&values[0])?,
                amount: parse_money(&values[1])?,
                transaction_ref: parse_string(&values[2])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "price_rules" => Ok(Command::DeletePriceRule {
            id: required_ulid(&filters, "id")?,
        }),
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
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "bookings" => {
            if find(&filters, "id").is_some() {
                return Ok(Command::SelectBooking {
                    id: required_ulid(&filters, "id")?,
                });
            }
            let customer_id = find(&filters, "customer_id")
                .ok_or(SqlError::MissingFilter("id or customer_id"))
                .and_then(parse_ulid)?;
            Ok(Command::SelectBookingHistory {
                customer_id,
                page: find(&filters, "page").map(parse_usize).transpose()?.unwrap_or(0),
                size: find(&filters, "size")
                    .map(parse_usize)
                    .transpose()?
                    .unwrap_or(DEFAULT_PAGE_SIZE),
            })
        }
        "unavailable_slots" => Ok(Command::SelectUnavailableSlots {
            field_id: required_ulid(&filters, "field_id")?,
            date: find(&filters, "date")
                .ok_or(SqlError::MissingFilter("date"))
                .and_then(parse_date)?,
        }),
        "payment_redirects" => Ok(Command::SelectPaymentRedirect {
            booking_id: required_ulid(&filters, "booking_id")?,
            customer_id: required_ulid(&filters, "customer_id")?,
        }),
        "review_eligibility" => Ok(Command::SelectReviewEligibility {
            booking_id: required_ulid(&filters, "booking_id")?,
            customer_id: required_ulid(&filters, "customer_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE filters ─────────────────────────────────────────────

/// Flatten `col = value AND col = value ...` into (column, value) pairs.
/// Anything other than AND-ed equalities is rejected.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut filters = Vec::new();
    if let Some(expr) = selection {
        collect_filters_into(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filters_into<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters_into(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters_into(left, out)?;
                collect_filters_into(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn find<'a>(filters: &[(String, &'a Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
}

fn required_ulid(filters: &[(String, &Expr)], col: &'static str) -> Result<Ulid, SqlError> {
    find(filters, col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_ulid)
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

/// First VALUES row. Every command here acts on exactly one row.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            rows => Err(SqlError::Unsupported(format!("{} VALUES rows, expected 1", rows.len()))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Text of a string or number literal.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.as_str()),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is negative")))
}

fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_money(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse::<Money>()
        .map_err(|e| SqlError::Parse(format!("bad amount {s}: {e}")))
}

fn parse_money_or_null(expr: &Expr) -> Result<Option<Money>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_money(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string(expr)?;
    parse_minute(&s).ok_or_else(|| SqlError::Parse(format!("bad time of day: {s}")))
}

/// `24:00` only ends an interval.
fn parse_start_time(expr: &Expr) -> Result<Minute, SqlError> {
    let minute = parse_time(expr)?;
    if minute >= DAY_MINUTES {
        return Err(SqlError::Parse(format!(
            "start time {} is end of day",
            format_minute(minute)
        )));
    }
    Ok(minute)
}

fn parse_payment_method(expr: &Expr) -> Result<Option<PaymentMethod>, SqlError> {
    let Some(s) = parse_string_or_null(expr)? else {
        return Ok(None);
    };
    PaymentMethod::parse(&s)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("bad payment method: {s}")))
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

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
