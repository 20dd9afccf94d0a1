use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::PackageSession;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCoach {
        id: Ulid,
        name: String,
    },
    DeleteCoach {
        id: Ulid,
    },
    /// Multi-row INSERT advertises several slots at once.
    InsertSlots {
        slots: Vec<(Ulid, NaiveDate, String, String)>, // (coach_id, date, time, class_type)
    },
    DeleteSlot {
        coach_id: Ulid,
        date: NaiveDate,
        time: String,
        class_type: String,
    },
    InsertBooking {
        id: Ulid,
        user_id: Ulid,
        coach_id: Ulid,
        date: NaiveDate,
        time: String,
        class_type: String,
        proof_ref: Option<String>,
    },
    /// Multi-row INSERT into packages: the shared fields repeat per row and
    /// must be identical; each row contributes one session.
    BookPackage {
        user_id: Ulid,
        class_type: String,
        package_type: String,
        price: i64,
        sessions: Vec<PackageSession>,
    },
    SubmitProof {
        id: Ulid,
        proof_ref: String,
    },
    ResolvePayment {
        id: Ulid,
        verified: bool,
    },
    CompleteBooking {
        id: Ulid,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectCoaches,
    SelectAvailability {
        coach_id: Option<Ulid>,
        occupancy: bool,
    },
    SelectBookings {
        id: Option<Ulid>,
        user_id: Option<Ulid>,
        coach_id: Option<Ulid>,
    },
    SelectPackages {
        user_id: Ulid,
    },
    SelectHistory {
        user_id: Option<Ulid>,
        coach_id: Option<Ulid>,
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
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(&table.relation, assignments, selection)
        }
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "coaches" => {
            let values = &rows[0];
            if values.len() < 2 {
                return Err(SqlError::WrongArity("coaches", 2, values.len()));
            }
            Ok(Command::InsertCoach {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
            })
        }
        "slots" => {
            let mut slots = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 4 {
                    return Err(SqlError::WrongArity("slots row", 4, row.len()));
                }
                slots.push((
                    parse_ulid(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    parse_date(&row[1]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    parse_string(&row[2]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    parse_string(&row[3]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                ));
            }
            Ok(Command::InsertSlots { slots })
        }
        "bookings" => {
            let values = &rows[0];
            if values.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, values.len()));
            }
            let proof_ref = if values.len() >= 7 {
                parse_string_or_null(&values[6])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                user_id: parse_ulid(&values[1])?,
                coach_id: parse_ulid(&values[2])?,
                date: parse_date(&values[3])?,
                time: parse_string(&values[4])?,
                class_type: parse_string(&values[5])?,
                proof_ref,
            })
        }
        "packages" => {
            // Columns: user_id, class_type, package_type, price, id, coach_id, date, time
            let first = &rows[0];
            if first.len() < 8 {
                return Err(SqlError::WrongArity("packages", 8, first.len()));
            }
            let user_id = parse_ulid(&first[0])?;
            let class_type = parse_string(&first[1])?;
            let package_type = parse_string(&first[2])?;
            let price = parse_i64(&first[3])?;

            let mut sessions = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 8 {
                    return Err(SqlError::WrongArity("packages row", 8, row.len()));
                }
                if parse_ulid(&row[0])? != user_id
                    || parse_string(&row[1])? != class_type
                    || parse_string(&row[2])? != package_type
                    || parse_i64(&row[3])? != price
                {
                    return Err(SqlError::Parse(format!(
                        "row {i}: package fields differ between rows"
                    )));
                }
                sessions.push(PackageSession {
                    id: parse_ulid(&row[4]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    coach_id: parse_ulid(&row[5]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    date: parse_date(&row[6]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    time: parse_string(&row[7]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                });
            }
            Ok(Command::BookPackage { user_id, class_type, package_type, price, sessions })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_eq_filters(&delete.selection)?;

    match table.as_str() {
        "coaches" => Ok(Command::DeleteCoach {
            id: required_ulid(&filters, "id")?,
        }),
        "slots" => Ok(Command::DeleteSlot {
            coach_id: required_ulid(&filters, "coach_id")?,
            date: required_date(&filters, "date")?,
            time: required_string(&filters, "time")?,
            class_type: required_string(&filters, "class_type")?,
        }),
        "bookings" => Ok(Command::CancelBooking {
            id: required_ulid(&filters, "id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// UPDATE drives the payment lifecycle:
///   UPDATE bookings SET proof_ref = '...' WHERE id = ...
///   UPDATE bookings SET status = 'verified' | 'rejected' | 'completed' WHERE id = ...
fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_eq_filters(selection)?;
    let id = required_ulid(&filters, "id")?;

    let assignment = assignments
        .first()
        .ok_or(SqlError::Parse("UPDATE without assignment".into()))?;
    let column = assignment_column_name(assignment)?;

    match column.as_str() {
        "proof_ref" => Ok(Command::SubmitProof {
            id,
            proof_ref: parse_string(&assignment.value)?,
        }),
        "status" => match parse_string(&assignment.value)?.to_lowercase().as_str() {
            "verified" => Ok(Command::ResolvePayment { id, verified: true }),
            "rejected" => Ok(Command::ResolvePayment { id, verified: false }),
            "completed" => Ok(Command::CompleteBooking { id }),
            other => Err(SqlError::Parse(format!("unsupported status: {other}"))),
        },
        other => Err(SqlError::Parse(format!("unsupported column in SET: {other}"))),
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
    let filters = collect_eq_filters(&select.selection)?;

    match table.as_str() {
        "coaches" => Ok(Command::SelectCoaches),
        "availability" => Ok(Command::SelectAvailability {
            coach_id: optional_ulid(&filters, "coach_id")?,
            occupancy: match filters.get("occupancy") {
                Some(expr) => parse_bool(expr)?,
                None => false,
            },
        }),
        "bookings" => Ok(Command::SelectBookings {
            id: optional_ulid(&filters, "id")?,
            user_id: optional_ulid(&filters, "user_id")?,
            coach_id: optional_ulid(&filters, "coach_id")?,
        }),
        "packages" => Ok(Command::SelectPackages {
            user_id: required_ulid(&filters, "user_id")?,
        }),
        "history" => {
            let user_id = optional_ulid(&filters, "user_id")?;
            let coach_id = optional_ulid(&filters, "coach_id")?;
            if user_id.is_none() && coach_id.is_none() {
                return Err(SqlError::MissingFilter("user_id or coach_id"));
            }
            Ok(Command::SelectHistory { user_id, coach_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
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

fn assignment_column_name(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Walk a WHERE clause of AND-joined `column = value` terms into a map.
fn collect_eq_filters(selection: &Option<Expr>) -> Result<HashMap<String, Expr>, SqlError> {
    let mut filters = HashMap::new();
    if let Some(expr) = selection {
        collect_eq_filters_inner(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq_filters_inner(expr: &Expr, filters: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters_inner(left, filters)?;
                collect_eq_filters_inner(right, filters)?;
                Ok(())
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left:?}")))?;
                filters.insert(col, (**right).clone());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        Expr::Nested(inner) => collect_eq_filters_inner(inner, filters),
        other => Err(SqlError::Unsupported(format!("{other} in WHERE"))),
    }
}

fn required_ulid(filters: &HashMap<String, Expr>, col: &'static str) -> Result<Ulid, SqlError> {
    filters
        .get(col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_ulid)
}

fn optional_ulid(filters: &HashMap<String, Expr>, col: &str) -> Result<Option<Ulid>, SqlError> {
    filters.get(col).map(parse_ulid).transpose()
}

fn required_date(filters: &HashMap<String, Expr>, col: &'static str) -> Result<NaiveDate, SqlError> {
    filters
        .get(col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_date)
}

fn required_string(filters: &HashMap<String, Expr>, col: &'static str) -> Result<String, SqlError> {
    filters
        .get(col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_string)
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
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

#[cfg(test)]
mod tests {
    use super::*;

    const U1: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const U2: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_insert_coach() {
        let sql = format!("INSERT INTO coaches (id, name) VALUES ('{U1}', 'Coach Reyes')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertCoach { id, name } => {
                assert_eq!(id.to_string(), U1);
                assert_eq!(name, "Coach Reyes");
            }
            _ => panic!("expected InsertCoach, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_coach() {
        let sql = format!("DELETE FROM coaches WHERE id = '{U1}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteCoach { .. }));
    }

    #[test]
    fn parse_insert_slots_multi_row() {
        let sql = format!(
            "INSERT INTO slots (coach_id, date, time, class_type) VALUES \
             ('{U1}', '2099-01-10', '3:00 PM - 4:00 PM', 'Boxing'), \
             ('{U1}', '2099-01-11', '6:00 PM - 7:00 PM', 'Judo')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlots { slots } => {
                assert_eq!(slots.len(), 2);
                assert_eq!(slots[0].1, NaiveDate::from_ymd_opt(2099, 1, 10).unwrap());
                assert_eq!(slots[1].3, "Judo");
            }
            _ => panic!("expected InsertSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_slot() {
        let sql = format!(
            "DELETE FROM slots WHERE coach_id = '{U1}' AND date = '2099-01-10' \
             AND time = '3:00 PM - 4:00 PM' AND class_type = 'Boxing'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::DeleteSlot { date, time, class_type, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2099, 1, 10).unwrap());
                assert_eq!(time, "3:00 PM - 4:00 PM");
                assert_eq!(class_type, "Boxing");
            }
            _ => panic!("expected DeleteSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_proof() {
        let sql = format!(
            "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type, proof_ref) VALUES \
             ('{U1}', '{U2}', '{U1}', '2099-01-10', '3:00 PM - 4:00 PM', 'Boxing', 'gcash-123')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { proof_ref, class_type, .. } => {
                assert_eq!(proof_ref.as_deref(), Some("gcash-123"));
                assert_eq!(class_type, "Boxing");
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_without_proof() {
        let sql = format!(
            "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type) VALUES \
             ('{U1}', '{U2}', '{U1}', '2099-01-10', '3:00 PM - 4:00 PM', 'Boxing')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { proof_ref, .. } => assert_eq!(proof_ref, None),
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_book_package() {
        let sql = format!(
            "INSERT INTO packages (user_id, class_type, package_type, price, id, coach_id, date, time) VALUES \
             ('{U2}', 'Boxing', '10-pack', 50000, '{U1}', '{U1}', '2099-01-10', '3:00 PM - 4:00 PM'), \
             ('{U2}', 'Boxing', '10-pack', 50000, '{U2}', '{U1}', '2099-01-11', '3:00 PM - 4:00 PM')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::BookPackage { user_id, package_type, price, sessions, .. } => {
                assert_eq!(user_id.to_string(), U2);
                assert_eq!(package_type, "10-pack");
                assert_eq!(price, 50000);
                assert_eq!(sessions.len(), 2);
            }
            _ => panic!("expected BookPackage, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_book_package_mismatched_fields_rejected() {
        let sql = format!(
            "INSERT INTO packages (user_id, class_type, package_type, price, id, coach_id, date, time) VALUES \
             ('{U2}', 'Boxing', '10-pack', 50000, '{U1}', '{U1}', '2099-01-10', '3:00 PM - 4:00 PM'), \
             ('{U2}', 'Boxing', '10-pack', 60000, '{U2}', '{U1}', '2099-01-11', '3:00 PM - 4:00 PM')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_submit_proof() {
        let sql = format!("UPDATE bookings SET proof_ref = 'gcash-123' WHERE id = '{U1}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SubmitProof { proof_ref, .. } => assert_eq!(proof_ref, "gcash-123"),
            _ => panic!("expected SubmitProof, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_status_updates() {
        let verify = format!("UPDATE bookings SET status = 'verified' WHERE id = '{U1}'");
        assert!(matches!(parse_sql(&verify).unwrap(), Command::ResolvePayment { verified: true, .. }));

        let reject = format!("UPDATE bookings SET status = 'rejected' WHERE id = '{U1}'");
        assert!(matches!(parse_sql(&reject).unwrap(), Command::ResolvePayment { verified: false, .. }));

        let complete = format!("UPDATE bookings SET status = 'completed' WHERE id = '{U1}'");
        assert!(matches!(parse_sql(&complete).unwrap(), Command::CompleteBooking { .. }));

        let bogus = format!("UPDATE bookings SET status = 'unpaid' WHERE id = '{U1}'");
        assert!(parse_sql(&bogus).is_err());
    }

    #[test]
    fn parse_cancel_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{U1}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::CancelBooking { .. }));
    }

    #[test]
    fn parse_select_coaches() {
        assert_eq!(parse_sql("SELECT * FROM coaches").unwrap(), Command::SelectCoaches);
    }

    #[test]
    fn parse_select_availability() {
        let all = parse_sql("SELECT * FROM availability").unwrap();
        assert_eq!(all, Command::SelectAvailability { coach_id: None, occupancy: false });

        let sql = format!("SELECT * FROM availability WHERE coach_id = '{U1}' AND occupancy = true");
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { coach_id, occupancy } => {
                assert_eq!(coach_id.unwrap().to_string(), U1);
                assert!(occupancy);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!("SELECT * FROM bookings WHERE user_id = '{U2}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings { id, user_id, coach_id } => {
                assert!(id.is_none());
                assert_eq!(user_id.unwrap().to_string(), U2);
                assert!(coach_id.is_none());
            }
            cmd => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_packages_requires_user() {
        assert!(matches!(
            parse_sql("SELECT * FROM packages"),
            Err(SqlError::MissingFilter("user_id"))
        ));
        let sql = format!("SELECT * FROM packages WHERE user_id = '{U2}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectPackages { .. }));
    }

    #[test]
    fn parse_select_history_requires_filter() {
        assert!(parse_sql("SELECT * FROM history").is_err());
        let sql = format!("SELECT * FROM history WHERE coach_id = '{U1}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectHistory { user_id, coach_id } => {
                assert!(user_id.is_none());
                assert!(coach_id.is_some());
            }
            cmd => panic!("expected SelectHistory, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN coach_{U1}");
        match parse_sql(&sql).unwrap() {
            Command::Listen { channel } => assert_eq!(channel, format!("coach_{U1}")),
            cmd => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{U1}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
