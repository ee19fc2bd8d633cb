use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::EventUpdate;
use crate::schema::{self, Insert, Table};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTeam {
        slug: String,
        name: Option<String>,
    },
    DeleteTeam {
        slug: String,
    },
    InsertUser {
        username: String,
        team: String,
    },
    DeleteUser {
        username: String,
    },
    InsertEvent {
        team: String,
        username: String,
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
    UpdateEvent {
        id: Ulid,
        update: EventUpdate,
    },
    DeleteEvent {
        id: Ulid,
    },
    SelectEvents {
        team: Option<String>,
    },
    SelectTeams,
    SelectUsers {
        team: String,
    },
    SelectRoles,
    SelectOverlapping(RangeQuery),
    SelectCapacity(RangeQuery),
}

/// Filters shared by `overlapping` and `capacity`.
#[derive(Debug, PartialEq)]
pub struct RangeQuery {
    pub team: String,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub exclude: Option<Ulid>,
}

impl Command {
    /// Table the command's result rows are shaped like, for queries.
    pub fn result_table(&self) -> Option<&'static Table> {
        match self {
            Command::SelectEvents { .. } => Some(&schema::EVENTS),
            Command::SelectTeams => Some(&schema::TEAMS),
            Command::SelectUsers { .. } => Some(&schema::USERS),
            Command::SelectRoles => Some(&schema::ROLES),
            Command::SelectOverlapping(_) => Some(&schema::OVERLAPPING),
            Command::SelectCapacity(_) => Some(&schema::CAPACITY),
            _ => None,
        }
    }
}

/// Parse a single statement. Used by the extended protocol, which carries
/// one statement per Parse message.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_batch(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::MultipleStatements(commands.len()));
    }
    commands.pop().ok_or(SqlError::Empty)
}

/// Parse every `;`-separated statement of a simple query. Nothing is
/// returned unless all of them parse.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, found without binding `$N` parameters.
/// Used to describe prepared statements.
pub fn select_table(sql: &str) -> Option<&'static Table> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let name = table_factor_name(&select.from.first()?.relation).ok()?;
    schema::table(&name)
}

fn lookup_table(name: String) -> Result<&'static Table, SqlError> {
    schema::table(&name).ok_or(SqlError::UnknownTable(name))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = lookup_table(insert_table_name(insert)?)?;
    if table.is_read_only() {
        return Err(SqlError::ReadOnly(table.name.to_string()));
    }
    let rows = extract_all_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let row = bind_insert_row(table, &insert.columns, &rows[0])?;

    match table.name {
        "teams" => Ok(Command::InsertTeam {
            slug: parse_string(row.required("slug")?)?,
            name: row.optional("name").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "users" => Ok(Command::InsertUser {
            username: parse_string(row.required("username")?)?,
            team: parse_string(row.required("team")?)?,
        }),
        "events" => {
            let start = parse_date(row.required("start")?)?;
            let end = row.optional("end").map(parse_date_or_null).transpose()?.flatten();
            check_order(Some(start), end)?;
            Ok(Command::InsertEvent {
                team: parse_string(row.required("team")?)?,
                username: parse_string(row.required("username")?)?,
                start,
                end,
            })
        }
        _ => Err(SqlError::ReadOnly(table.name.to_string())),
    }
}

/// Values of one `INSERT` row keyed by column name.
struct BoundRow<'a> {
    table: &'static str,
    values: Vec<(&'static str, &'a Expr)>,
}

impl<'a> BoundRow<'a> {
    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.values.iter().find(|(name, _)| *name == column).map(|(_, e)| *e)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.optional(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

/// Match the row against the column list, or the table's insertable columns
/// in order when the statement names none.
fn bind_insert_row<'a>(
    table: &'static Table,
    columns: &[ast::Ident],
    row: &'a [Expr],
) -> Result<BoundRow<'a>, SqlError> {
    let names: Vec<&'static str> = if columns.is_empty() {
        let all: Vec<_> = table.insert_columns().map(|c| c.name).collect();
        if row.len() > all.len() {
            return Err(SqlError::WrongArity(table.name, all.len(), row.len()));
        }
        all.into_iter().take(row.len()).collect()
    } else {
        if columns.len() != row.len() {
            return Err(SqlError::WrongArity(table.name, columns.len(), row.len()));
        }
        let mut names = Vec::with_capacity(columns.len());
        for ident in columns {
            let wanted = ident.value.to_lowercase();
            let column = table
                .column(&wanted)
                .ok_or_else(|| SqlError::UnknownColumn(table.name, wanted.clone()))?;
            if column.insert == Insert::Generated {
                return Err(SqlError::ReadOnly(format!("{}.{}", table.name, column.name)));
            }
            names.push(column.name);
        }
        names
    };

    let bound = BoundRow {
        table: table.name,
        values: names.into_iter().zip(row.iter()).collect(),
    };
    for column in table.insert_columns() {
        if column.insert == Insert::Required {
            bound.required(column.name)?;
        }
    }
    Ok(bound)
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = lookup_table(delete_table_name(delete)?)?;

    match table.name {
        "teams" => Ok(Command::DeleteTeam {
            slug: parse_string(extract_where_eq(&delete.selection, "slug")?)?,
        }),
        "users" => Ok(Command::DeleteUser {
            username: parse_string(extract_where_eq(&delete.selection, "username")?)?,
        }),
        "events" => Ok(Command::DeleteEvent {
            id: parse_ulid(extract_where_eq(&delete.selection, "id")?)?,
        }),
        _ => Err(SqlError::ReadOnly(table.name.to_string())),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = lookup_table(table_factor_name(relation)?)?;
    if table.name != "events" {
        return Err(SqlError::ReadOnly(table.name.to_string()));
    }

    let mut update = EventUpdate::default();
    for assignment in assignments {
        let name = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        let column = table
            .column(&name)
            .ok_or_else(|| SqlError::UnknownColumn(table.name, name.clone()))?;
        if !column.updatable {
            return Err(SqlError::ReadOnly(format!("{}.{}", table.name, column.name)));
        }
        let value = &assignment.value;
        match column.name {
            "start" => update.start = parse_date_or_null(value)?,
            "end" => update.end = parse_date_or_null(value)?,
            "role" => update.role = Some(parse_string(value)?),
            "username" => update.user = Some(parse_string(value)?),
            _ => return Err(SqlError::ReadOnly(format!("{}.{}", table.name, column.name))),
        }
    }
    check_order(update.start, update.end)?;

    Ok(Command::UpdateEvent {
        id: parse_ulid(extract_where_eq(selection, "id")?)?,
        update,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = lookup_table(table_factor_name(&select.from[0].relation)?)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.name {
        "events" => Ok(Command::SelectEvents {
            team: filters.eq("team").map(parse_string).transpose()?,
        }),
        "teams" => Ok(Command::SelectTeams),
        "users" => Ok(Command::SelectUsers {
            team: parse_string(filters.eq("team").ok_or(SqlError::MissingFilter("team"))?)?,
        }),
        "roles" => Ok(Command::SelectRoles),
        "overlapping" => Ok(Command::SelectOverlapping(range_query(&filters)?)),
        "capacity" => Ok(Command::SelectCapacity(range_query(&filters)?)),
        _ => Err(SqlError::UnknownTable(table.name.to_string())),
    }
}

fn range_query(filters: &Filters<'_>) -> Result<RangeQuery, SqlError> {
    let team = parse_string(filters.eq("team").ok_or(SqlError::MissingFilter("team"))?)?;
    let start = filters
        .ge("start")
        .or_else(|| filters.eq("start"))
        .ok_or(SqlError::MissingFilter("start"))?;
    let start = parse_date(start)?;
    let end = filters.le("end").map(parse_date_or_null).transpose()?.flatten();
    check_order(Some(start), end)?;
    Ok(RangeQuery {
        team,
        start,
        end,
        exclude: filters.eq("exclude").map(parse_ulid).transpose()?,
    })
}

/// Column comparisons joined by `AND` in a WHERE clause.
#[derive(Default)]
struct Filters<'a> {
    eq: Vec<(String, &'a Expr)>,
    ge: Vec<(String, &'a Expr)>,
    le: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn find(list: &[(String, &'a Expr)], column: &str) -> Option<&'a Expr> {
        list.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        Self::find(&self.eq, column)
    }

    fn ge(&self, column: &str) -> Option<&'a Expr> {
        Self::find(&self.ge, column)
    }

    fn le(&self, column: &str) -> Option<&'a Expr> {
        Self::find(&self.le, column)
    }
}

fn collect_filters<'a>(expr: &'a Expr, filters: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => {
            let list = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, filters)?;
                    return collect_filters(right, filters);
                }
                ast::BinaryOperator::Eq => &mut filters.eq,
                ast::BinaryOperator::GtEq => &mut filters.ge,
                ast::BinaryOperator::LtEq => &mut filters.le,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            list.push((column, &**right));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn check_order(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), SqlError> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(SqlError::EndBeforeStart),
        _ => Ok(()),
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

/// Right-hand side of a `WHERE <column> = <value>` clause.
fn extract_where_eq<'a>(
    selection: &'a Option<Expr>,
    column: &'static str,
) -> Result<&'a Expr, SqlError> {
    let mut filters = Filters::default();
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    collect_filters(sel, &mut filters)?;
    filters.eq(column).ok_or(SqlError::MissingFilter(column))
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| SqlError::BadDate(s))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_date(expr).map(Some),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    MultipleStatements(usize),
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    ReadOnly(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
    BadDate(String),
    EndBeforeStart,
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::MultipleStatements(n) => {
                write!(f, "expected one statement, got {n}")
            }
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} in {t}"),
            SqlError::ReadOnly(what) => write!(f, "{what} is read-only"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadDate(s) => write!(f, "bad date {s:?}, expected YYYY-MM-DD"),
            SqlError::EndBeforeStart => write!(f, "end date is before start date"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parse_insert_team() {
        let cmd = parse_sql("INSERT INTO teams (slug, name) VALUES ('ops', 'Operations')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertTeam { slug: "ops".into(), name: Some("Operations".into()) }
        );
    }

    #[test]
    fn parse_insert_team_without_name() {
        let cmd = parse_sql("INSERT INTO teams (slug) VALUES ('ops')").unwrap();
        assert_eq!(cmd, Command::InsertTeam { slug: "ops".into(), name: None });

        let cmd = parse_sql("INSERT INTO teams VALUES ('ops', NULL)").unwrap();
        assert_eq!(cmd, Command::InsertTeam { slug: "ops".into(), name: None });
    }

    #[test]
    fn parse_delete_team() {
        let cmd = parse_sql("DELETE FROM teams WHERE slug = 'ops'").unwrap();
        assert_eq!(cmd, Command::DeleteTeam { slug: "ops".into() });
    }

    #[test]
    fn parse_insert_and_delete_user() {
        let cmd = parse_sql("INSERT INTO users (username, team) VALUES ('alice', 'ops')").unwrap();
        assert_eq!(cmd, Command::InsertUser { username: "alice".into(), team: "ops".into() });

        let cmd = parse_sql("DELETE FROM users WHERE username = 'alice'").unwrap();
        assert_eq!(cmd, Command::DeleteUser { username: "alice".into() });
    }

    #[test]
    fn parse_insert_event() {
        let sql = r#"INSERT INTO events (team, username, start, "end") VALUES ('ops', 'alice', '2024-01-10', '2024-01-12')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertEvent {
                team: "ops".into(),
                username: "alice".into(),
                start: d("2024-01-10"),
                end: Some(d("2024-01-12")),
            }
        );
    }

    #[test]
    fn parse_insert_event_columns_in_any_order() {
        let sql = "INSERT INTO events (start, username, team) VALUES ('2024-01-10', 'alice', 'ops')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertEvent {
                team: "ops".into(),
                username: "alice".into(),
                start: d("2024-01-10"),
                end: None,
            }
        );
    }

    #[test]
    fn insert_event_rejects_bad_dates() {
        let sql = "INSERT INTO events (team, username, start) VALUES ('ops', 'alice', '2024-13-01')";
        assert!(matches!(parse_sql(sql), Err(SqlError::BadDate(_))));

        let sql = "INSERT INTO events (team, username, start) VALUES ('ops', 'alice', 'tomorrow')";
        assert!(matches!(parse_sql(sql), Err(SqlError::BadDate(_))));

        let sql = r#"INSERT INTO events (team, username, start, "end") VALUES ('ops', 'alice', '2024-01-10', '2024-01-09')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::EndBeforeStart)));
    }

    #[test]
    fn insert_event_rejects_generated_and_missing_columns() {
        let sql = "INSERT INTO events (team, username, start, role) VALUES ('ops', 'a', '2024-01-10', 'Primary')";
        assert!(matches!(parse_sql(sql), Err(SqlError::ReadOnly(_))));

        let sql = "INSERT INTO events (team, username) VALUES ('ops', 'alice')";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("events", "start"))));

        let sql = "INSERT INTO events (team, nickname, start) VALUES ('ops', 'a', '2024-01-10')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("events", _))));

        let sql = "INSERT INTO events (team, username, start) VALUES ('ops', 'alice')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("events", 3, 2))));
    }

    #[test]
    fn parse_update_event() {
        let sql = format!(
            r#"UPDATE events SET start = '2024-01-11', "end" = '2024-01-12', role = 'Secondary', username = 'bob' WHERE id = '{ID}'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateEvent { id, update } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(
                    update,
                    EventUpdate {
                        start: Some(d("2024-01-11")),
                        end: Some(d("2024-01-12")),
                        role: Some("Secondary".into()),
                        user: Some("bob".into()),
                    }
                );
            }
            cmd => panic!("expected UpdateEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_partial_update() {
        let sql = format!("UPDATE events SET username = 'carol' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateEvent { update, .. } => {
                assert_eq!(update, EventUpdate { user: Some("carol".into()), ..Default::default() });
            }
            cmd => panic!("expected UpdateEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn update_rejects_bad_targets() {
        let sql = format!("UPDATE events SET team = 'dev' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::ReadOnly(_))));

        let sql = "UPDATE teams SET name = 'x' WHERE slug = 'ops'";
        assert!(matches!(parse_sql(sql), Err(SqlError::ReadOnly(_))));

        let sql = "UPDATE events SET role = 'Primary'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));

        let sql = format!(r#"UPDATE events SET start = '2024-01-10', "end" = '2024-01-01' WHERE id = '{ID}'"#);
        assert!(matches!(parse_sql(&sql), Err(SqlError::EndBeforeStart)));
    }

    #[test]
    fn parse_delete_event() {
        let cmd = parse_sql(&format!("DELETE FROM events WHERE id = '{ID}'")).unwrap();
        match cmd {
            Command::DeleteEvent { id } => assert_eq!(id.to_string(), ID),
            _ => panic!("expected DeleteEvent, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql("DELETE FROM events WHERE id = 'not-a-ulid'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn parse_listing_selects() {
        assert_eq!(parse_sql("SELECT * FROM events").unwrap(), Command::SelectEvents { team: None });
        assert_eq!(
            parse_sql("SELECT * FROM events WHERE team = 'ops'").unwrap(),
            Command::SelectEvents { team: Some("ops".into()) }
        );
        assert_eq!(parse_sql("SELECT * FROM teams").unwrap(), Command::SelectTeams);
        assert_eq!(
            parse_sql("SELECT * FROM users WHERE team = 'ops'").unwrap(),
            Command::SelectUsers { team: "ops".into() }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM users"),
            Err(SqlError::MissingFilter("team"))
        ));
        assert_eq!(parse_sql("SELECT * FROM roles").unwrap(), Command::SelectRoles);
    }

    #[test]
    fn parse_select_overlapping() {
        let sql = format!(
            r#"SELECT * FROM overlapping WHERE team = 'ops' AND start >= '2024-01-10' AND "end" <= '2024-01-12' AND exclude = '{ID}'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectOverlapping(q) => {
                assert_eq!(q.team, "ops");
                assert_eq!(q.start, d("2024-01-10"));
                assert_eq!(q.end, Some(d("2024-01-12")));
                assert_eq!(q.exclude.map(|u| u.to_string()).as_deref(), Some(ID));
            }
            cmd => panic!("expected SelectOverlapping, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_capacity_single_day() {
        let sql = "SELECT * FROM capacity WHERE team = 'ops' AND start >= '2024-01-10'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectCapacity(RangeQuery {
                team: "ops".into(),
                start: d("2024-01-10"),
                end: None,
                exclude: None,
            })
        );
        assert!(matches!(
            parse_sql("SELECT * FROM capacity WHERE team = 'ops'"),
            Err(SqlError::MissingFilter("start"))
        ));
    }

    #[test]
    fn read_only_tables_reject_writes() {
        assert!(matches!(
            parse_sql("INSERT INTO roles (role) VALUES ('Tertiary')"),
            Err(SqlError::ReadOnly(_))
        ));
        assert!(matches!(
            parse_sql("DELETE FROM capacity WHERE team = 'ops'"),
            Err(SqlError::ReadOnly(_))
        ));
    }

    #[test]
    fn result_tables() {
        let cmd = parse_sql("SELECT * FROM roles").unwrap();
        assert_eq!(cmd.result_table().map(|t| t.name), Some("roles"));
        let cmd = parse_sql("DELETE FROM teams WHERE slug = 'ops'").unwrap();
        assert!(cmd.result_table().is_none());
    }

    #[test]
    fn select_table_ignores_placeholders() {
        let sql = "SELECT * FROM capacity WHERE team = $1 AND start >= $2";
        assert_eq!(select_table(sql).map(|t| t.name), Some("capacity"));
        assert!(select_table("DELETE FROM events WHERE id = $1").is_none());
        assert!(select_table("SELECT * FROM bookings").is_none());
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO bookings (id) VALUES ('x')"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_batch_keeps_every_statement() {
        let cmds = parse_batch(
            "INSERT INTO teams (slug) VALUES ('ops');
             INSERT INTO users (username, team) VALUES ('alice', 'ops');
             SELECT * FROM roles",
        )
        .unwrap();
        assert_eq!(
            cmds,
            vec![
                Command::InsertTeam { slug: "ops".into(), name: None },
                Command::InsertUser { username: "alice".into(), team: "ops".into() },
                Command::SelectRoles,
            ]
        );
    }

    #[test]
    fn parse_batch_rejects_whole_batch_on_one_bad_statement() {
        let err = parse_batch(
            "INSERT INTO teams (slug) VALUES ('ops');
             INSERT INTO events (team, username, start) VALUES ('ops', 'alice', '10/01/2024')",
        )
        .unwrap_err();
        assert!(matches!(err, SqlError::BadDate(_)));
    }

    #[test]
    fn parse_sql_wants_exactly_one_statement() {
        assert!(matches!(
            parse_sql("SELECT * FROM roles; SELECT * FROM teams"),
            Err(SqlError::MultipleStatements(2))
        ));
    }
}
