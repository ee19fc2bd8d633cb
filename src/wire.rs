use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::RotaAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::schema::{ColumnType, Table};
use crate::sql::{self, Command, RangeQuery};

pub struct RotaHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RotaQueryParser>,
}

impl RotaHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RotaQueryParser),
        }
    }

    /// Execute one parsed statement and record metrics.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Run statements in order, one response each. The first user-facing
    /// error ends the batch; statements before it stay applied.
    async fn run_batch(&self, commands: Vec<Command>) -> PgWireResult<Vec<Response>> {
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            match self.run(cmd).await {
                Ok(response) => responses.push(response),
                Err(PgWireError::UserError(info)) => {
                    responses.push(Response::Error(info));
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        let schema = cmd.result_table().map(|t| Arc::new(field_infos(t)));
        match cmd {
            Command::InsertTeam { slug, name } => {
                engine.create_team(&slug, name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteTeam { slug } => {
                engine.delete_team(&slug).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertUser { username, team } => {
                engine.add_user(&username, &team).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteUser { username } => {
                engine.remove_user(&username).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertEvent {
                team,
                username,
                start,
                end,
            } => {
                engine
                    .create_event(&team, &username, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateEvent { id, update } => {
                // Skipped sub-changes still report the row as updated.
                let report = engine.update_event(id, update).await.map_err(engine_err)?;
                debug!(
                    "update {id}: dates={} role={} user={}",
                    report.dates.label(),
                    report.role.label(),
                    report.user.label()
                );
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteEvent { id } => {
                engine.delete_event(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectEvents { team } => {
                let events = engine.list_events(team.as_deref()).await;
                Ok(event_rows(schema, &events))
            }
            Command::SelectOverlapping(RangeQuery {
                team,
                start,
                end,
                exclude,
            }) => {
                let events = engine
                    .find_overlapping(&team, start, end, exclude)
                    .await
                    .map_err(engine_err)?;
                Ok(event_rows(schema, &events))
            }
            Command::SelectTeams => {
                let teams = engine.list_teams().await;
                Ok(query_response(schema, teams.iter(), |encoder, team| {
                    encoder.encode_field(&team.slug)?;
                    encoder.encode_field(&team.name)
                }))
            }
            Command::SelectUsers { team } => {
                let users = engine.list_members(&team).await;
                Ok(query_response(schema, users.iter(), |encoder, user| {
                    encoder.encode_field(&user.username)?;
                    encoder.encode_field(&user.team)
                }))
            }
            Command::SelectRoles => {
                let roles = engine.list_roles();
                Ok(query_response(schema, roles.iter(), |encoder, role| {
                    encoder.encode_field(role)
                }))
            }
            Command::SelectCapacity(RangeQuery {
                team,
                start,
                end,
                exclude,
            }) => {
                let available = engine
                    .can_add_event(&team, start, end, exclude)
                    .await
                    .map_err(engine_err)?;
                let row = (team, start.to_string(), end.unwrap_or(start).to_string(), available);
                Ok(query_response(schema, std::iter::once(&row), |encoder, row| {
                    encoder.encode_field(&row.0)?;
                    encoder.encode_field(&row.1)?;
                    encoder.encode_field(&row.2)?;
                    encoder.encode_field(&row.3)
                }))
            }
        }
    }
}

fn event_rows(schema: Option<Arc<Vec<FieldInfo>>>, events: &[Event]) -> Response {
    query_response(schema, events.iter(), |encoder, event| {
        encoder.encode_field(&event.id.to_string())?;
        encoder.encode_field(&event.team)?;
        encoder.encode_field(&event.user)?;
        encoder.encode_field(&event.role)?;
        encoder.encode_field(&event.range.start.to_string())?;
        encoder.encode_field(&event.range.end.to_string())
    })
}

/// Encode every item into one data row and wrap the rows in a query response.
fn query_response<'a, T: 'a>(
    schema: Option<Arc<Vec<FieldInfo>>>,
    items: impl Iterator<Item = &'a T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = schema.unwrap_or_default();
    let rows: Vec<PgWireResult<_>> = items
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Row description for a table. Dates travel as `YYYY-MM-DD` text.
pub fn field_infos(table: &Table) -> Vec<FieldInfo> {
    table
        .columns
        .iter()
        .map(|c| {
            let ty = match c.ty {
                ColumnType::Text | ColumnType::Date => Type::VARCHAR,
                ColumnType::Bool => Type::BOOL,
            };
            FieldInfo::new(c.name.into(), None, None, ty, FieldFormat::Text)
        })
        .collect()
}

fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::select_table(sql).map(field_infos).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for RotaHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let commands = sql::parse_batch(query).map_err(sql_err)?;
        self.run_batch(commands).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RotaQueryParser;

#[async_trait]
impl QueryParser for RotaQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RotaHandler {
    type Statement = String;
    type QueryParser = RotaQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    scan_params(sql, |_, n| max = max.max(n));
    max
}

/// Call `on_param` with the byte span and index of every `$N` placeholder
/// outside quoted literals and identifiers.
fn scan_params(sql: &str, mut on_param: impl FnMut(Range<usize>, usize)) {
    let bytes = sql.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens.
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start
                    && let Ok(n) = sql[start..end].parse::<usize>()
                {
                    on_param(i..end, n);
                }
                i = end.max(i + 1);
            }
            None => i += 1,
        }
    }
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &values)
}

/// Splice quoted values into the SQL in one pass. Bound text is never
/// rescanned; placeholders without a value are left as written.
fn bind_params(sql: &str, values: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    scan_params(sql, |span, n| {
        let Some(value) = n.checked_sub(1).and_then(|i| values.get(i)) else {
            return;
        };
        out.push_str(&sql[copied..span.start]);
        match value {
            Some(text) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = span.end;
    });
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RotaFactory {
    handler: Arc<RotaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RotaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RotaFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RotaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RotaHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RotaFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RotaFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM roles"), 0);
        assert_eq!(count_params("SELECT * FROM users WHERE team = $1"), 1);
        assert_eq!(
            count_params("SELECT * FROM capacity WHERE team = $2 AND start >= $1 AND \"end\" <= $10"),
            10
        );
    }

    #[test]
    fn bind_params_quotes_and_nulls() {
        let sql = "INSERT INTO teams (slug, name) VALUES ($1, $2)";
        let bound = bind_params(sql, &[Some("o'ps".into()), None]);
        assert_eq!(bound, "INSERT INTO teams (slug, name) VALUES ('o''ps', NULL)");
        assert_eq!(
            sql::parse_sql(&bound).unwrap(),
            Command::InsertTeam { slug: "o'ps".into(), name: None }
        );
    }

    #[test]
    fn bind_params_multi_digit_indexes() {
        let values: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        assert_eq!(bind_params("$1 $10", &values), "'1' '10'");
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO users (username, team) VALUES ($2, $1)";
        let bound = bind_params(sql, &[Some("ops".into()), Some("a$1".into())]);
        assert_eq!(bound, "INSERT INTO users (username, team) VALUES ('a$1', 'ops')");
    }

    #[test]
    fn placeholders_inside_quotes_are_left_alone() {
        let sql = r#"SELECT * FROM teams WHERE slug = '$1' AND "$2" = $1"#;
        assert_eq!(count_params(sql), 1);
        assert_eq!(
            bind_params(sql, &[Some("ops".into())]),
            r#"SELECT * FROM teams WHERE slug = '$1' AND "$2" = 'ops'"#
        );
        assert_eq!(bind_params("'it''s $1' $1", &[Some("x".into())]), "'it''s $1' 'x'");
    }

    #[test]
    fn unbound_placeholders_stay() {
        assert_eq!(bind_params("$1 $3", &[None]), "NULL $3");
    }

    #[test]
    fn event_schema_columns() {
        let names: Vec<_> = field_infos(&crate::schema::EVENTS)
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["id", "team", "username", "role", "start", "end"]);
        let capacity = field_infos(&crate::schema::CAPACITY);
        assert_eq!(capacity[3].datatype(), &Type::BOOL);
    }

    #[test]
    fn describe_only_selects() {
        assert_eq!(describe("SELECT * FROM teams WHERE slug = $1").len(), 2);
        assert!(describe("DELETE FROM teams WHERE slug = $1").is_empty());
    }
}
