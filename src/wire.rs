use std::fmt::Debug;
use std::sync::Arc;

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
use ulid::Ulid;

use crate::auth::TatamiAuthSource;
use crate::engine::Engine;
use crate::model::{Booking, HistoryEntry};
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::GymManager;

pub struct TatamiHandler {
    gyms: Arc<GymManager>,
    query_parser: Arc<TatamiQueryParser>,
}

impl TatamiHandler {
    pub fn new(gyms: Arc<GymManager>) -> Self {
        Self {
            gyms,
            query_parser: Arc::new(TatamiQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.gyms.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("gym error: {e}"),
            )))
        })
    }

    /// Execute with RED metrics around the dispatch.
    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let now = chrono::Local::now().naive_local();
        match cmd {
            Command::InsertCoach { id, name } => {
                engine.create_coach(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteCoach { id } => {
                engine.delete_coach(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertSlots { slots } => {
                let count = slots.len();
                for (coach_id, date, time, class_type) in slots {
                    engine
                        .add_slot(coach_id, date, time, class_type)
                        .await
                        .map_err(engine_err)?;
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::DeleteSlot { coach_id, date, time, class_type } => {
                engine
                    .remove_slot(coach_id, date, time, class_type)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { id, user_id, coach_id, date, time, class_type, proof_ref } => {
                engine
                    .book(id, user_id, coach_id, date, time, class_type, proof_ref, now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::BookPackage { user_id, class_type, package_type, price, sessions } => {
                let count = sessions.len();
                engine
                    .book_package(user_id, class_type, package_type, price, sessions, now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::SubmitProof { id, proof_ref } => {
                engine.submit_proof(id, proof_ref).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::ResolvePayment { id, verified } => {
                if verified {
                    engine.verify_payment(id).await.map_err(engine_err)?;
                } else {
                    engine.reject_payment(id).await.map_err(engine_err)?;
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CompleteBooking { id } => {
                let rows = match engine.complete_booking(id, now).await.map_err(engine_err)? {
                    Some(_) => 1,
                    None => 0,
                };
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(rows))])
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id, now).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectCoaches => {
                let schema = Arc::new(coaches_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_coaches()
                    .await
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        encoder.encode_field(&(c.slot_count as i64))?;
                        encoder.encode_field(&(c.booking_count as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { coach_id, occupancy } => {
                let listing = engine
                    .coach_availability(coach_id, occupancy, now)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = listing
                    .into_iter()
                    .map(|row| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&row.coach_id.to_string())?;
                        encoder.encode_field(&row.coach_name)?;
                        encoder.encode_field(&row.date.to_string())?;
                        encoder.encode_field(&row.time)?;
                        encoder.encode_field(&row.class_type)?;
                        encoder.encode_field(&row.occupied)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBookings { id, user_id, coach_id } => {
                let bookings: Vec<Booking> = if let Some(id) = id {
                    engine.get_booking(id).await.map_err(engine_err)?.into_iter().collect()
                } else if let Some(user_id) = user_id {
                    engine.bookings_for_user(user_id).await.map_err(engine_err)?
                } else if let Some(coach_id) = coach_id {
                    engine.bookings_for_coach(coach_id).await.map_err(engine_err)?
                } else {
                    return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42601".into(),
                        "bookings query needs an id, user_id or coach_id filter".into(),
                    ))));
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.user_id.to_string())?;
                        encoder.encode_field(&b.coach_id.to_string())?;
                        encoder.encode_field(&b.coach_name)?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&b.time)?;
                        encoder.encode_field(&b.class_type)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.proof_ref)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectPackages { user_id } => {
                let views = engine.package_view(user_id).await.map_err(engine_err)?;
                let schema = Arc::new(packages_schema());
                let rows: Vec<PgWireResult<_>> = views
                    .into_iter()
                    .map(|v| {
                        let ids: Vec<String> = v.booking_ids.iter().map(|id| id.to_string()).collect();
                        let ids_json = serde_json::to_string(&ids).map_err(|e| {
                            PgWireError::ApiError(Box::new(e))
                        })?;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&v.user_id.to_string())?;
                        encoder.encode_field(&v.class_type)?;
                        encoder.encode_field(&v.package_type)?;
                        encoder.encode_field(&v.price)?;
                        encoder.encode_field(&v.payment_date.to_string())?;
                        encoder.encode_field(&v.status.as_str())?;
                        encoder.encode_field(&ids_json)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectHistory { user_id, coach_id } => {
                let entries: Vec<HistoryEntry> = if let Some(user_id) = user_id {
                    engine.user_history(user_id)
                } else if let Some(coach_id) = coach_id {
                    engine.coach_history(coach_id).await.map_err(engine_err)?
                } else {
                    Vec::new()
                };
                let schema = Arc::new(history_schema());
                let rows: Vec<PgWireResult<_>> = entries
                    .into_iter()
                    .map(|e| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&e.booking_id.to_string())?;
                        encoder.encode_field(&e.user_id.to_string())?;
                        encoder.encode_field(&e.coach_id.to_string())?;
                        encoder.encode_field(&e.coach_name)?;
                        encoder.encode_field(&e.date.to_string())?;
                        encoder.encode_field(&e.time)?;
                        encoder.encode_field(&e.class_type)?;
                        encoder.encode_field(&e.attendance_status)?;
                        encoder.encode_field(&e.completed_at.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Listen { channel } => {
                let id_str = channel
                    .strip_prefix("coach_")
                    .or_else(|| channel.strip_prefix("user_"))
                    .ok_or_else(|| {
                        PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "42000".into(),
                            format!("invalid channel: {channel} (expected coach_{{id}} or user_{{id}})"),
                        )))
                    })?;
                let _id = Ulid::from_string(id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn coaches_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        FieldInfo::new("slot_count".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("booking_count".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        varchar("coach_id"),
        varchar("coach_name"),
        varchar("date"),
        varchar("time"),
        varchar("class_type"),
        FieldInfo::new("occupied".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("user_id"),
        varchar("coach_id"),
        varchar("coach_name"),
        varchar("date"),
        varchar("time"),
        varchar("class_type"),
        varchar("status"),
        varchar("proof_ref"),
    ]
}

fn packages_schema() -> Vec<FieldInfo> {
    vec![
        varchar("user_id"),
        varchar("class_type"),
        varchar("package_type"),
        FieldInfo::new("price".into(), None, None, Type::INT8, FieldFormat::Text),
        varchar("payment_date"),
        varchar("status"),
        varchar("booking_ids"),
    ]
}

fn history_schema() -> Vec<FieldInfo> {
    vec![
        varchar("booking_id"),
        varchar("user_id"),
        varchar("coach_id"),
        varchar("coach_name"),
        varchar("date"),
        varchar("time"),
        varchar("class_type"),
        varchar("attendance_status"),
        varchar("completed_at"),
    ]
}

/// Pick a result schema from the raw SQL, for Describe responses.
fn select_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("PACKAGES") {
        packages_schema()
    } else if upper.contains("HISTORY") {
        history_schema()
    } else if upper.contains("COACHES") {
        coaches_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for TatamiHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.dispatch(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TatamiQueryParser;

#[async_trait]
impl QueryParser for TatamiQueryParser {
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
        Ok(select_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TatamiHandler {
    type Statement = String;
    type QueryParser = TatamiQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.dispatch(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            select_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(select_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TatamiFactory {
    handler: Arc<TatamiHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TatamiAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TatamiFactory {
    pub fn new(gyms: Arc<GymManager>, password: String) -> Self {
        let auth_source = TatamiAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TatamiHandler::new(gyms)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TatamiFactory {
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

/// Serve one TCP connection through the pgwire protocol machinery.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    gyms: Arc<GymManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(TatamiFactory::new(gyms, password));
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
