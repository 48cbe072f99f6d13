use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use ulid::Ulid;

use crate::auth::HuddleAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct HuddleHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<HuddleQueryParser>,
}

impl HuddleHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(HuddleQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute, and record RED metrics for one statement.
    async fn run_query(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::CreateRoom {
                name,
                capacity,
                floor,
                amenities,
            } => {
                let room = engine
                    .create_room(name, capacity, floor, amenities)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![room_rows(vec![room])])
            }
            Command::ListRooms {
                min_capacity,
                amenity,
            } => {
                let rooms = engine.list_rooms(min_capacity, amenity.as_deref()).await;
                Ok(vec![room_rows(rooms)])
            }
            Command::CreateBooking {
                room_id,
                title,
                organizer_email,
                start,
                end,
                idempotency_key,
            } => {
                let admission = engine
                    .create_booking(room_id, title, organizer_email, start, end, idempotency_key)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(vec![admission.booking])])
            }
            Command::ListBookings {
                room_id,
                from,
                to,
                limit,
                offset,
            } => {
                let page = engine
                    .list_bookings(BookingFilter {
                        room_id,
                        from,
                        to,
                        limit,
                        offset,
                    })
                    .await;
                Ok(vec![booking_page_rows(page)?])
            }
            Command::CancelBooking { id } => {
                let booking = engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![booking_rows(vec![booking])])
            }
            Command::Utilization { from, to } => {
                let rows = engine
                    .room_utilization(from, to)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(utilization_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|row| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&row.room_id.to_string())?;
                        encoder.encode_field(&row.room_name)?;
                        encoder.encode_field(&row.total_booking_hours)?;
                        encoder.encode_field(&row.utilization_percent)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(encoded),
                ))])
            }
            Command::Listen { channel } => {
                let room_id_str = channel.strip_prefix("room_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected room_{{id}})"),
                    )))
                })?;
                let _room_id = Ulid::from_string(room_id_str).map_err(|e| {
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

// ── Row schemas & encoding ───────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("floor".into(), None, None, Type::INT4, FieldFormat::Text),
        varchar("amenities"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("room_id"),
        varchar("title"),
        varchar("organizer_email"),
        varchar("start_time"),
        varchar("end_time"),
        varchar("status"),
        varchar("created_at"),
    ]
}

/// Booking columns plus the pagination envelope.
fn booking_page_schema() -> Vec<FieldInfo> {
    let mut schema = booking_schema();
    schema.push(int8("total"));
    schema.push(int8("page_limit"));
    schema.push(int8("page_offset"));
    schema
}

fn utilization_schema() -> Vec<FieldInfo> {
    vec![
        varchar("room_id"),
        varchar("room_name"),
        FieldInfo::new(
            "total_booking_hours".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "utilization_percent".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
    ]
}

fn ms_to_iso(ms: Ms) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

fn room_rows(rooms: Vec<RoomInfo>) -> Response {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|room| {
            let amenities =
                serde_json::to_string(&room.amenities).unwrap_or_else(|_| "[]".into());
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room.id.to_string())?;
            encoder.encode_field(&room.name)?;
            encoder.encode_field(&(room.capacity as i32))?;
            encoder.encode_field(&room.floor)?;
            encoder.encode_field(&amenities)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_booking_fields(encoder: &mut DataRowEncoder, b: &BookingInfo) -> PgWireResult<()> {
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&b.title)?;
    encoder.encode_field(&b.organizer_email)?;
    encoder.encode_field(&ms_to_iso(b.start))?;
    encoder.encode_field(&ms_to_iso(b.end))?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    encoder.encode_field(&ms_to_iso(b.created_at))?;
    Ok(())
}

fn booking_rows(bookings: Vec<BookingInfo>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_booking_fields(&mut encoder, &b)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn booking_page_rows(page: BookingPage) -> PgWireResult<Response> {
    let schema = Arc::new(booking_page_schema());
    let rows: Vec<PgWireResult<_>> = page
        .items
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_booking_fields(&mut encoder, b)?;
            encoder.encode_field(&(page.total as i64))?;
            encoder.encode_field(&(page.limit as i64))?;
            encoder.encode_field(&(page.offset as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

#[async_trait]
impl SimpleQueryHandler for HuddleHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run_query(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HuddleQueryParser;

#[async_trait]
impl QueryParser for HuddleQueryParser {
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
        Ok(result_schema_for(stmt))
    }
}

/// Pick the row schema a statement will produce, by table.
fn result_schema_for(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("UTILIZATION") {
        utilization_schema()
    } else if upper.contains("ROOMS") {
        room_schema()
    } else if upper.contains("BOOKINGS") {
        if upper.trim_start().starts_with("SELECT") {
            booking_page_schema()
        } else {
            booking_schema()
        }
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for HuddleHandler {
    type Statement = String;
    type QueryParser = HuddleQueryParser;

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
        let mut responses = self.run_query(&engine, &sql).await?;
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
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

pub struct HuddleFactory {
    handler: Arc<HuddleHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<HuddleAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HuddleFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = HuddleAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HuddleHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HuddleFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(HuddleFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::NotFound(_) => "P0002",
        EngineError::DuplicateName(_) => "23505",
        EngineError::Conflict(_) => "23P01",
        // Retryable from the caller's perspective: the same request is
        // still being worked on.
        EngineError::InProgress => "40001",
        EngineError::BusinessRule(_) => "P0001",
        EngineError::Wal(_) => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = if e.is_validation() { "22023" } else { "42601" };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
