use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use diesel_async::SimpleAsyncConnection;
use gateway_analytics::{
    config::{AppConfig, StorageBackend},
    db,
    error::{Result as ServiceResult, ServiceError},
    models::{AnalyticsConfigRow, GatewayDetail, GatewayReport, GatewayRow},
    server::Server,
    store::{MemoryTelemetryStore, PgTelemetryStore, TelemetryStore},
};
use serde::Serialize;
use serde_json::Value;
use std::{env, future::Future, net::SocketAddr, sync::Arc, sync::Once};
use tower::ServiceExt;
use uuid::Uuid;

static TRACING_INIT: Once = Once::new();

const RESET_SQL: &str = "DROP TABLE IF EXISTS latest_events, disks, services, \
                         performance_metrics, gateways, analytics_configs CASCADE;";

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

fn listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Router over a fresh in-memory store.
#[derive(Clone)]
pub struct AnalyticsTestHarness {
    router: Router,
    store: Arc<MemoryTelemetryStore>,
}

impl AnalyticsTestHarness {
    pub fn new() -> Self {
        Self::with_settings(Vec::new())
    }

    pub fn with_settings(settings: Vec<AnalyticsConfigRow>) -> Self {
        let store = Arc::new(MemoryTelemetryStore::with_settings(settings));
        Self::serving(Arc::clone(&store) as Arc<dyn TelemetryStore>, store)
    }

    /// Router whose writes fail as if the database dropped the transaction.
    /// Reads still go to the in-memory store.
    pub fn with_failing_writes() -> Self {
        let store = Arc::new(MemoryTelemetryStore::new());
        let failing = FailingWrites {
            reads: Arc::clone(&store),
        };
        Self::serving(Arc::new(failing), store)
    }

    fn serving(backend: Arc<dyn TelemetryStore>, store: Arc<MemoryTelemetryStore>) -> Self {
        init_tracing();
        let server = Server::with_store(AppConfig::in_memory(listen_addr()), backend);
        Self {
            router: server.router(),
            store,
        }
    }

    pub fn store(&self) -> &MemoryTelemetryStore {
        &self.store
    }

    pub async fn get(&self, path: &str) -> http::Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("failed to build harness request");
        self.send(request).await
    }

    pub async fn post_json<T>(&self, path: &str, payload: &T) -> http::Response<Body>
    where
        T: Serialize,
    {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.post_raw(path, body).await
    }

    pub async fn post_raw(&self, path: &str, body: impl Into<Body>) -> http::Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .expect("failed to build harness request");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> http::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

struct FailingWrites {
    reads: Arc<MemoryTelemetryStore>,
}

#[async_trait]
impl TelemetryStore for FailingWrites {
    async fn list_gateways(&self) -> ServiceResult<Vec<GatewayRow>> {
        self.reads.list_gateways().await
    }

    async fn find_gateway(&self, gateway_id: Uuid) -> ServiceResult<Option<GatewayDetail>> {
        self.reads.find_gateway(gateway_id).await
    }

    async fn find_settings(&self) -> ServiceResult<Option<AnalyticsConfigRow>> {
        self.reads.find_settings().await
    }

    async fn write_report(&self, _: &GatewayReport, _: DateTime<Utc>) -> ServiceResult<()> {
        Err(ServiceError::Storage(
            diesel::result::Error::BrokenTransactionManager,
        ))
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should deserialize");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

/// Runs `test` against a Postgres store on a freshly reset schema. The pool is
/// handed over as well so tests can seed rows the service never writes.
///
/// Skipped unless `ANALYTICS_TEST_DATABASE_URL` points at a disposable database.
pub async fn with_postgres_store<F, Fut>(test: F)
where
    F: FnOnce(PgTelemetryStore, db::PgPool) -> Fut,
    Fut: Future<Output = ()>,
{
    init_tracing();

    let Ok(database_url) = env::var("ANALYTICS_TEST_DATABASE_URL") else {
        eprintln!(
            "[analytics-test] skipping postgres store test: ANALYTICS_TEST_DATABASE_URL is not set"
        );
        return;
    };

    let mut config = AppConfig::in_memory(listen_addr());
    config.storage = StorageBackend::Postgres;
    config.database_url = Some(database_url);
    config.max_pool_size = 4;
    config.pg_ssl_root_cert = env::var("PGSSLROOTCERT").ok();
    config.pg_ssl_cert = env::var("PGSSLCERT").ok();
    config.pg_ssl_key = env::var("PGSSLKEY").ok();

    let pool = db::connect_pool(&config)
        .await
        .expect("failed to connect to test database");
    {
        let mut conn = pool.get().await.expect("failed to acquire test connection");
        conn.batch_execute(RESET_SQL)
            .await
            .expect("failed to reset test schema");
    }
    db::apply_schema(&pool)
        .await
        .expect("failed to apply test schema");

    test(PgTelemetryStore::new(pool.clone()), pool).await;
}
