use crate::config::AppConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use tokio_postgres::{Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info};

pub type PgPool = Pool<PgConnectionManager>;

/// DDL for every table the service reads or writes.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let manager = PgConnectionManager::from_config(config)?;
    let tls = manager.tls.is_some();
    let pool = Pool::builder()
        .max_size(config.max_pool_size)
        .build(manager)
        .await
        .context("failed to build telemetry database pool")?;

    // A bad password should show up in the startup log, not on the first report.
    match pool.get().await {
        Ok(_) => info!(max_size = config.max_pool_size, tls, "telemetry database reachable"),
        Err(err) => error!(error = ?err, "telemetry database unreachable at startup"),
    }

    Ok(pool)
}

pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| anyhow::anyhow!("failed to acquire connection for schema: {err:?}"))?;
    conn.batch_execute(SCHEMA_SQL)
        .await
        .context("failed to apply gateway analytics schema")?;
    info!("gateway analytics schema applied");
    Ok(())
}

/// Certificate files named by the `PGSSL*` variables.
struct TlsFiles<'a> {
    root_cert: &'a str,
    client_identity: Option<(&'a str, &'a str)>,
}

impl<'a> TlsFiles<'a> {
    /// `None` means plaintext. A client certificate without its key (or the
    /// reverse) is a configuration error.
    fn from_config(config: &'a AppConfig) -> Result<Option<Self>> {
        let client_identity = match (config.pg_ssl_cert.as_deref(), config.pg_ssl_key.as_deref()) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)"),
        };

        let Some(root_cert) = config.pg_ssl_root_cert.as_deref() else {
            if client_identity.is_some() {
                anyhow::bail!("PGSSLCERT requires PGSSLROOTCERT");
            }
            return Ok(None);
        };

        Ok(Some(Self {
            root_cert,
            client_identity,
        }))
    }

    fn connector(&self) -> Result<MakeRustlsConnect> {
        let mut roots = RootCertStore::empty();
        for cert in read_certs(self.root_cert, "PGSSLROOTCERT")? {
            roots
                .add(cert)
                .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let client_config = match self.client_identity {
            None => builder.with_no_client_auth(),
            Some((cert, key)) => builder
                .with_client_auth_cert(read_certs(cert, "PGSSLCERT")?, read_key(key)?)
                .context("client certificate does not match PGSSLKEY")?,
        };

        Ok(MakeRustlsConnect::new(client_config))
    }
}

/// bb8 manager handing out diesel-async connections over tokio-postgres.
#[derive(Clone)]
pub struct PgConnectionManager {
    config: PgConfig,
    tls: Option<MakeRustlsConnect>,
}

impl PgConnectionManager {
    fn from_config(config: &AppConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .context("a database URL is required for the postgres backend")?;
        let pg_config = database_url
            .parse::<PgConfig>()
            .context("invalid ANALYTICS_DATABASE_URL")?;
        let tls = TlsFiles::from_config(config)?
            .map(|files| files.connector())
            .transpose()?;

        Ok(Self {
            config: pg_config,
            tls,
        })
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = AsyncPgConnection;
    type Error = anyhow::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = match &self.tls {
            None => {
                let (client, connection) = self.config.connect(NoTls).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
            Some(connector) => {
                let (client, connection) = self.config.connect(connector.clone()).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
        };
        conn.map_err(|err| anyhow::anyhow!("failed to set up diesel connection: {err}"))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.batch_execute("SELECT 1").await?;
        Ok(())
    }

    fn has_broken(&self, _: &mut Self::Connection) -> bool {
        false
    }
}

fn open_pem(path: &str, var: &str) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("failed to open {var} file '{path}'"))?;
    Ok(BufReader::new(file))
}

fn read_certs(path: &str, var: &str) -> Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut open_pem(path, var)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {var}"))?;
    if chain.is_empty() {
        anyhow::bail!("{var} contained no certificates");
    }
    Ok(chain)
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open_pem(path, "PGSSLKEY")?)
        .context("failed to parse PGSSLKEY")?
        .context("PGSSLKEY contained no private keys")
}
