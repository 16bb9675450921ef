//! Connection pool for the relational CRM store.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use tokio_postgres::{Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

pub type CrmPool = Pool<CrmConnectionManager>;

pub async fn connect_pool(config: &AppConfig) -> Result<CrmPool> {
    let tls = match config.pg_ssl_root_cert.as_deref() {
        Some(root_cert) => Some(build_tls_connector(
            root_cert,
            config.pg_ssl_cert.as_deref(),
            config.pg_ssl_key.as_deref(),
        )?),
        None => None,
    };
    let manager = CrmConnectionManager::new(&config.crm_database_url, tls)?;

    let pool = Pool::builder()
        .max_size(config.max_pool_size)
        .build(manager)
        .await
        .context("failed to build CRM connection pool")?;

    // Startup continues without the CRM; drill-downs against it will surface the failure.
    match pool.get().await {
        Ok(_) => info!(max_size = config.max_pool_size, "CRM store reachable"),
        Err(err) => warn!(error = ?err, "CRM connectivity check failed"),
    }

    Ok(pool)
}

#[derive(Clone)]
pub struct CrmConnectionManager {
    config: PgConfig,
    tls: Option<MakeRustlsConnect>,
}

impl CrmConnectionManager {
    fn new(database_url: &str, tls: Option<MakeRustlsConnect>) -> Result<Self> {
        let config = database_url
            .parse::<PgConfig>()
            .context("invalid DRILLDOWN_CRM_DATABASE_URL")?;
        Ok(Self { config, tls })
    }
}

#[async_trait]
impl ManageConnection for CrmConnectionManager {
    type Connection = AsyncPgConnection;
    type Error = anyhow::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let connection = match &self.tls {
            None => {
                let (client, connection) = self.config.connect(NoTls).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
            Some(connector) => {
                let (client, connection) = self.config.connect(connector.clone()).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
        };
        connection.map_err(|err| anyhow::anyhow!(err))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.batch_execute("SELECT 1").await?;
        Ok(())
    }

    fn has_broken(&self, _: &mut Self::Connection) -> bool {
        false
    }
}

fn build_tls_connector(
    root_cert: &str,
    client_cert: Option<&str>,
    client_key: Option<&str>,
) -> Result<MakeRustlsConnect> {
    let mut reader = BufReader::new(
        File::open(root_cert).with_context(|| format!("failed to open PGSSLROOTCERT '{root_cert}'"))?,
    );
    let mut roots = RootCertStore::empty();
    for cert in certs(&mut reader) {
        let cert = cert.context("failed to parse PGSSLROOTCERT")?;
        roots
            .add(cert)
            .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let tls = match (client_cert, client_key) {
        (None, None) => builder.with_no_client_auth(),
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
            .context("failed to build CRM client TLS config")?,
        _ => anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)"),
    };

    Ok(MakeRustlsConnect::new(tls))
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open PGSSLCERT '{path}'"))?,
    );
    let chain = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse PGSSLCERT")?;
    if chain.is_empty() {
        anyhow::bail!("PGSSLCERT contained no certificates");
    }
    Ok(chain)
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open PGSSLKEY '{path}'"))?,
    );
    rustls_pemfile::private_key(&mut reader)
        .context("failed to parse PGSSLKEY")?
        .context("PGSSLKEY contained no private keys")
}
