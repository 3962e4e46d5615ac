use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::NoTls;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Schema whose tables are offered to the model.
    pub schema: String,
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Only honoured for
    /// `Prefer` and `Require`.
    pub accept_invalid_certs: bool,
    /// Optional path to a PEM bundle of CA certificates.
    pub ca_cert_path: Option<String>,
    pub pool_size: usize,
    pub connect_timeout_secs: u64,
    /// Upper bound for every catalog or execution round trip, including
    /// the wait for a pooled connection.
    pub statement_timeout_secs: u64,
}

/// SSL/TLS connection modes for PostgreSQL.
///
/// These match the standard PostgreSQL sslmode parameter:
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first, fall back to non-SSL (default)
/// - `Require`: Require SSL but don't verify certificate
/// - `VerifyCa`: Require SSL and verify the server certificate is signed by a trusted CA
/// - `VerifyFull`: Like VerifyCa, but also verify the server hostname matches the certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disable" => Some(SslMode::Disable),
            "prefer" => Some(SslMode::Prefer),
            "require" => Some(SslMode::Require),
            "verify-ca" | "verifyca" => Some(SslMode::VerifyCa),
            "verify-full" | "verifyfull" => Some(SslMode::VerifyFull),
            _ => None,
        }
    }
}

impl ConnectionConfig {
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .application_name("nlsql")
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .ssl_mode(match self.ssl_mode {
                SslMode::Disable => PgSslMode::Disable,
                SslMode::Prefer => PgSslMode::Prefer,
                SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => PgSslMode::Require,
            });
        if !self.password.is_empty() {
            pg.password(&self.password);
        }
        pg
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{} (schema {})",
            self.username, self.host, self.port, self.database, self.schema
        )
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            schema: String::from("public"),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            pool_size: 8,
            connect_timeout_secs: 10,
            statement_timeout_secs: 15,
        }
    }
}

/// Build a connection pool for the configured database.
///
/// No connection is opened here; the first checkout connects.
pub fn build_pool(config: &ConnectionConfig) -> Result<Pool> {
    let pg_config = config.pg_config();
    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = match config.ssl_mode {
        SslMode::Disable => Manager::from_config(pg_config, NoTls, manager_config),
        SslMode::Prefer | SslMode::Require => {
            let tls = build_tls_connector(config, false)?;
            Manager::from_config(pg_config, tls, manager_config)
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let tls = build_tls_connector(config, true)?;
            Manager::from_config(pg_config, tls, manager_config)
        }
    };

    let timeout = config.statement_timeout();
    Pool::builder(manager)
        .max_size(config.pool_size.max(1))
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(timeout))
        .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
        .recycle_timeout(Some(timeout))
        .build()
        .context("Failed to build PostgreSQL connection pool")
}

/// Build a TLS connector with appropriate certificate configuration.
///
/// # Arguments
/// * `config` - Connection configuration
/// * `strict_verify` - If true, always verify certificates (for verify-ca/verify-full modes)
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else {
        if let Some(ca_path) = &config.ca_cert_path {
            let ca_data = std::fs::read(ca_path)
                .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
            for pem in split_pem_certificates(&ca_data)? {
                let cert = native_tls::Certificate::from_pem(pem.as_bytes())
                    .context("Failed to parse CA certificate")?;
                builder.add_root_certificate(cert);
            }
        }
        // verify-ca checks the chain only
        if config.ssl_mode == SslMode::VerifyCa {
            builder.danger_accept_invalid_hostnames(true);
        }
    }

    let connector = builder.build().context("Failed to build TLS connector")?;

    Ok(MakeTlsConnector::new(connector))
}

/// Split a PEM bundle into its individual certificate blocks.
fn split_pem_certificates(pem_data: &[u8]) -> Result<Vec<String>> {
    let pem_str =
        std::str::from_utf8(pem_data).context("CA certificate file is not valid UTF-8")?;

    let mut certs = Vec::new();
    let mut current = String::new();
    let mut in_cert = false;

    for line in pem_str.lines() {
        let line = line.trim();
        if line.contains("-----BEGIN CERTIFICATE-----") {
            in_cert = true;
            current.clear();
            current.push_str(line);
            current.push('\n');
        } else if line.contains("-----END CERTIFICATE-----") {
            if in_cert {
                current.push_str(line);
                current.push('\n');
                certs.push(std::mem::take(&mut current));
            }
            in_cert = false;
        } else if in_cert {
            current.push_str(line);
            current.push('\n');
        }
    }

    if certs.is_empty() {
        anyhow::bail!("No valid certificates found in PEM data");
    }

    Ok(certs)
}
