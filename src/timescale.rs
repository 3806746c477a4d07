use crate::archive::{Measurement, MeasurementSink};
use crate::config::TimescaleConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type DbPool = Pool<Postgres>;

pub async fn connect(cfg: &TimescaleConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections.unwrap_or(5))
        .connect(&cfg.url)
        .await?;
    Ok(pool)
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid table name: {name:?}")))
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("timestamp out of range: {secs}")))
}

/// Builds `INSERT INTO table (ts, name, value) VALUES ($1, $2, $3), ...`.
fn insert_sql(table: &str, rows: usize) -> String {
    let values: Vec<String> = (0..rows)
        .map(|i| format!("(${}, ${}, ${})", i * 3 + 1, i * 3 + 2, i * 3 + 3))
        .collect();
    format!(
        "INSERT INTO {} (ts, name, value) VALUES {}",
        table,
        values.join(", ")
    )
}

pub struct TimescaleSink {
    pool: DbPool,
    table: String,
}

impl TimescaleSink {
    pub fn new(pool: DbPool, table: &str) -> Result<Self> {
        check_identifier(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Creates the measurement table if missing and turns it into a hypertable
    /// when the TimescaleDB extension is available.
    pub async fn ensure_table(&self) -> Result<()> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             ts TIMESTAMPTZ NOT NULL, \
             name TEXT NOT NULL, \
             value DOUBLE PRECISION NOT NULL)",
            self.table
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let hypertable = format!(
            "SELECT create_hypertable('{}', 'ts', if_not_exists => TRUE)",
            self.table
        );
        match sqlx::query(&hypertable).execute(&self.pool).await {
            Ok(_) => info!(table = %self.table, "hypertable ready"),
            Err(e) => warn!(table = %self.table, error = %e, "create_hypertable failed; using a plain table"),
        }
        Ok(())
    }
}

/// Connects and prepares the table, retrying every `backoff` until the
/// database answers. Only an invalid table name is returned as an error.
pub async fn open_sink(cfg: &TimescaleConfig, backoff: Duration) -> Result<TimescaleSink> {
    check_identifier(&cfg.table)?;
    loop {
        match try_open(cfg).await {
            Ok(sink) => return Ok(sink),
            Err(e) => {
                warn!(error = %e, "cannot open TimescaleDB; retrying in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn try_open(cfg: &TimescaleConfig) -> Result<TimescaleSink> {
    let pool = connect(cfg).await?;
    let sink = TimescaleSink::new(pool, &cfg.table)?;
    sink.ensure_table().await?;
    Ok(sink)
}

#[async_trait]
impl MeasurementSink for TimescaleSink {
    async fn commit(&self, batch: &[Measurement]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let sql = insert_sql(&self.table, batch.len());
        let mut q = sqlx::query(&sql);
        for m in batch {
            q = q.bind(timestamp(m.ts)?).bind(&m.name).bind(m.value);
        }
        // a single statement: the batch is stored whole or not at all
        q.execute(&self.pool).await?;
        debug!(rows = batch.len(), table = %self.table, "measurements committed");
        Ok(())
    }
}
