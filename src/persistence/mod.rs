//! SQLite Persistence Module
//!
//! Append-only `pricing_record` ledger. Writers go through [`LedgerTx`] so a
//! record becomes visible only after its averages and signature are set.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{OracleError, Result};
use crate::ledger::AverageWindow;
use crate::signing::SignatureCompact;
use crate::types::{AssetValues, MovingAverages, PricingRecord, Ticker};

const TABLE: &str = "pricing_record";

/// Handle to the ledger database. Cheap to clone.
#[derive(Clone)]
pub struct LedgerStore {
    pool: Pool<Sqlite>,
}

impl LedgerStore {
    /// Open (creating if missing) the database at `database_url` and make
    /// sure the schema exists.
    pub async fn open(database_url: &str, max_connections: u32) -> Result<Self> {
        info!(url = %database_url, max_connections, "Opening ledger store");

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let ticker_columns: String = Ticker::ALL
            .iter()
            .map(|t| format!("\"{}\" INTEGER NOT NULL DEFAULT 0,", t.as_str()))
            .collect::<Vec<_>>()
            .join("\n                ");

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {ticker_columns}
                ma1 INTEGER NOT NULL DEFAULT 0,
                ma2 INTEGER NOT NULL DEFAULT 0,
                ma3 INTEGER NOT NULL DEFAULT 0,
                signature BLOB NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{TABLE}_timestamp ON {TABLE}(timestamp);"
        ))
        .execute(&self.pool)
        .await?;

        debug!("Ledger schema initialized");
        Ok(())
    }

    /// Start a write transaction
    pub async fn begin(&self) -> Result<LedgerTx> {
        Ok(LedgerTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Most recent committed record
    pub async fn latest_record(&self) -> Result<Option<PricingRecord>> {
        let row = sqlx::query(&format!("SELECT * FROM {TABLE} ORDER BY id DESC LIMIT 1"))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn record_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Open write transaction. Dropping it without [`LedgerTx::commit`] rolls
/// everything back.
pub struct LedgerTx {
    tx: Transaction<'static, Sqlite>,
}

impl LedgerTx {
    /// Append a row with zero averages and the placeholder signature
    pub async fn insert_record(&mut self, values: &AssetValues, timestamp: i64) -> Result<i64> {
        let columns: Vec<String> = Ticker::ALL
            .iter()
            .map(|t| format!("\"{}\"", t.as_str()))
            .collect();
        let placeholders = vec!["?"; Ticker::COUNT].join(", ");
        let sql = format!(
            "INSERT INTO {TABLE} ({}, ma1, ma2, ma3, signature, timestamp) \
             VALUES ({}, 0, 0, 0, ?, ?)",
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for (ticker, value) in values.iter() {
            query = query.bind(to_column(ticker.as_str(), value)?);
        }
        let result = query
            .bind(SignatureCompact::ZERO.as_bytes().to_vec())
            .bind(timestamp)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn update_averages(&mut self, id: i64, averages: &MovingAverages) -> Result<()> {
        let [ma1, ma2, ma3] = averages.as_array();
        let result = sqlx::query(&format!(
            "UPDATE {TABLE} SET ma1 = ?, ma2 = ?, ma3 = ? WHERE id = ?"
        ))
        .bind(to_column("ma1", ma1)?)
        .bind(to_column("ma2", ma2)?)
        .bind(to_column("ma3", ma3)?)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(OracleError::CorruptRecord(format!(
                "record {} missing while storing averages",
                id
            )));
        }
        Ok(())
    }

    /// Set the signature of `id`. Refuses to overwrite a non-placeholder.
    pub async fn update_signature(&mut self, id: i64, signature: &SignatureCompact) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {TABLE} SET signature = ? WHERE id = ? AND signature = zeroblob(64)"
        ))
        .bind(signature.as_bytes().to_vec())
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(OracleError::CorruptRecord(format!(
                "record {} missing or already signed",
                id
            )));
        }
        Ok(())
    }

    pub async fn fetch_record(&mut self, id: i64) -> Result<PricingRecord> {
        let row = sqlx::query(&format!("SELECT * FROM {TABLE} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| OracleError::CorruptRecord(format!("record {} not found", id)))?;
        row_to_record(&row)
    }

    /// Values of `ticker` from rows before `before_id`, newest first
    pub async fn window_values(
        &mut self,
        ticker: Ticker,
        window: AverageWindow,
        before_id: i64,
        now: i64,
    ) -> Result<Vec<u64>> {
        let column = ticker.as_str();
        let rows: Vec<i64> = match window {
            AverageWindow::LastNonZero { rows } => {
                sqlx::query_scalar(&format!(
                    "SELECT \"{column}\" FROM {TABLE} \
                     WHERE id < ? AND \"{column}\" > 0 ORDER BY id DESC LIMIT ?"
                ))
                .bind(before_id)
                .bind(rows as i64)
                .fetch_all(&mut *self.tx)
                .await?
            }
            AverageWindow::Trailing { rows, max_age_secs } => {
                let max_age = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
                let cutoff = now.saturating_sub(max_age);
                sqlx::query_scalar(&format!(
                    "SELECT \"{column}\" FROM {TABLE} \
                     WHERE id < ? AND timestamp >= ? ORDER BY id DESC LIMIT ?"
                ))
                .bind(before_id)
                .bind(cutoff)
                .bind(rows as i64)
                .fetch_all(&mut *self.tx)
                .await?
            }
        };

        rows.into_iter()
            .map(|v| from_column(column, v))
            .collect()
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn to_column(name: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        OracleError::CorruptRecord(format!("{} value {} exceeds column range", name, value))
    })
}

fn from_column(name: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| OracleError::CorruptRecord(format!("negative {} value {}", name, value)))
}

fn row_to_record(row: &SqliteRow) -> Result<PricingRecord> {
    let mut values = AssetValues::zeroed();
    for ticker in Ticker::ALL {
        let raw: i64 = row.try_get(ticker.as_str())?;
        values.set(ticker, from_column(ticker.as_str(), raw)?);
    }

    let averages = MovingAverages {
        ma1: from_column("ma1", row.try_get("ma1")?)?,
        ma2: from_column("ma2", row.try_get("ma2")?)?,
        ma3: from_column("ma3", row.try_get("ma3")?)?,
    };

    let signature: Vec<u8> = row.try_get("signature")?;

    Ok(PricingRecord {
        id: row.try_get("id")?,
        values,
        averages,
        timestamp: row.try_get("timestamp")?,
        signature: SignatureCompact::from_slice(&signature)?,
    })
}
