//! SQLite-backed aggregation repository.
//!
//! Two tables per repository: `<name>` holds active aggregates keyed by
//! correlation key, `<name>_completed` holds completed aggregates keyed by
//! exchange id. Each row stores the encoded exchange blob verbatim.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::codec::ExchangeCodec;
use crate::context::RuntimeContext;
use crate::error::RepositoryError;
use crate::exchange::{Exchange, AGGREGATED_CORRELATION_KEY};
use crate::options::CodecOptions;
use crate::value::Value;

use super::{AggregationRepository, Result};

pub struct SqliteAggregationRepository {
    conn: Mutex<Connection>,
    table: String,
    completed_table: String,
    context: Arc<RuntimeContext>,
    codec: ExchangeCodec,
}

impl SqliteAggregationRepository {
    pub fn open(
        path: impl AsRef<Path>,
        context: Arc<RuntimeContext>,
        options: &CodecOptions,
    ) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, context, options)
    }

    pub fn open_in_memory(context: Arc<RuntimeContext>, options: &CodecOptions) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, context, options)
    }

    fn with_connection(
        conn: Connection,
        context: Arc<RuntimeContext>,
        options: &CodecOptions,
    ) -> Result<Self> {
        let name = options.repository_name.as_str();
        // Table names are interpolated into SQL.
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(RepositoryError::InvalidName(name.to_string()));
        }

        let repo = Self {
            conn: Mutex::new(conn),
            table: name.to_string(),
            completed_table: format!("{name}_completed"),
            context,
            codec: ExchangeCodec::new(options.into()),
        };
        repo.create_tables()?;
        Ok(repo)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();
        for table in [&self.table, &self.completed_table] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    exchange BLOB NOT NULL,
                    version INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                )"
            ))?;
        }
        Ok(())
    }

    /// Number of times the aggregate under `key` has been written.
    pub fn version(&self, key: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let version = conn
            .query_row(
                &format!("SELECT version FROM {} WHERE id = ?1", self.table),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    fn load(&self, table: &str, id: &str) -> Result<Option<Exchange>> {
        let blob: Option<Vec<u8>> = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT exchange FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?
        };
        self.unmarshal(blob)
    }

    fn unmarshal(&self, blob: Option<Vec<u8>>) -> Result<Option<Exchange>> {
        match blob {
            Some(bytes) => Ok(Some(self.codec.unmarshal_exchange(&self.context, &bytes)?)),
            None => Ok(None),
        }
    }

    fn ids(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT id FROM {table} ORDER BY id"))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

impl AggregationRepository for SqliteAggregationRepository {
    fn add(&self, key: &str, exchange: &Exchange) -> Result<Option<Exchange>> {
        // Mirror the key so a stored blob identifies itself.
        let mut exchange = exchange.clone();
        exchange.set_property(AGGREGATED_CORRELATION_KEY, Value::from(key));
        let bytes = self.codec.marshal_exchange(&exchange)?;

        let previous = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let blob: Option<Vec<u8>> = tx
                .query_row(
                    &format!("SELECT exchange FROM {} WHERE id = ?1", self.table),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            // An undecodable previous row aborts the write and stays in place.
            let previous = self.unmarshal(blob)?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, exchange, version, updated_at)
                     VALUES (?1, ?2, 1, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                        exchange = excluded.exchange,
                        version = version + 1,
                        updated_at = excluded.updated_at",
                    self.table
                ),
                params![key, bytes, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            previous
        };

        debug!(
            repository = %self.table,
            key,
            exchange_id = %exchange.id,
            bytes = bytes.len(),
            "stored aggregate"
        );
        Ok(previous)
    }

    fn get(&self, key: &str) -> Result<Option<Exchange>> {
        self.load(&self.table, key)
    }

    fn remove(&self, key: &str, exchange: &Exchange) -> Result<()> {
        let bytes = self.codec.marshal_exchange(exchange)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (id, exchange, version, updated_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    exchange = excluded.exchange,
                    version = version + 1,
                    updated_at = excluded.updated_at",
                self.completed_table
            ),
            params![exchange.id, bytes, Utc::now().to_rfc3339()],
        )?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            params![key],
        )?;
        tx.commit()?;

        debug!(
            repository = %self.table,
            key,
            exchange_id = %exchange.id,
            "moved aggregate to completed"
        );
        Ok(())
    }

    fn confirm(&self, exchange_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.completed_table),
            params![exchange_id],
        )?;
        Ok(deleted > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ids(&self.table)
    }

    fn scan(&self) -> Result<Vec<String>> {
        self.ids(&self.completed_table)
    }

    fn recover(&self, exchange_id: &str) -> Result<Option<Exchange>> {
        self.load(&self.completed_table, exchange_id)
    }
}
