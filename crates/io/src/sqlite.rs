// Durable record store using SQLite

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use unirecon_core::{CanonicalRecord, Row, Value};
use unirecon_recon::{BatchId, BatchInfo, RecordStore, ReconError, SourceBatch};

use crate::error::IoError;
use crate::STORE_SCHEMA_VERSION;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    definition TEXT NOT NULL,
    source TEXT NOT NULL,
    label TEXT NOT NULL,
    ingested_at TEXT NOT NULL          -- RFC 3339, UTC
);

CREATE INDEX IF NOT EXISTS batches_latest ON batches (definition, source, id);

CREATE TABLE IF NOT EXISTS records (
    batch_id INTEGER NOT NULL REFERENCES batches (id),
    seq INTEGER NOT NULL,              -- ingestion order within the batch
    canonical_key TEXT NOT NULL,
    payload TEXT NOT NULL,             -- JSON, see StoredValue
    PRIMARY KEY (batch_id, seq)
);
"#;

/// Value with its variant recorded, so a record reads back exactly as staged.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum StoredValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
}

impl From<&Value> for StoredValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => StoredValue::Null,
            Value::Text(s) => StoredValue::Text(s.clone()),
            Value::Integer(i) => StoredValue::Integer(*i),
            Value::Decimal(d) => StoredValue::Decimal(*d),
            Value::Bool(b) => StoredValue::Bool(*b),
            Value::Date(d) => StoredValue::Date(*d),
            Value::DateTime(dt) => StoredValue::DateTime(*dt),
            Value::Timestamp(ts) => StoredValue::Timestamp(*ts),
        }
    }
}

impl From<StoredValue> for Value {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Null => Value::Null,
            StoredValue::Text(s) => Value::Text(s),
            StoredValue::Integer(i) => Value::Integer(i),
            StoredValue::Decimal(d) => Value::Decimal(d),
            StoredValue::Bool(b) => Value::Bool(b),
            StoredValue::Date(d) => Value::Date(d),
            StoredValue::DateTime(dt) => Value::DateTime(dt),
            StoredValue::Timestamp(ts) => Value::Timestamp(ts),
        }
    }
}

fn encode_payload(row: &Row) -> Result<String, IoError> {
    let fields: Vec<(&str, StoredValue)> = row.iter().map(|(c, v)| (c, StoredValue::from(v))).collect();
    Ok(serde_json::to_string(&fields)?)
}

fn decode_payload(payload: &str) -> Result<Row, IoError> {
    let fields: Vec<(String, StoredValue)> = serde_json::from_str(payload)?;
    Ok(fields.into_iter().map(|(c, v)| (c, Value::from(v))).collect())
}

/// Canonical batches in a SQLite file. Reads of several sources happen
/// inside one transaction, so they observe a single snapshot.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self, IoError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, IoError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IoError> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version > STORE_SCHEMA_VERSION {
            return Err(IoError::Format(format!(
                "record store schema version {version} is newer than supported version {STORE_SCHEMA_VERSION}"
            )));
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", STORE_SCHEMA_VERSION)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn read_latest(&self, definition: &str, sources: &[String]) -> Result<HashMap<String, SourceBatch>, IoError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let mut latest = HashMap::new();
        {
            let mut find_batch = tx.prepare(
                "SELECT id, label, ingested_at FROM batches WHERE definition = ?1 AND source = ?2 ORDER BY id DESC LIMIT 1",
            )?;
            let mut read_records =
                tx.prepare("SELECT canonical_key, payload FROM records WHERE batch_id = ?1 ORDER BY seq")?;

            for source in sources {
                let found = find_batch
                    .query_row(params![definition, source], |r| {
                        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
                    })
                    .optional()?;
                let Some((id, label, ingested_at)) = found else {
                    continue;
                };
                let ingested_at = DateTime::parse_from_rfc3339(&ingested_at)
                    .map_err(|e| IoError::Format(format!("batch {id}: bad ingested_at '{ingested_at}': {e}")))?
                    .with_timezone(&Utc);

                let mut records = Vec::new();
                let mut rows = read_records.query(params![id])?;
                while let Some(r) = rows.next()? {
                    let key: String = r.get(0)?;
                    let payload: String = r.get(1)?;
                    records.push(CanonicalRecord::new(key, decode_payload(&payload)?));
                }
                latest.insert(source.clone(), SourceBatch { info: BatchInfo { id, label, ingested_at }, records });
            }
        }
        tx.commit()?;
        Ok(latest)
    }

    fn write_batch(
        &self,
        definition: &str,
        source: &str,
        label: &str,
        records: &[CanonicalRecord],
    ) -> Result<BatchId, IoError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO batches (definition, source, label, ingested_at) VALUES (?1, ?2, ?3, ?4)",
            params![definition, source, label, Utc::now().to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt =
                tx.prepare("INSERT INTO records (batch_id, seq, canonical_key, payload) VALUES (?1, ?2, ?3, ?4)")?;
            for (seq, record) in records.iter().enumerate() {
                stmt.execute(params![id, seq as i64, record.canonical_key, encode_payload(&record.fields)?])?;
            }
        }
        tx.commit()?;
        log::debug!("stored batch {id} ({} records) for {definition}/{source}", records.len());
        Ok(id)
    }
}

impl RecordStore for SqliteRecordStore {
    fn latest_batches(&self, definition: &str, sources: &[String]) -> Result<HashMap<String, SourceBatch>, ReconError> {
        Ok(self.read_latest(definition, sources)?)
    }

    fn ingest(
        &self,
        definition: &str,
        source: &str,
        label: &str,
        records: Vec<CanonicalRecord>,
    ) -> Result<BatchId, ReconError> {
        Ok(self.write_batch(definition, source, label, &records)?)
    }
}
