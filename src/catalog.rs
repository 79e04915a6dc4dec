use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8Path;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use crate::domain::{AssemblyRecord, AssemblyRecordBuilder, FieldValue, RecordField};
use crate::error::GenomaError;

pub type FieldUpdate = (RecordField, FieldValue);

#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn open(path: &Utf8Path) -> Result<Self, GenomaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;",
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, GenomaError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, GenomaError> {
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<(), GenomaError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS assemblies (
                base_filename TEXT PRIMARY KEY,
                genus TEXT NOT NULL,
                species TEXT NOT NULL,
                intraspecific_name TEXT,
                assembly_id TEXT NOT NULL,
                version TEXT,
                source_database TEXT NOT NULL,
                sequence_remote_path TEXT,
                sequence_remote_size INTEGER,
                annotation_remote_path TEXT,
                annotation_remote_size INTEGER,
                base_filepath TEXT,
                taxonomy_id TEXT
            );
            CREATE INDEX IF NOT EXISTS assemblies_taxonomy_id ON assemblies(taxonomy_id);",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, GenomaError> {
        self.conn
            .lock()
            .map_err(|_| GenomaError::Catalog("catalog connection lock poisoned".to_string()))
    }

    /// Inserts a record or merges it into the stored one. Fields unset on
    /// `record` keep their stored values; a role's path and size move
    /// together. Returns the stored result.
    pub fn upsert(&self, record: &AssemblyRecord) -> Result<AssemblyRecord, GenomaError> {
        let key = record.key();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO assemblies (
                base_filename, genus, species, intraspecific_name, assembly_id, version,
                source_database, sequence_remote_path, sequence_remote_size,
                annotation_remote_path, annotation_remote_size, base_filepath, taxonomy_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(base_filename) DO UPDATE SET
                version = COALESCE(excluded.version, version),
                source_database = excluded.source_database,
                sequence_remote_size = CASE WHEN excluded.sequence_remote_path IS NULL
                    THEN sequence_remote_size ELSE excluded.sequence_remote_size END,
                sequence_remote_path = COALESCE(excluded.sequence_remote_path, sequence_remote_path),
                annotation_remote_size = CASE WHEN excluded.annotation_remote_path IS NULL
                    THEN annotation_remote_size ELSE excluded.annotation_remote_size END,
                annotation_remote_path = COALESCE(excluded.annotation_remote_path, annotation_remote_path),
                base_filepath = COALESCE(excluded.base_filepath, base_filepath),
                taxonomy_id = COALESCE(excluded.taxonomy_id, taxonomy_id)",
            params![
                key,
                record.genus,
                record.species,
                record.intraspecific_name,
                record.assembly_id,
                record.version,
                record.source_database.as_str(),
                record.sequence_remote_path,
                record.sequence_remote_size.map(|size| size as i64),
                record.annotation_remote_path,
                record.annotation_remote_size.map(|size| size as i64),
                record.base_filepath,
                record.taxonomy_id,
            ],
        )?;
        debug!(key = %key, "catalog upsert");
        Self::get_locked(&conn, &key)?
            .ok_or_else(|| GenomaError::Catalog(format!("record {key} vanished after upsert")))
    }

    pub fn get(&self, key: &str) -> Result<Option<AssemblyRecord>, GenomaError> {
        let conn = self.lock_conn()?;
        Self::get_locked(&conn, key)
    }

    fn get_locked(conn: &Connection, key: &str) -> Result<Option<AssemblyRecord>, GenomaError> {
        let sql = format!(
            "SELECT {} FROM assemblies WHERE base_filename = ?1",
            select_columns()
        );
        let row = conn
            .query_row(&sql, params![key], |row| Ok(row_values(row)))
            .optional()?;
        row.transpose()?.map(build_record).transpose()
    }

    pub fn query_all(&self) -> Result<Vec<AssemblyRecord>, GenomaError> {
        let sql = format!(
            "SELECT {} FROM assemblies ORDER BY base_filename",
            select_columns()
        );
        self.query(&sql, Vec::new())
    }

    /// Equality match on one field. `FieldValue::Null` matches unset fields.
    pub fn query_by(
        &self,
        field: RecordField,
        value: &FieldValue,
    ) -> Result<Vec<AssemblyRecord>, GenomaError> {
        if matches!(value, FieldValue::Null) {
            let sql = format!(
                "SELECT {} FROM assemblies WHERE {} IS NULL ORDER BY base_filename",
                select_columns(),
                field.column()
            );
            return self.query(&sql, Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM assemblies WHERE {} = ?1 ORDER BY base_filename",
            select_columns(),
            field.column()
        );
        self.query(&sql, vec![sql_value(value)])
    }

    fn query(&self, sql: &str, args: Vec<Value>) -> Result<Vec<AssemblyRecord>, GenomaError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| Ok(row_values(row)))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(build_record(row??)?);
        }
        Ok(records)
    }

    pub fn update_fields(&self, key: &str, updates: &[FieldUpdate]) -> Result<bool, GenomaError> {
        let conn = self.lock_conn()?;
        Self::update_locked(&conn, key, updates)
    }

    pub fn apply_updates(
        &self,
        batch: &[(String, Vec<FieldUpdate>)],
    ) -> Result<usize, GenomaError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut applied = 0;
        for (key, updates) in batch {
            if Self::update_locked(&tx, key, updates)? {
                applied += 1;
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    fn update_locked(
        conn: &Connection,
        key: &str,
        updates: &[FieldUpdate],
    ) -> Result<bool, GenomaError> {
        if updates.is_empty() {
            return Ok(Self::get_locked(conn, key)?.is_some());
        }
        let mut assignments = Vec::with_capacity(updates.len());
        let mut args = Vec::with_capacity(updates.len() + 1);
        for (idx, (field, value)) in updates.iter().enumerate() {
            if field.is_identity() {
                return Err(GenomaError::InvalidFieldValue {
                    field: field.column().to_string(),
                    value: "identity fields cannot be updated".to_string(),
                });
            }
            field.check(value)?;
            assignments.push(format!("{} = ?{}", field.column(), idx + 1));
            args.push(sql_value(value));
        }
        args.push(Value::Text(key.to_string()));
        let sql = format!(
            "UPDATE assemblies SET {} WHERE base_filename = ?{}",
            assignments.join(", "),
            args.len()
        );
        let changed = conn.execute(&sql, params_from_iter(args))?;
        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<usize, GenomaError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM assemblies", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn select_columns() -> String {
    RecordField::ALL
        .iter()
        .map(|field| field.column())
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_values(row: &Row<'_>) -> Result<Vec<Value>, GenomaError> {
    (0..RecordField::ALL.len())
        .map(|idx| row.get::<_, Value>(idx).map_err(GenomaError::from))
        .collect()
}

fn build_record(values: Vec<Value>) -> Result<AssemblyRecord, GenomaError> {
    RecordField::ALL
        .into_iter()
        .zip(values)
        .fold(AssemblyRecordBuilder::new(), |builder, (field, value)| {
            builder.set(field, field_value(value))
        })
        .build()
}

fn field_value(value: Value) -> FieldValue {
    match value {
        Value::Integer(value) => FieldValue::Integer(value.max(0) as u64),
        Value::Text(value) => FieldValue::Text(value),
        Value::Real(_) | Value::Blob(_) | Value::Null => FieldValue::Null,
    }
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Integer(value) => Value::Integer(*value as i64),
        FieldValue::Text(value) => Value::Text(value.clone()),
        FieldValue::Null => Value::Null,
    }
}
