//! Replication store
//!
//! Row-level access to one collection table, scoped by owner. Table and
//! column names come from the static registry, never from clients.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use crate::collections::{
    CollectionConfig, CHANGE_TIME_COLUMN, OWNER_COLUMN, TOMBSTONE_COLUMN,
};
use crate::error::Result;
use crate::models::{Checkpoint, StoredRow};

/// Storage operations the pull and push handlers need
pub trait ReplicationStore {
    /// Registry entry of the collection this store reads and writes
    fn config(&self) -> &'static CollectionConfig;

    /// Current row for `(owner, identity)`, tombstoned or not
    fn find(&self, owner: &str, identity: &str) -> Result<Option<StoredRow>>;

    /// Rows strictly after `checkpoint` in `(change_time, identity)` order
    fn changes_since(
        &self,
        owner: &str,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<StoredRow>>;

    /// Highest change time recorded for the owner in this collection
    fn latest_change_time(&self, owner: &str) -> Result<Option<i64>>;

    /// Insert or overwrite the row keyed by `(owner, identity)`
    fn upsert(&self, row: &StoredRow) -> Result<()>;

    /// Mark a row deleted at `change_time`; returns whether a row matched
    fn tombstone(&self, owner: &str, identity: &str, change_time: i64) -> Result<bool>;
}

/// `SQLite` implementation of `ReplicationStore`
///
/// Works on a plain connection or, through deref, on an open transaction.
pub struct SqliteReplicationStore<'a> {
    conn: &'a Connection,
    config: &'static CollectionConfig,
}

impl<'a> SqliteReplicationStore<'a> {
    /// Create a store for `config` over the given connection
    pub const fn new(conn: &'a Connection, config: &'static CollectionConfig) -> Self {
        Self { conn, config }
    }

    /// Column list shared by every SELECT; `parse_row` relies on this order
    fn select_columns(&self) -> String {
        let mut columns = vec![
            self.config.identity.column(),
            OWNER_COLUMN,
            CHANGE_TIME_COLUMN,
            TOMBSTONE_COLUMN,
        ];
        columns.extend(self.config.fields.iter().map(|field| field.name));
        columns.join(", ")
    }

    fn order_by(&self) -> String {
        self.config
            .order_by
            .iter()
            .map(|column| format!("{column} ASC"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn parse_row(config: &'static CollectionConfig, row: &Row<'_>) -> rusqlite::Result<StoredRow> {
        let mut fields = Vec::with_capacity(config.fields.len());
        for (offset, field) in config.fields.iter().enumerate() {
            fields.push((field.name, row.get::<_, SqlValue>(4 + offset)?));
        }

        Ok(StoredRow {
            identity: row.get(0)?,
            owner: row.get(1)?,
            change_time: row.get(2)?,
            is_deleted: row.get::<_, i64>(3)? != 0,
            fields,
        })
    }
}

impl ReplicationStore for SqliteReplicationStore<'_> {
    fn config(&self) -> &'static CollectionConfig {
        self.config
    }

    fn find(&self, owner: &str, identity: &str) -> Result<Option<StoredRow>> {
        let config = self.config;
        let sql = format!(
            "SELECT {} FROM {} WHERE {OWNER_COLUMN} = ?1 AND {} = ?2",
            self.select_columns(),
            config.table,
            config.identity.column(),
        );

        let row = self
            .conn
            .query_row(&sql, params![owner, identity], |row| {
                Self::parse_row(config, row)
            })
            .optional()?;
        Ok(row)
    }

    fn changes_since(
        &self,
        owner: &str,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<StoredRow>> {
        let config = self.config;
        let identity = config.identity.column();
        let columns = self.select_columns();
        let order_by = self.order_by();
        // SQLite treats a negative LIMIT as unbounded
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = if let Some(checkpoint) = checkpoint {
            let sql = format!(
                "SELECT {columns} FROM {table}
                 WHERE {OWNER_COLUMN} = ?1
                   AND ({CHANGE_TIME_COLUMN} > ?2
                        OR ({CHANGE_TIME_COLUMN} = ?2 AND {identity} > ?3))
                 ORDER BY {order_by}
                 LIMIT ?4",
                table = config.table,
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        owner,
                        checkpoint.change_time,
                        checkpoint.identity,
                        sql_limit
                    ],
                    |row| Self::parse_row(config, row),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        } else {
            let sql = format!(
                "SELECT {columns} FROM {table}
                 WHERE {OWNER_COLUMN} = ?1
                 ORDER BY {order_by}
                 LIMIT ?2",
                table = config.table,
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![owner, sql_limit], |row| {
                    Self::parse_row(config, row)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Ok(rows)
    }

    fn latest_change_time(&self, owner: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX({CHANGE_TIME_COLUMN}) FROM {} WHERE {OWNER_COLUMN} = ?1",
            self.config.table
        );
        let latest = self
            .conn
            .query_row(&sql, params![owner], |row| row.get::<_, Option<i64>>(0))?;
        Ok(latest)
    }

    fn upsert(&self, row: &StoredRow) -> Result<()> {
        let config = self.config;
        let mut columns = vec![OWNER_COLUMN, config.identity.column()];
        columns.extend(row.fields.iter().map(|(name, _)| *name));
        columns.extend([CHANGE_TIME_COLUMN, TOMBSTONE_COLUMN]);

        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .skip(2)
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders})
             ON CONFLICT ({target}) DO UPDATE SET {updates}",
            table = config.table,
            columns = columns.join(", "),
            target = config.conflict_target().join(", "),
        );

        let mut values = vec![
            SqlValue::Text(row.owner.clone()),
            SqlValue::Text(row.identity.clone()),
        ];
        values.extend(row.fields.iter().map(|(_, value)| value.clone()));
        values.extend([
            SqlValue::Integer(row.change_time),
            SqlValue::Integer(i64::from(row.is_deleted)),
        ]);

        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn tombstone(&self, owner: &str, identity: &str, change_time: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET {TOMBSTONE_COLUMN} = 1, {CHANGE_TIME_COLUMN} = ?1
             WHERE {OWNER_COLUMN} = ?2 AND {} = ?3",
            self.config.table,
            self.config.identity.column(),
        );
        let rows = self
            .conn
            .execute(&sql, params![change_time, owner, identity])?;
        Ok(rows > 0)
    }
}

/// Whether an error is a uniqueness/primary-key violation, i.e. another
/// writer claimed the same `(owner, identity)` first.
pub fn is_identity_violation(error: &crate::Error) -> bool {
    matches!(
        error,
        crate::Error::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::ConstraintViolation
    )
}
