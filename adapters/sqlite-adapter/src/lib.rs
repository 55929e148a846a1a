//! sqlite-adapter: SQLite implementation of the OfferRepository port.
//!
//! Purpose
//! - Persist vendor offer lines in per-context tables (`buy`, `sell`, ...)
//!   that are created on demand.
//! - Implements the `OfferRepository` trait from the `domain` crate.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability and `hooks`
//!   for statement interruption. Connections are pooled with `r2d2`.
//! - Validation hooks run while no connection is borrowed, so a hook may
//!   query the store itself.
//! - Prices are stored as INTEGER hundredths so offer lines match exactly.
//! - Table names come from the validated `TableName` type; they are the only
//!   value interpolated into SQL text.
//! - Update and remove match on (vendorId, productName, price). Two callers
//!   updating the same line concurrently can lose an update; there is no
//!   version column.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use domain::{
    CallContext, OfferRecord, OfferRepository, OnCountUpdate, OnOfferAdd, OnPriceUpdate,
    Operation, Price, ProductName, StorageError, StorageErrorKind, TableName, ValidationError,
    VendorIdentity, VendorOffer,
};
use rusqlite::{params, Connection, ErrorCode, ToSql};
use tracing::{debug, trace, warn};

pub mod config;
mod pool;

pub use config::{ConfigError, SqliteConfig};

use pool::ConnectionPool;

/// Failure to open the database behind a store.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("creating database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("opening sqlite database {path}: {source}")]
    Pool {
        path: PathBuf,
        #[source]
        source: r2d2::Error,
    },
}

/// SQLite-backed offer store. Safe to share between threads; a call holds a
/// pooled connection only while it runs SQL.
pub struct SqliteOfferStore {
    pool: ConnectionPool,
    remember_tables: bool,
    provisioned: Mutex<HashSet<TableName>>,
}

impl SqliteOfferStore {
    /// Open (or create) a database at the given path with default settings.
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self, OpenError> {
        Self::open(&SqliteConfig::new(path))
    }

    /// Construct from `OFFER_DB_*` environment variables, see [`SqliteConfig`].
    pub fn from_env() -> Result<Self, OpenError> {
        let config = SqliteConfig::from_env()?;
        Self::open(&config)
    }

    pub fn open(config: &SqliteConfig) -> Result<Self, OpenError> {
        config.validate()?;
        let mut config = config.clone();
        if config.is_in_memory() && config.pool_size > 1 {
            warn!(
                pool_size = config.pool_size,
                "in-memory sqlite databases are per connection; using a single connection"
            );
            config.pool_size = 1;
        }
        if !config.is_in_memory() {
            // Ensure directory exists
            if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|source| OpenError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }
        let pool = ConnectionPool::open(&config).map_err(|source| OpenError::Pool {
            path: config.path.clone(),
            source,
        })?;
        debug!(
            path = %config.path.display(),
            pool_size = config.pool_size,
            remember_tables = config.remember_tables,
            "offer store opened"
        );
        Ok(Self {
            pool,
            remember_tables: config.remember_tables,
            provisioned: Mutex::new(HashSet::new()),
        })
    }

    /// Borrow a connection, provision the context's table and run `f`.
    fn execute<T, F>(&self, op: Operation, ctx: &CallContext, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageErrorKind>,
    {
        let outcome = ctx
            .check()
            .map_err(StorageErrorKind::from)
            .and_then(|()| self.pool.acquire(ctx))
            .and_then(|pooled| {
                let conn: &Connection = &pooled;
                self.ensure_table(conn, ctx)?;
                f(conn)
            });
        self.report(op, ctx, outcome)
    }

    /// Provision the context's table, run the caller's validation hook with
    /// no connection borrowed, then borrow one again to run `f`.
    fn execute_validated<T, V, F>(
        &self,
        op: Operation,
        ctx: &CallContext,
        validate: V,
        f: F,
    ) -> Result<T, StorageError>
    where
        V: FnOnce() -> Result<(), ValidationError>,
        F: FnOnce(&Connection) -> Result<T, StorageErrorKind>,
    {
        let outcome = ctx
            .check()
            .map_err(StorageErrorKind::from)
            .and_then(|()| self.provision(ctx))
            .and_then(|()| validate().map_err(StorageErrorKind::Validation))
            .and_then(|()| self.pool.acquire(ctx))
            .and_then(|pooled| {
                let conn: &Connection = &pooled;
                f(conn)
            });
        self.report(op, ctx, outcome)
    }

    fn report<T>(
        &self,
        op: Operation,
        ctx: &CallContext,
        outcome: Result<T, StorageErrorKind>,
    ) -> Result<T, StorageError> {
        outcome.map_err(|kind| {
            match &kind {
                StorageErrorKind::Validation(reason) => {
                    warn!(%op, table = %ctx.table(), %reason, "offer rejected by validation")
                }
                StorageErrorKind::Cancelled | StorageErrorKind::DeadlineExceeded => {
                    warn!(%op, table = %ctx.table(), %kind, "offer storage call interrupted")
                }
                _ => warn!(%op, table = %ctx.table(), error = %kind, "offer storage call failed"),
            }
            StorageError::new(op, kind)
        })
    }

    fn provision(&self, ctx: &CallContext) -> Result<(), StorageErrorKind> {
        if self.remember_tables && self.is_provisioned(ctx.table()) {
            return Ok(());
        }
        let pooled = self.pool.acquire(ctx)?;
        self.ensure_table(&pooled, ctx)
    }

    fn ensure_table(&self, conn: &Connection, ctx: &CallContext) -> Result<(), StorageErrorKind> {
        let table = ctx.table();
        if self.remember_tables && self.is_provisioned(table) {
            return Ok(());
        }
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vendorId TEXT NOT NULL,
                price INTEGER NOT NULL,
                productName TEXT NOT NULL,
                count INTEGER NOT NULL
            )"#
        );
        match conn.execute(&sql, []) {
            Ok(_) => {}
            // A concurrent first use created it between our check and write.
            Err(e) if is_already_exists(&e) => {}
            Err(e) if is_interrupt(&e) => return Err(interruption(ctx)),
            Err(e) => {
                return Err(StorageErrorKind::TableProvision {
                    table: table.to_string(),
                    message: e.to_string(),
                })
            }
        }
        trace!(%table, "offer table provisioned");
        if self.remember_tables {
            if let Ok(mut seen) = self.provisioned.lock() {
                seen.insert(table.clone());
            }
        }
        Ok(())
    }

    fn is_provisioned(&self, table: &TableName) -> bool {
        self.provisioned
            .lock()
            .map(|seen| seen.contains(table))
            .unwrap_or(false)
    }
}

fn is_already_exists(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("already exists"))
}

pub(crate) fn is_interrupt(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::OperationInterrupted)
}

/// Which of the context's signals fired; a statement is only interrupted by
/// the progress handler when one did.
fn interruption(ctx: &CallContext) -> StorageErrorKind {
    match ctx.check() {
        Err(i) => i.into(),
        Ok(()) => StorageErrorKind::Cancelled,
    }
}

fn classify(e: rusqlite::Error, ctx: &CallContext) -> StorageErrorKind {
    if is_interrupt(&e) {
        return interruption(ctx);
    }
    match e {
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidColumnName(_)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::FromSqlConversionFailure(..) => {
            StorageErrorKind::RowMapping(e.to_string())
        }
        other => StorageErrorKind::QueryExecution(other.to_string()),
    }
}

/// Run a mutating statement unless the context fired after the connection
/// was borrowed. Returns the number of rows changed.
fn mutate(
    conn: &Connection,
    ctx: &CallContext,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<usize, StorageErrorKind> {
    ctx.check()?;
    conn.execute(sql, params).map_err(|e| classify(e, ctx))
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<OfferRecord> {
    Ok(OfferRecord {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        price: row.get(2)?,
        product_name: row.get(3)?,
        count: row.get(4)?,
    })
}

fn list_where(
    conn: &Connection,
    ctx: &CallContext,
    column: &str,
    value: &str,
) -> Result<Vec<VendorOffer>, StorageErrorKind> {
    // Ties on price come back in insertion order.
    let sql = format!(
        r#"SELECT id, vendorId, price, productName, count FROM "{}"
           WHERE {column} = ?1 ORDER BY price ASC, id ASC"#,
        ctx.table()
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| classify(e, ctx))?;
    let rows = stmt
        .query_map(params![value], row_to_record)
        .map_err(|e| classify(e, ctx))?;
    let mut out = Vec::new();
    for row in rows {
        let record = row.map_err(|e| classify(e, ctx))?;
        let id = record.id;
        let offer = VendorOffer::try_from(record)
            .map_err(|e| StorageErrorKind::RowMapping(format!("row {id}: {e}")))?;
        out.push(offer);
    }
    Ok(out)
}

impl OfferRepository for SqliteOfferStore {
    fn add(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_add: &OnOfferAdd<'_>,
    ) -> Result<(), StorageError> {
        self.execute_validated(Operation::Add, ctx, || on_add(offer), |conn| {
            let sql = format!(
                r#"INSERT INTO "{}" (vendorId, price, productName, count) VALUES (?1, ?2, ?3, ?4)"#,
                ctx.table()
            );
            mutate(
                conn,
                ctx,
                &sql,
                params![
                    offer.vendor.as_str(),
                    offer.product.price.hundredths(),
                    offer.product.name.as_str(),
                    offer.count,
                ],
            )?;
            debug!(table = %ctx.table(), vendor = %offer.vendor, product = %offer.product.name, price = %offer.product.price, count = offer.count, "offer added");
            Ok(())
        })
    }

    fn remove(&self, ctx: &CallContext, offer: &VendorOffer) -> Result<(), StorageError> {
        self.execute(Operation::Remove, ctx, |conn| {
            let sql = format!(
                r#"DELETE FROM "{}" WHERE price = ?1 AND vendorId = ?2 AND productName = ?3"#,
                ctx.table()
            );
            let removed = mutate(
                conn,
                ctx,
                &sql,
                params![
                    offer.product.price.hundredths(),
                    offer.vendor.as_str(),
                    offer.product.name.as_str(),
                ],
            )?;
            debug!(table = %ctx.table(), vendor = %offer.vendor, product = %offer.product.name, removed, "offer removed");
            Ok(())
        })
    }

    fn update_price(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        new_price: Price,
        on_update_price: &OnPriceUpdate<'_>,
    ) -> Result<(), StorageError> {
        let validate = || on_update_price(new_price, &offer.vendor);
        self.execute_validated(Operation::UpdatePrice, ctx, validate, |conn| {
            let sql = format!(
                r#"UPDATE "{}" SET price = ?1 WHERE vendorId = ?2 AND productName = ?3 AND price = ?4"#,
                ctx.table()
            );
            let updated = mutate(
                conn,
                ctx,
                &sql,
                params![
                    new_price.hundredths(),
                    offer.vendor.as_str(),
                    offer.product.name.as_str(),
                    offer.product.price.hundredths(),
                ],
            )?;
            debug!(table = %ctx.table(), vendor = %offer.vendor, from = %offer.product.price, to = %new_price, updated, "offer repriced");
            Ok(())
        })
    }

    fn update_count(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_update_count: &OnCountUpdate<'_>,
    ) -> Result<(), StorageError> {
        let validate = || on_update_count(offer.count, &offer.vendor);
        self.execute_validated(Operation::UpdateCount, ctx, validate, |conn| {
            let sql = format!(
                r#"UPDATE "{}" SET count = ?1 WHERE vendorId = ?2 AND productName = ?3 AND price = ?4"#,
                ctx.table()
            );
            let updated = mutate(
                conn,
                ctx,
                &sql,
                params![
                    offer.count,
                    offer.vendor.as_str(),
                    offer.product.name.as_str(),
                    offer.product.price.hundredths(),
                ],
            )?;
            debug!(table = %ctx.table(), vendor = %offer.vendor, count = offer.count, updated, "offer count updated");
            Ok(())
        })
    }

    fn list_offers_by_name(
        &self,
        ctx: &CallContext,
        product_name: &ProductName,
    ) -> Result<Vec<VendorOffer>, StorageError> {
        self.execute(Operation::ListByName, ctx, |conn| {
            list_where(conn, ctx, "productName", product_name.as_str())
        })
    }

    fn list_offers_by_identity(
        &self,
        ctx: &CallContext,
        vendor: &VendorIdentity,
    ) -> Result<Vec<VendorOffer>, StorageError> {
        self.execute(Operation::ListByIdentity, ctx, |conn| {
            list_where(conn, ctx, "vendorId", vendor.as_str())
        })
    }
}
