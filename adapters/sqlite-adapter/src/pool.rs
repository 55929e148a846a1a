//! Pooled SQLite connections.
//!
//! Built on `r2d2` with an `r2d2_sqlite` manager. While a caller holds a
//! connection, a progress handler watches the caller's `CallContext` and
//! interrupts the running statement once it is cancelled or past its deadline.

use std::ops::Deref;
use std::os::raw::c_int;
use std::time::{Duration, Instant};

use domain::{CallContext, StorageErrorKind};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::trace;

use crate::config::SqliteConfig;

/// SQLite VM steps between two checks of the call context.
const PROGRESS_STEPS: c_int = 100;
/// A cancel token cannot wake a caller blocked in the pool, so waits are sliced.
const CANCEL_POLL: Duration = Duration::from_millis(20);
/// Lower bound on how long opening the pool may take to establish connections.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct ConnectionPool {
    inner: Pool<SqliteConnectionManager>,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Open `pool_size` connections up front. `pool_size` must be non-zero.
    pub(crate) fn open(config: &SqliteConfig) -> Result<Self, r2d2::Error> {
        let manager = if config.is_in_memory() {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.path)
        };
        let busy_timeout = config.busy_timeout;
        let wal = !config.is_in_memory();
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if wal {
                // WAL lets readers proceed while another connection writes.
                let mode: String =
                    conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
                trace!(journal_mode = %mode, "opened sqlite connection");
            }
            Ok(())
        });

        // Connections are never recycled: an in-memory database lives and
        // dies with its only connection.
        let inner = Pool::builder()
            .max_size(config.pool_size as u32)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(config.acquire_timeout.max(OPEN_TIMEOUT))
            .build(manager)?;
        Ok(Self {
            inner,
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Wait for a free connection, giving up when the context is interrupted
    /// or the pool's acquire timeout passes.
    pub(crate) fn acquire(&self, ctx: &CallContext) -> Result<PooledConnection, StorageErrorKind> {
        let give_up = Instant::now() + self.acquire_timeout;
        loop {
            ctx.check()?;
            let now = Instant::now();
            if now >= give_up {
                return Err(StorageErrorKind::PoolExhausted(self.acquire_timeout));
            }
            let wake = match ctx.deadline() {
                Some(d) => d.min(give_up),
                None => give_up,
            };
            let wait = wake.saturating_duration_since(now).min(CANCEL_POLL);
            match self.inner.get_timeout(wait) {
                Ok(conn) => {
                    let pooled = PooledConnection { conn };
                    pooled.watch(ctx);
                    return Ok(pooled);
                }
                Err(e) => trace!(error = %e, "no pooled connection free yet"),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.inner.state().idle_connections as usize
    }
}

/// A connection on loan from the pool; returned on drop.
pub(crate) struct PooledConnection {
    conn: r2d2::PooledConnection<SqliteConnectionManager>,
}

impl PooledConnection {
    fn watch(&self, ctx: &CallContext) {
        let token = ctx.cancel_token().clone();
        let deadline = ctx.deadline();
        self.conn.progress_handler(
            PROGRESS_STEPS,
            Some(move || {
                token.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
            }),
        );
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Drop the handler so it does not keep the finished call's token alive.
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}
