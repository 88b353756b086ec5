use crate::error::{Result, StoreError};
use crate::schema;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A bounded set of SQLite connections.
///
/// At most `max_connections` queries run at once, each on the blocking pool.
/// Connections are opened lazily and returned to the idle list after use; one
/// that was in flight when its task panicked is simply dropped.
pub(crate) struct ConnectionPool {
    path: PathBuf,
    busy_timeout: Duration,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Connection>>>,
}

impl ConnectionPool {
    pub(crate) fn open(path: PathBuf, max_connections: usize, busy_timeout: Duration) -> Result<Self> {
        if max_connections == 0 {
            return Err(StoreError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("create {}: {e}", parent.display()))
            })?;
        }

        let first = Connection::open(&path)?;
        schema::configure(&first, busy_timeout)?;
        schema::migrate(&first)?;

        Ok(Self {
            path,
            busy_timeout,
            permits: Arc::new(Semaphore::new(max_connections)),
            idle: Arc::new(Mutex::new(vec![first])),
        })
    }

    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        let idle = Arc::clone(&self.idle);
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let pooled = idle
                .lock()
                .map_err(|_| StoreError::Pool("idle list poisoned".to_string()))?
                .pop();
            let mut conn = match pooled {
                Some(conn) => conn,
                None => {
                    let conn = Connection::open(&path)?;
                    schema::configure(&conn, busy_timeout)?;
                    conn
                }
            };
            let out = f(&mut conn);
            if let Ok(mut guard) = idle.lock() {
                guard.push(conn);
            }
            out
        })
        .await?
    }
}
