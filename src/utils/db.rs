use std::future::Future;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::OnceCell;
use anyhow::{anyhow, Error};

use crate::utils::config::get_config;

/// Owns the connection pool, runs schema migrations, and hands out the
/// transactional helper every writer in the crate goes through (spec
/// §4.1/§9 "executor"). `&SqlitePool` and `&mut SqliteConnection` (i.e. an
/// in-flight `Transaction`) both implement `sqlx::Executor`, which is the
/// polymorphism spec.md asks for without a hand-rolled trait: every write
/// function in `repository`/`services` is generic over `E: Executor<'e,
/// Database = Sqlite>` and is callable with either handle.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Schema migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl Store {
    /// Opens (creating if absent) the sqlite file at `db_url` and runs
    /// pending migrations. A schema mismatch here is fatal per spec §4.1.
    ///
    /// `PRAGMA foreign_keys` is off by default per SQLite connection, so it
    /// is turned on explicitly here — without it `download_files`' `ON
    /// DELETE CASCADE` (spec §6.5) would silently not fire.
    pub async fn open(db_url: &str) -> Result<Self, StoreError> {
        // An unnamed `:memory:` database is private to the connection that
        // created it, so a pool of more than one connection would each see
        // a different empty database. Cap the pool at one connection for
        // in-memory urls; file-backed urls keep the wider pool.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Begins a transaction, runs `f` with the in-flight transaction as
    /// executor, commits on `Ok`, and rolls back (by dropping the
    /// transaction) on `Err` or on panic unwind, per spec §4.1.
    pub async fn transaction<'a, F, Fut, T, E>(&'a self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'a, Sqlite>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        let result = f(&mut tx).await;

        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                // Dropping `tx` here rolls back; explicit for readability.
                tx.rollback().await.ok();
                Err(err)
            }
        }
    }
}

pub async fn get_application_store() -> Result<&'static Store, Error> {
    static STORE_INSTANCE: OnceCell<Result<Store, String>> = OnceCell::const_new();

    let result = STORE_INSTANCE
        .get_or_init(|| async {
            let config = match get_config() {
                Ok(config) => config,
                Err(err) => return Err(err.to_string()),
            };

            let db_path = match config.database.path.to_str() {
                Some(path) => path,
                None => return Err("Failed to parse the configured DB path into a string!".to_string()),
            };

            let db_url = format!("sqlite:{}?mode=rwc", db_path);

            match Store::open(&db_url).await {
                Ok(store) => Ok(store),
                Err(e) => Err(e.to_string()),
            }
        })
        .await;

    match result {
        Ok(store) => Ok(store),
        Err(msg) => Err(anyhow!("{}", msg)),
    }
}
