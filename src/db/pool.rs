//! Async database connection pool implementation.
//!
//! Uses bb8 connection pool manager with diesel_async for PostgreSQL connections.
//! Every tenant gets its own pool, addressed by the tenant's storage locator.

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::Pool;

use crate::config::settings::StoreConfig;
use crate::tenants::StorageLocator;

/// Async connection pool type alias.
///
/// bb8::Pool internally uses Arc, so Clone is cheap (just reference count increment).
/// Structures holding AsyncDbPool can derive Clone without additional Arc wrapping.
pub type AsyncDbPool = Pool<AsyncPgConnection>;

/// Creates an async connection pool for one tenant database.
///
/// No connection is opened here: the pool connects on first use and keeps
/// retrying afterwards, so a database that is down at startup only fails the
/// calls made against it.
///
/// # Example
///
/// ```ignore
/// let pool = establish_async_connection_pool(&tenant.storage_locator, &settings.store);
/// let mut conn = pool.get().await?;
/// ```
pub fn establish_async_connection_pool(
    locator: &StorageLocator,
    config: &StoreConfig,
) -> AsyncDbPool {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(locator.to_conninfo());

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(config.connection_timeout())
        .build_unchecked(manager);

    tracing::debug!(
        locator = %locator,
        max_connections = config.max_connections,
        "Connection pool configured"
    );

    pool
}
