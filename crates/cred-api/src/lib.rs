pub mod auth;
pub mod error;
pub mod friendships;
pub mod middleware;
pub mod router;
pub mod service;
pub mod users;

use cred_db::Database;
use tracing::error;

use crate::auth::AppState;
use crate::error::AppError;

pub use router::router;

/// Runs blocking database work off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Database) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            AppError::Internal(format!("spawn_blocking join error: {}", e))
        })?
}
