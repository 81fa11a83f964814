pub mod models;
pub mod test_utils;

#[cfg(test)]
mod tests;

use sea_orm::{Database, DatabaseConnection, DbErr};

/// Connect to one tenant's database.
///
/// The path is always passed in explicitly: every tenant owns its own
/// database file and nothing in this crate reads ambient configuration.
/// If it's already a DSN, use it as-is; otherwise treat it as a SQLite
/// file path. A missing file is a connection error, not a silent create.
pub async fn connect(path_or_url: &str) -> Result<DatabaseConnection, DbErr> {
    let url = if path_or_url.starts_with("sqlite:")
        || path_or_url.starts_with("postgres://")
        || path_or_url.starts_with("mysql://")
    {
        path_or_url.to_owned()
    } else {
        format!("sqlite://{path_or_url}")
    };

    Database::connect(&url).await
}
