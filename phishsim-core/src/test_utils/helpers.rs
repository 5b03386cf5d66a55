// File: phishsim-core/src/test_utils/helpers.rs

use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, Pool, Postgres};

use crate::db::Database;
use crate::Error;

/// Create the test database if it does not exist yet.
pub async fn ensure_test_database_exists() -> Result<(), Error> {
    let admin_url = std::env::var("DATABASE_ADMIN_URL")
        .unwrap_or_else(|_| "postgres://phishsim@localhost/postgres".to_string());

    let mut conn = PgConnection::connect(&admin_url).await?;

    let test_db = "phishsim_test";
    let create_db_sql = format!("CREATE DATABASE {test_db};");
    match sqlx::query(&create_db_sql).execute(&mut conn).await {
        Ok(_) => {}
        Err(e) => {
            // 42P04 => duplicate_database; anything else is real
            let dup = e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| code == "42P04")
                .unwrap_or(false);
            if !dup {
                return Err(Error::Database(e));
            }
        }
    }

    Ok(())
}

/// Create a connection pool to the test DB. Looks for `TEST_DATABASE_URL`
/// in env, else uses a local default.
pub async fn create_test_db_pool() -> Result<Pool<Postgres>, Error> {
    let url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://phishsim@localhost/phishsim_test".to_string());

    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
    Ok(pool)
}

/// Fresh, migrated, empty test database.
pub async fn setup_test_database() -> Result<Database, Error> {
    ensure_test_database_exists().await?;
    let pool = create_test_db_pool().await?;
    let db = Database::from_pool(pool);
    db.migrate().await?;
    clean_database(&db).await?;
    Ok(db)
}

/// Truncate all engine tables between tests.
pub async fn clean_database(db: &Database) -> Result<(), Error> {
    sqlx::query(
        "TRUNCATE TABLE risk_scores, phishing_results, phishing_campaigns, phishing_templates CASCADE;",
    )
    .execute(db.pool())
    .await?;
    Ok(())
}
