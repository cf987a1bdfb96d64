//! Exec command implementation.

use s3lite_core::Database;
use tracing::info;

/// Runs a script against the shared database.
pub async fn run(db: &Database, sql: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!(key = %db.address().key, "executing script");
    db.exec(sql).await?;
    println!("✓ Script executed and pushed");
    Ok(())
}
