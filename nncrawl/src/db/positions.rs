//! Position table operations

use super::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::utils::retry_on_lock;
use nncrawl_common::db::models::Position;
use nncrawl_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Insert a position; an existing row with the same id is left untouched
pub async fn insert_position(pool: &SqlitePool, position: &Position) -> Result<()> {
    let metadata = position
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;

    retry_on_lock("insert position", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO positions (position_id, board_encoding, encoding, metadata)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&position.position_id)
        .bind(&position.board_encoding)
        .bind(position.encoding.as_str())
        .bind(&metadata)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn get_position(pool: &SqlitePool, position_id: &str) -> Result<Option<Position>> {
    let row = sqlx::query(
        "SELECT position_id, board_encoding, encoding, metadata FROM positions WHERE position_id = ?",
    )
    .bind(position_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let encoding: String = row.get("encoding");
    let metadata: Option<String> = row.get("metadata");
    let metadata = metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::InvalidInput(format!("Invalid metadata for position '{}': {}", position_id, e)))?;

    Ok(Some(Position {
        position_id: row.get("position_id"),
        board_encoding: row.get("board_encoding"),
        encoding: encoding.parse()?,
        metadata,
    }))
}
