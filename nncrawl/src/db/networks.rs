//! Network table operations

use super::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::utils::retry_on_lock;
use chrono::Utc;
use nncrawl_common::db::models::Network;
use nncrawl_common::time::to_db_timestamp;
use nncrawl_common::Result;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Insert a network row if missing
///
/// A known `checksum` is stored when the row has none yet.
pub async fn upsert_network(pool: &SqlitePool, network_id: &str, checksum: Option<&str>) -> Result<()> {
    retry_on_lock("upsert network", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO networks (network_id, checksum) VALUES (?, ?)
            ON CONFLICT(network_id) DO UPDATE SET
                checksum = COALESCE(networks.checksum, excluded.checksum)
            "#,
        )
        .bind(network_id)
        .bind(checksum)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn get_network(pool: &SqlitePool, network_id: &str) -> Result<Option<Network>> {
    let row = sqlx::query(
        "SELECT network_id, local_path, checksum, downloaded_at FROM networks WHERE network_id = ?",
    )
    .bind(network_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Network {
        network_id: row.get("network_id"),
        local_path: row.get("local_path"),
        checksum: row.get("checksum"),
        downloaded_at: row.get("downloaded_at"),
    }))
}

/// Record where the weights of `network_id` were cached
///
/// The checksum is only written when none is stored; a seeded checksum is
/// never replaced.
pub async fn record_download(
    pool: &SqlitePool,
    network_id: &str,
    local_path: &Path,
    checksum: &str,
) -> Result<()> {
    let local_path = local_path.to_string_lossy().into_owned();
    let downloaded_at = to_db_timestamp(Utc::now());

    retry_on_lock("record download", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO networks (network_id, local_path, checksum, downloaded_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(network_id) DO UPDATE SET
                local_path = excluded.local_path,
                checksum = COALESCE(networks.checksum, excluded.checksum),
                downloaded_at = excluded.downloaded_at
            "#,
        )
        .bind(network_id)
        .bind(&local_path)
        .bind(checksum)
        .bind(&downloaded_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Record a cache hit for a network whose location was never recorded
///
/// Only missing values are filled in, so repeated hits never move
/// `downloaded_at`.
pub async fn record_cached(
    pool: &SqlitePool,
    network_id: &str,
    local_path: &Path,
    checksum: &str,
) -> Result<()> {
    let local_path = local_path.to_string_lossy().into_owned();
    let seen_at = to_db_timestamp(Utc::now());

    retry_on_lock("record cached network", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO networks (network_id, local_path, checksum, downloaded_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(network_id) DO UPDATE SET
                local_path = COALESCE(networks.local_path, excluded.local_path),
                checksum = COALESCE(networks.checksum, excluded.checksum),
                downloaded_at = COALESCE(networks.downloaded_at, excluded.downloaded_at)
            "#,
        )
        .bind(network_id)
        .bind(&local_path)
        .bind(checksum)
        .bind(&seen_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}
