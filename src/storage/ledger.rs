//! Dedup ledger: which donor messages have already been handled.

use tracing::{debug, info};

use super::{Database, StorageError};

impl Database {
    pub async fn is_processed(&self, channel_id: &str, message_id: i32) -> Result<bool, StorageError> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM processed_messages WHERE channel_id = ? AND message_id = ?",
        )
        .bind(channel_id)
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    /// Records a message as handled. Inserting the same pair twice is a no-op.
    pub async fn mark_processed(&self, channel_id: &str, message_id: i32) -> Result<(), StorageError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_messages (channel_id, message_id) VALUES (?, ?)",
        )
        .bind(channel_id)
        .bind(message_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!("Message {} in {} was already marked", message_id, channel_id);
        }
        Ok(())
    }

    /// Clears the donor's ledger and zeroes the pair's counter so the
    /// channel can be scraped again.
    pub async fn reset_progress(&self, pair_id: i64) -> Result<String, StorageError> {
        let pair = self
            .get_pair(pair_id)
            .await?
            .ok_or(StorageError::PairNotFound(pair_id))?;

        let mut tx = self.pool().begin().await?;
        let removed = sqlx::query("DELETE FROM processed_messages WHERE channel_id = ?")
            .bind(&pair.donor_channel)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("UPDATE statistics SET posts_cloned = 0, last_cloned_at = NULL WHERE pair_id = ?")
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            "Reset progress for pair {} ({}): {} ledger entries removed",
            pair_id, pair.donor_channel, removed
        );
        Ok(pair.donor_channel)
    }

    #[cfg(test)]
    pub(crate) async fn processed_count(&self, channel_id: &str) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM processed_messages WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}
