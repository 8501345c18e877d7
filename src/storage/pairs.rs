//! Channel pair registry and per-pair statistics.

use chrono::Utc;
use tracing::info;

use super::{ChannelPair, Database, PairStats, StorageError};

const PAIR_COLUMNS: &str =
    "id, donor_channel, target_channel, enabled, realtime_enabled, created_at";

impl Database {
    /// Adds a pair and its zeroed statistics row. Returns the new pair id.
    pub async fn add_pair(&self, donor_channel: &str, target_channel: &str) -> Result<i64, StorageError> {
        let mut tx = self.pool().begin().await?;

        let pair_id = sqlx::query(
            "INSERT INTO channel_pairs (donor_channel, target_channel, created_at) VALUES (?, ?, ?)",
        )
        .bind(donor_channel)
        .bind(target_channel)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("INSERT INTO statistics (pair_id, posts_cloned) VALUES (?, 0)")
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Added pair {}: {} -> {}", pair_id, donor_channel, target_channel);
        Ok(pair_id)
    }

    /// Removes a pair together with its statistics and the donor's ledger entries.
    ///
    /// Returns the removed pair, or `None` if it did not exist.
    pub async fn remove_pair(&self, pair_id: i64) -> Result<Option<ChannelPair>, StorageError> {
        let Some(pair) = self.get_pair(pair_id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM statistics WHERE pair_id = ?")
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM channel_pairs WHERE id = ?")
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM processed_messages WHERE channel_id = ?")
            .bind(&pair.donor_channel)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Removed pair {} ({})", pair_id, pair.donor_channel);
        Ok(Some(pair))
    }

    pub async fn get_pair(&self, pair_id: i64) -> Result<Option<ChannelPair>, StorageError> {
        let pair = sqlx::query_as::<_, ChannelPair>(&format!(
            "SELECT {PAIR_COLUMNS} FROM channel_pairs WHERE id = ?"
        ))
        .bind(pair_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(pair)
    }

    /// All pairs, enabled or not, ordered by id.
    pub async fn list_pairs(&self) -> Result<Vec<ChannelPair>, StorageError> {
        let pairs = sqlx::query_as::<_, ChannelPair>(&format!(
            "SELECT {PAIR_COLUMNS} FROM channel_pairs ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(pairs)
    }

    /// Enabled pairs that take part in realtime monitoring.
    pub async fn realtime_pairs(&self) -> Result<Vec<ChannelPair>, StorageError> {
        let pairs = sqlx::query_as::<_, ChannelPair>(&format!(
            "SELECT {PAIR_COLUMNS} FROM channel_pairs \
             WHERE enabled = 1 AND realtime_enabled = 1 ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(pairs)
    }

    pub async fn set_realtime(&self, pair_id: i64, enabled: bool) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE channel_pairs SET realtime_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(pair_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::PairNotFound(pair_id));
        }
        Ok(())
    }

    pub async fn set_enabled(&self, pair_id: i64, enabled: bool) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE channel_pairs SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(pair_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::PairNotFound(pair_id));
        }
        Ok(())
    }

    /// Bumps the clone counter for a pair after a successful send.
    pub async fn increment_stats(&self, pair_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE statistics SET posts_cloned = posts_cloned + 1, last_cloned_at = ? WHERE pair_id = ?",
        )
        .bind(Utc::now())
        .bind(pair_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Statistics for enabled pairs.
    pub async fn statistics(&self) -> Result<Vec<PairStats>, StorageError> {
        let stats = sqlx::query_as::<_, PairStats>(
            r"
            SELECT
                cp.id AS pair_id,
                cp.donor_channel,
                cp.target_channel,
                COALESCE(s.posts_cloned, 0) AS posts_cloned,
                s.last_cloned_at
            FROM channel_pairs cp
            LEFT JOIN statistics s ON cp.id = s.pair_id
            WHERE cp.enabled = 1
            ORDER BY cp.id
            ",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::temp_db;

    #[tokio::test]
    async fn test_add_pair_creates_zeroed_stats() {
        let (db, _dir) = temp_db().await;
        let id = db.add_pair("@donor", "@target").await.unwrap();

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].pair_id, id);
        assert_eq!(stats[0].posts_cloned, 0);
        assert!(stats[0].last_cloned_at.is_none());

        let pair = db.get_pair(id).await.unwrap().unwrap();
        assert!(pair.enabled);
        assert!(pair.realtime_enabled);
    }

    #[tokio::test]
    async fn test_increment_stats() {
        let (db, _dir) = temp_db().await;
        let id = db.add_pair("@donor", "@target").await.unwrap();

        db.increment_stats(id).await.unwrap();
        db.increment_stats(id).await.unwrap();

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats[0].posts_cloned, 2);
        assert!(stats[0].last_cloned_at.is_some());
    }

    #[tokio::test]
    async fn test_remove_pair_purges_stats_and_ledger() {
        let (db, _dir) = temp_db().await;
        let id = db.add_pair("@donor", "@target").await.unwrap();
        let other = db.add_pair("@other", "@target").await.unwrap();
        db.mark_processed("@donor", 10).await.unwrap();
        db.mark_processed("@other", 10).await.unwrap();
        db.increment_stats(id).await.unwrap();

        let removed = db.remove_pair(id).await.unwrap().unwrap();
        assert_eq!(removed.donor_channel, "@donor");

        assert!(db.get_pair(id).await.unwrap().is_none());
        assert!(!db.is_processed("@donor", 10).await.unwrap());
        assert!(db.is_processed("@other", 10).await.unwrap());
        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].pair_id, other);

        // Same donor re-added starts from a clean ledger.
        let readded = db.add_pair("@donor", "@target").await.unwrap();
        assert_ne!(readded, id);
        assert!(!db.is_processed("@donor", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_pair() {
        let (db, _dir) = temp_db().await;
        assert!(db.remove_pair(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_realtime_pairs_respects_flags() {
        let (db, _dir) = temp_db().await;
        let a = db.add_pair("@a", "@t").await.unwrap();
        let b = db.add_pair("@b", "@t").await.unwrap();
        let c = db.add_pair("@c", "@t").await.unwrap();

        db.set_realtime(b, false).await.unwrap();
        db.set_enabled(c, false).await.unwrap();

        let ids: Vec<i64> = db.realtime_pairs().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a]);
        assert!(db.set_realtime(404, true).await.is_err());
    }
}
