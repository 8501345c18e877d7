//! Per-user UI preferences.

use super::{Database, StorageError, UserSettings};

/// Language used when a user has not chosen one.
pub const DEFAULT_LANG: &str = "ru";

impl Database {
    pub async fn user_lang(&self, user_id: i64) -> Result<String, StorageError> {
        let settings = sqlx::query_as::<_, UserSettings>(
            "SELECT user_id, lang FROM user_settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(settings.map_or_else(|| DEFAULT_LANG.to_owned(), |s| s.lang))
    }

    pub async fn set_user_lang(&self, user_id: i64, lang: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO user_settings (user_id, lang) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET lang = excluded.lang
            ",
        )
        .bind(user_id)
        .bind(lang)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
