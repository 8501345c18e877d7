//! Link rules and the global button rule.

use chrono::Utc;
use tracing::info;

use super::{ButtonMode, ButtonRule, ButtonSpec, Database, LinkRule, StorageError};

#[derive(sqlx::FromRow)]
struct ButtonRuleRow {
    mode: String,
    text1: Option<String>,
    url1: Option<String>,
    text2: Option<String>,
    url2: Option<String>,
    text3: Option<String>,
    url3: Option<String>,
}

impl ButtonRuleRow {
    fn into_rule(self) -> Result<ButtonRule, StorageError> {
        let mode: ButtonMode = self.mode.parse().map_err(|value| StorageError::InvalidValue {
            column: "button_rules.mode",
            value,
        })?;

        let buttons = [
            (self.text1, self.url1),
            (self.text2, self.url2),
            (self.text3, self.url3),
        ]
        .into_iter()
        .map(|(text, url)| ButtonSpec::new(text.unwrap_or_default(), url.unwrap_or_default()))
        .collect();

        Ok(ButtonRule { mode, buttons })
    }
}

impl Database {
    pub async fn add_link_rule(&self, pattern: &str, replacement: &str) -> Result<i64, StorageError> {
        let id = sqlx::query(
            "INSERT INTO link_rules (pattern, replacement, created_at) VALUES (?, ?, ?)",
        )
        .bind(pattern)
        .bind(replacement)
        .bind(Utc::now())
        .execute(self.pool())
        .await?
        .last_insert_rowid();

        info!("Added link rule {}: {}", id, pattern);
        Ok(id)
    }

    /// Returns whether a rule with this id existed.
    pub async fn remove_link_rule(&self, rule_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM link_rules WHERE id = ?")
            .bind(rule_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes every rule whose pattern equals `pattern`. Returns the count removed.
    pub async fn remove_link_rules_by_pattern(&self, pattern: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM link_rules WHERE pattern = ?")
            .bind(pattern)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Enabled rules in application order.
    pub async fn link_rules(&self) -> Result<Vec<LinkRule>, StorageError> {
        let rules = sqlx::query_as::<_, LinkRule>(
            "SELECT id, pattern, replacement, enabled FROM link_rules WHERE enabled = 1 ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rules)
    }

    /// Replaces the global button rule in one statement.
    pub async fn set_button_rule(&self, rule: &ButtonRule) -> Result<(), StorageError> {
        let slot = |i: usize| rule.buttons.get(i).cloned();
        let (b1, b2, b3) = (slot(0), slot(1), slot(2));

        sqlx::query(
            r"
            INSERT OR REPLACE INTO button_rules (id, mode, text1, url1, text2, url2, text3, url3)
            VALUES (1, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(rule.mode.as_str())
        .bind(b1.as_ref().map(|b| b.text.as_str()))
        .bind(b1.as_ref().map(|b| b.url.as_str()))
        .bind(b2.as_ref().map(|b| b.text.as_str()))
        .bind(b2.as_ref().map(|b| b.url.as_str()))
        .bind(b3.as_ref().map(|b| b.text.as_str()))
        .bind(b3.as_ref().map(|b| b.url.as_str()))
        .execute(self.pool())
        .await?;

        info!("Button rule set (mode: {}, buttons: {})", rule.mode, rule.buttons.len());
        Ok(())
    }

    pub async fn clear_button_rule(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM button_rules").execute(self.pool()).await?;
        Ok(())
    }

    pub async fn button_rule(&self) -> Result<Option<ButtonRule>, StorageError> {
        let row = sqlx::query_as::<_, ButtonRuleRow>(
            "SELECT mode, text1, url1, text2, url2, text3, url3 FROM button_rules WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await?;

        row.map(ButtonRuleRow::into_rule).transpose()
    }
}
