use crate::domain::market::Market;
use crate::domain::recovery::{CloseRecoveryTask, RecoveryStatus};
use crate::domain::repositories::RecoveryTaskRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

pub struct SqliteRecoveryTaskRepository {
    database: Database,
}

impl SqliteRecoveryTaskRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn write(&self, task: &CloseRecoveryTask, insert: bool) -> Result<()> {
        let query = if insert {
            r#"
            INSERT INTO recovery_tasks (
                id, strategy, position_id, market, target_quantity, entry_price,
                last_known_price, attempt_count, next_attempt_at, status, reason,
                last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#
        } else {
            r#"
            UPDATE recovery_tasks SET
                strategy = $2, position_id = $3, market = $4,
                target_quantity = $5, entry_price = $6, last_known_price = $7,
                attempt_count = $8, next_attempt_at = $9, status = $10,
                reason = $11, last_error = $12, created_at = $13, updated_at = $14
            WHERE id = $1
            "#
        };
        sqlx::query(query)
            .bind(&task.id)
            .bind(&task.strategy)
            .bind(&task.position_id)
            .bind(task.market.as_str())
            .bind(task.target_quantity.to_string())
            .bind(task.entry_price.to_string())
            .bind(task.last_known_price.to_string())
            .bind(task.attempt_count as i64)
            .bind(task.next_attempt_at.timestamp_millis())
            .bind(task.status.to_string())
            .bind(&task.reason)
            .bind(&task.last_error)
            .bind(task.created_at.timestamp_millis())
            .bind(task.updated_at.timestamp_millis())
            .execute(&self.database.pool)
            .await
            .context("Failed to write recovery task")?;
        Ok(())
    }
}

fn status_from_str(s: &str) -> Result<RecoveryStatus> {
    Ok(match s {
        "PENDING" => RecoveryStatus::Pending,
        "PROCESSING" => RecoveryStatus::Processing,
        "RETRYING" => RecoveryStatus::Retrying,
        "COMPLETED" => RecoveryStatus::Completed,
        other => bail!("unknown recovery status '{}'", other),
    })
}

fn row_to_task(row: &SqliteRow) -> Result<CloseRecoveryTask> {
    let market: String = row.get("market");
    let target_quantity: String = row.get("target_quantity");
    let entry_price: String = row.get("entry_price");
    let last_known_price: String = row.get("last_known_price");
    let status: String = row.get("status");
    let next_attempt_at: i64 = row.get("next_attempt_at");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");

    Ok(CloseRecoveryTask {
        id: row.get("id"),
        strategy: row.get("strategy"),
        position_id: row.get("position_id"),
        market: Market::parse(&market).map_err(anyhow::Error::from)?,
        target_quantity: Decimal::from_str(&target_quantity).unwrap_or_default(),
        entry_price: Decimal::from_str(&entry_price).unwrap_or_default(),
        last_known_price: Decimal::from_str(&last_known_price).unwrap_or_default(),
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        next_attempt_at: DateTime::from_timestamp_millis(next_attempt_at)
            .context("invalid next_attempt_at")?,
        status: status_from_str(&status)?,
        reason: row.get("reason"),
        last_error: row.get("last_error"),
        created_at: DateTime::from_timestamp_millis(created_at).context("invalid created_at")?,
        updated_at: DateTime::from_timestamp_millis(updated_at).context("invalid updated_at")?,
    })
}

#[async_trait]
impl RecoveryTaskRepository for SqliteRecoveryTaskRepository {
    async fn enqueue(&self, task: CloseRecoveryTask) -> Result<CloseRecoveryTask> {
        // Upsert on (strategy, position_id): refresh the active task in place
        // instead of stacking a duplicate.
        if let Some(mut existing) = self
            .find_active_by_position(&task.strategy, &task.position_id)
            .await?
        {
            existing.refresh(task.target_quantity, task.last_known_price, &task.reason);
            self.write(&existing, false).await?;
            return Ok(existing);
        }
        self.write(&task, true).await?;
        Ok(task)
    }

    async fn update(&self, task: &CloseRecoveryTask) -> Result<()> {
        self.write(task, false).await
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CloseRecoveryTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM recovery_tasks
            WHERE status IN ('PENDING', 'RETRYING') AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC
            LIMIT $2
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load due recovery tasks")?;
        rows.iter().map(row_to_task).collect()
    }

    async fn find_active_by_position(
        &self,
        strategy: &str,
        position_id: &str,
    ) -> Result<Option<CloseRecoveryTask>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM recovery_tasks
            WHERE strategy = $1 AND position_id = $2 AND status != 'COMPLETED'
            LIMIT 1
            "#,
        )
        .bind(strategy)
        .bind(position_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load active recovery task")?;
        row.as_ref().map(row_to_task).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn task(position_id: &str) -> CloseRecoveryTask {
        CloseRecoveryTask::new(
            "DCA",
            position_id,
            Market::parse("KRW-BTC").unwrap(),
            dec!(0.5),
            dec!(1000),
            dec!(990),
            "sell rejected",
        )
    }

    #[tokio::test]
    async fn test_enqueue_twice_keeps_one_active_task() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteRecoveryTaskRepository::new(db);

        let first = repo.enqueue(task("pos-1")).await.unwrap();
        let second = repo.enqueue(task("pos-1")).await.unwrap();
        assert_eq!(first.id, second.id);

        let due = repo.find_due(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_refreshes_terms() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteRecoveryTaskRepository::new(db);
        repo.enqueue(task("pos-1")).await.unwrap();

        let mut updated = task("pos-1");
        updated.target_quantity = dec!(0.3);
        updated.last_known_price = dec!(985);
        updated.reason = "second failure".to_string();
        let stored = repo.enqueue(updated).await.unwrap();
        assert_eq!(stored.target_quantity, dec!(0.3));
        assert_eq!(stored.reason, "second failure");
    }

    #[tokio::test]
    async fn test_completed_task_allows_new_enqueue() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteRecoveryTaskRepository::new(db);
        let mut stored = repo.enqueue(task("pos-1")).await.unwrap();
        stored.complete();
        repo.update(&stored).await.unwrap();

        let fresh = repo.enqueue(task("pos-1")).await.unwrap();
        assert_ne!(fresh.id, stored.id);
        assert_eq!(fresh.status, RecoveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_find_due_respects_backoff() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteRecoveryTaskRepository::new(db);
        let mut stored = repo.enqueue(task("pos-1")).await.unwrap();
        stored.record_failure(
            "boom",
            chrono::Duration::minutes(5),
            chrono::Duration::minutes(30),
        );
        repo.update(&stored).await.unwrap();

        assert!(repo.find_due(Utc::now(), 10).await.unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::minutes(6);
        assert_eq!(repo.find_due(later, 10).await.unwrap().len(), 1);
    }
}
