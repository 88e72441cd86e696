pub mod models;
pub mod store;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use models::{
    ActionLogEntry, Conversation, Direction, EngagementRecord, FollowUp, FollowUpStatus, Goal,
    GoalStatus, GoalType, Message, NewEngagement, NewFollowUp, Page,
};
pub use store::Store;

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        // Each statement is sent separately (Postgres doesn't allow
        // multiple commands in a single prepared statement).

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS pages (
                page_id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                access_token TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS conversations (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                page_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                participant_name TEXT,
                ai_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                human_takeover BOOLEAN NOT NULL DEFAULT FALSE,
                takeover_until TIMESTAMPTZ,
                opt_out BOOLEAN NOT NULL DEFAULT FALSE,
                cooldown_until TIMESTAMPTZ,
                last_message_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (page_id, participant_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                direction TEXT NOT NULL,
                text TEXT NOT NULL,
                mid TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS conversation_goals (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                goal_type TEXT NOT NULL,
                goal_prompt TEXT NOT NULL,
                progress_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS follow_ups (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                page_id TEXT NOT NULL,
                goal_id UUID REFERENCES conversation_goals(id) ON DELETE SET NULL,
                follow_up_type TEXT NOT NULL,
                scheduled_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INT NOT NULL DEFAULT 0,
                max_retries INT NOT NULL DEFAULT 3,
                message_template TEXT,
                sent_message_id TEXT,
                error_message TEXT,
                sent_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS engagement_records (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                day_of_week INT NOT NULL,
                hour_of_day INT NOT NULL,
                response_latency_seconds BIGINT,
                engagement_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS action_log (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                conversation_id UUID,
                action TEXT NOT NULL,
                details JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_follow_ups_due ON follow_ups(status, scheduled_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_follow_ups_conv ON follow_ups(conversation_id, status)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_engagement_conv ON engagement_records(conversation_id, created_at DESC)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conv ON messages(conversation_id, created_at)")
            .execute(&self.pool)
            .await?;

        // At most one active goal per conversation.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_goals_one_active \
             ON conversation_goals(conversation_id) WHERE status = 'active'",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

const FOLLOW_UP_COLUMNS: &str = "id, conversation_id, page_id, goal_id, follow_up_type, \
     scheduled_at, status, retry_count, max_retries, message_template, sent_message_id, \
     error_message, sent_at, created_at, updated_at";

#[async_trait]
impl Store for Database {
    async fn upsert_page(
        &self,
        page_id: &str,
        name: &str,
        access_token: Option<&str>,
    ) -> anyhow::Result<Page> {
        let page = sqlx::query_as::<_, Page>(
            r#"
            INSERT INTO pages (page_id, name, access_token)
            VALUES ($1, $2, $3)
            ON CONFLICT (page_id) DO UPDATE
                SET name = $2, access_token = COALESCE($3, pages.access_token)
            RETURNING *
            "#,
        )
        .bind(page_id)
        .bind(name)
        .bind(access_token)
        .fetch_one(&self.pool)
        .await?;
        Ok(page)
    }

    async fn get_page(&self, page_id: &str) -> anyhow::Result<Option<Page>> {
        let page = sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE page_id = $1")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(page)
    }

    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>> {
        let conv = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(conv)
    }

    async fn upsert_conversation(
        &self,
        page_id: &str,
        participant_id: &str,
    ) -> anyhow::Result<Conversation> {
        let conv = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (page_id, participant_id)
            VALUES ($1, $2)
            ON CONFLICT (page_id, participant_id) DO UPDATE SET updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(page_id)
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conv)
    }

    async fn set_last_message_time(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE conversations SET last_message_time = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_cooldown(&self, id: Uuid, until: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        sqlx::query("UPDATE conversations SET cooldown_until = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_human_takeover(
        &self,
        id: Uuid,
        enabled: bool,
        until: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET human_takeover = $2, takeover_until = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(enabled)
        .bind(until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_ai_enabled(&self, id: Uuid, enabled: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE conversations SET ai_enabled = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_opt_out(&self, id: Uuid, opt_out: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE conversations SET opt_out = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(opt_out)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_message(
        &self,
        conversation_id: Uuid,
        direction: Direction,
        text: &str,
        mid: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, direction, text, mid)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(conversation_id)
        .bind(direction.as_str())
        .bind(text)
        .bind(mid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_outbound_at(
        &self,
        conversation_id: Uuid,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MAX(created_at) FROM messages WHERE conversation_id = $1 AND direction = 'outbound'",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, direction, text, mid, created_at
            FROM messages WHERE conversation_id = $1
            ORDER BY created_at DESC LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_follow_up(&self, new: &NewFollowUp) -> anyhow::Result<FollowUp> {
        let follow_up = sqlx::query_as::<_, FollowUp>(&format!(
            r#"
            INSERT INTO follow_ups
                (conversation_id, page_id, goal_id, follow_up_type, scheduled_at,
                 max_retries, message_template)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {FOLLOW_UP_COLUMNS}
            "#
        ))
        .bind(new.conversation_id)
        .bind(&new.page_id)
        .bind(new.goal_id)
        .bind(new.follow_up_type.as_str())
        .bind(new.scheduled_at)
        .bind(new.max_retries)
        .bind(&new.message_template)
        .fetch_one(&self.pool)
        .await?;
        Ok(follow_up)
    }

    async fn get_follow_up(&self, id: Uuid) -> anyhow::Result<Option<FollowUp>> {
        let follow_up = sqlx::query_as::<_, FollowUp>(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(follow_up)
    }

    async fn update_follow_up(&self, follow_up: &FollowUp) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE follow_ups
            SET status = $2, scheduled_at = $3, retry_count = $4, sent_message_id = $5,
                error_message = $6, sent_at = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(follow_up.id)
        .bind(follow_up.status.as_str())
        .bind(follow_up.scheduled_at)
        .bind(follow_up.retry_count)
        .bind(&follow_up.sent_message_id)
        .bind(&follow_up.error_message)
        .bind(follow_up.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_pending_follow_ups(
        &self,
        conversation_id: Uuid,
        reason: &str,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE follow_ups
            SET status = 'cancelled', error_message = $2, updated_at = NOW()
            WHERE conversation_id = $1 AND status = 'pending'
            "#,
        )
        .bind(conversation_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<FollowUp>> {
        let rows = sqlx::query_as::<_, FollowUp>(&format!(
            r#"
            SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_follow_ups(&self, conversation_id: Uuid) -> anyhow::Result<Vec<FollowUp>> {
        let rows = sqlx::query_as::<_, FollowUp>(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups WHERE conversation_id = $1 ORDER BY scheduled_at DESC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn follow_ups_by_status(
        &self,
        status: FollowUpStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<FollowUp>> {
        let rows = sqlx::query_as::<_, FollowUp>(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups WHERE status = $1 ORDER BY updated_at DESC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_terminal_follow_ups(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM follow_ups WHERE status <> 'pending' AND updated_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_engagement(&self, record: &NewEngagement) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO engagement_records
                (conversation_id, day_of_week, hour_of_day, response_latency_seconds, engagement_score)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.conversation_id)
        .bind(record.day_of_week)
        .bind(record.hour_of_day)
        .bind(record.response_latency_seconds)
        .bind(record.engagement_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_engagement(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<EngagementRecord>> {
        let rows = sqlx::query_as::<_, EngagementRecord>(
            r#"
            SELECT * FROM engagement_records
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn active_goal(&self, conversation_id: Uuid) -> anyhow::Result<Option<Goal>> {
        let goal = sqlx::query_as::<_, Goal>(
            "SELECT * FROM conversation_goals WHERE conversation_id = $1 AND status = 'active'",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(goal)
    }

    async fn get_goal(&self, id: Uuid) -> anyhow::Result<Option<Goal>> {
        let goal = sqlx::query_as::<_, Goal>("SELECT * FROM conversation_goals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(goal)
    }

    async fn replace_active_goal(
        &self,
        conversation_id: Uuid,
        goal_type: GoalType,
        goal_prompt: &str,
    ) -> anyhow::Result<Goal> {
        sqlx::query(
            r#"
            UPDATE conversation_goals
            SET status = $2, updated_at = NOW()
            WHERE conversation_id = $1 AND status = 'active'
            "#,
        )
        .bind(conversation_id)
        .bind(GoalStatus::Abandoned.as_str())
        .execute(&self.pool)
        .await?;

        // A concurrent writer that slipped in between the two statements
        // trips uq_goals_one_active and surfaces here as an error.
        let goal = sqlx::query_as::<_, Goal>(
            r#"
            INSERT INTO conversation_goals (conversation_id, goal_type, goal_prompt)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(goal_type.as_str())
        .bind(goal_prompt)
        .fetch_one(&self.pool)
        .await?;
        Ok(goal)
    }

    async fn update_goal(&self, goal: &Goal) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversation_goals
            SET progress_score = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(goal.id)
        .bind(goal.progress_score)
        .bind(goal.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_action(
        &self,
        conversation_id: Option<Uuid>,
        action: &str,
        details: serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO action_log (conversation_id, action, details) VALUES ($1, $2, $3)")
            .bind(conversation_id)
            .bind(action)
            .bind(details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_actions(
        &self,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<ActionLogEntry>> {
        let rows = sqlx::query_as::<_, ActionLogEntry>(
            r#"
            SELECT id, conversation_id, action, details, created_at
            FROM action_log WHERE ($1::uuid IS NULL OR conversation_id = $1)
            ORDER BY created_at DESC LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
