// Postgres-backed SessionStore
//
// Upsert identity is (session_id, sequence); the unique index enforces it
// and `ON CONFLICT DO UPDATE` replaces the row in place. Sequence
// allocation is a single counter upsert whose row lock serializes
// concurrent allocators; the max-sequence subquery keeps the counter ahead
// of history after truncation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::QueryBuilder;
use tracing::debug;
use uuid::Uuid;

use trellis_core::{AgentError, Result, Run, SessionStore, Step, StepFilter};

use crate::models::{RunRow, StepRow};

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(store_err)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> AgentError {
    AgentError::store(e.to_string())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, session_id, runnable_id, runnable_type, input_query,
                              response_content, status, error, parent_run_id, metrics, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                response_content = EXCLUDED.response_content,
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                metrics = EXCLUDED.metrics
            "#,
        )
        .bind(run.id)
        .bind(run.session_id)
        .bind(&run.runnable_id)
        .bind(run.runnable_type.to_string())
        .bind(&run.input_query)
        .bind(&run.response_content)
        .bind(run.status.to_string())
        .bind(&run.error)
        .bind(run.parent_run_id)
        .bind(Json(run.metrics.clone()))
        .bind(run.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(row.map(Run::from))
    }

    async fn list_runs(
        &self,
        session_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>> {
        let mut query: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT * FROM runs");
        if let Some(session_id) = session_id {
            query.push(" WHERE session_id = ").push_bind(session_id);
        }
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows: Vec<RunRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(rows.into_iter().map(Run::from).collect())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM runs WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn save_step(&self, step: &Step) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO steps (id, session_id, run_id, sequence, role, content, tool_calls,
                               tool_call_id, name, workflow_id, node_id, parent_run_id,
                               branch_key, iteration, runnable_id, runnable_type, trace_id,
                               span_id, parent_span_id, depth, metrics, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (session_id, sequence) DO UPDATE SET
                id = EXCLUDED.id,
                run_id = EXCLUDED.run_id,
                role = EXCLUDED.role,
                content = EXCLUDED.content,
                tool_calls = EXCLUDED.tool_calls,
                tool_call_id = EXCLUDED.tool_call_id,
                name = EXCLUDED.name,
                workflow_id = EXCLUDED.workflow_id,
                node_id = EXCLUDED.node_id,
                parent_run_id = EXCLUDED.parent_run_id,
                branch_key = EXCLUDED.branch_key,
                iteration = EXCLUDED.iteration,
                runnable_id = EXCLUDED.runnable_id,
                runnable_type = EXCLUDED.runnable_type,
                trace_id = EXCLUDED.trace_id,
                span_id = EXCLUDED.span_id,
                parent_span_id = EXCLUDED.parent_span_id,
                depth = EXCLUDED.depth,
                metrics = EXCLUDED.metrics,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(step.id)
        .bind(step.session_id)
        .bind(step.run_id)
        .bind(step.sequence)
        .bind(step.role.to_string())
        .bind(&step.content)
        .bind(step.tool_calls.clone().map(Json))
        .bind(&step.tool_call_id)
        .bind(&step.name)
        .bind(&step.workflow_id)
        .bind(&step.node_id)
        .bind(step.parent_run_id)
        .bind(&step.branch_key)
        .bind(step.iteration.map(|i| i as i32))
        .bind(&step.runnable_id)
        .bind(step.runnable_type.map(|t| t.to_string()))
        .bind(&step.trace_id)
        .bind(&step.span_id)
        .bind(&step.parent_span_id)
        .bind(step.depth as i32)
        .bind(step.metrics.clone().map(Json))
        .bind(step.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_steps(&self, session_id: Uuid, filter: &StepFilter) -> Result<Vec<Step>> {
        let mut query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM steps WHERE session_id = ");
        query.push_bind(session_id);

        if let Some(start_seq) = filter.start_seq {
            query.push(" AND sequence >= ").push_bind(start_seq);
        }
        if let Some(end_seq) = filter.end_seq {
            query.push(" AND sequence <= ").push_bind(end_seq);
        }
        if let Some(run_id) = filter.run_id {
            query.push(" AND run_id = ").push_bind(run_id);
        }
        if let Some(workflow_id) = &filter.workflow_id {
            query.push(" AND workflow_id = ").push_bind(workflow_id.clone());
        }
        if let Some(node_id) = &filter.node_id {
            query.push(" AND node_id = ").push_bind(node_id.clone());
        }
        if let Some(branch_key) = &filter.branch_key {
            query.push(" AND branch_key = ").push_bind(branch_key.clone());
        }
        if let Some(runnable_id) = &filter.runnable_id {
            query.push(" AND runnable_id = ").push_bind(runnable_id.clone());
        }
        query
            .push(" ORDER BY sequence ASC LIMIT ")
            .push_bind(filter.limit as i64);

        let rows: Vec<StepRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(rows.into_iter().map(Step::from).collect())
    }

    async fn get_last_step(&self, session_id: Uuid) -> Result<Option<Step>> {
        let row: Option<StepRow> = sqlx::query_as(
            "SELECT * FROM steps WHERE session_id = $1 ORDER BY sequence DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(Step::from))
    }

    async fn get_step_count(&self, session_id: Uuid) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM steps WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;

        Ok(count.max(0) as usize)
    }

    async fn get_max_sequence(&self, session_id: Uuid) -> Result<i64> {
        let (max,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM steps WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;

        Ok(max)
    }

    async fn allocate_sequence(&self, session_id: Uuid) -> Result<i64> {
        // One upsert: first caller seeds from history, later callers
        // increment under the counter row's lock. GREATEST keeps the
        // counter ahead of persisted history even after truncation.
        let (seq,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO session_counters (session_id, seq)
            VALUES ($1, (SELECT COALESCE(MAX(sequence), 0) + 1 FROM steps WHERE session_id = $1))
            ON CONFLICT (session_id) DO UPDATE SET
                seq = GREATEST(
                    session_counters.seq + 1,
                    (SELECT COALESCE(MAX(sequence), 0) + 1 FROM steps WHERE session_id = $1)
                )
            RETURNING seq
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(seq)
    }

    async fn delete_steps(&self, session_id: Uuid, start_seq: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM steps WHERE session_id = $1 AND sequence >= $2")
            .bind(session_id)
            .bind(start_seq)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        // Pull the counter back so a retry reuses the truncated range; the
        // allocation upsert clamps it against surviving history.
        sqlx::query("UPDATE session_counters SET seq = LEAST(seq, $2 - 1) WHERE session_id = $1")
            .bind(session_id)
            .bind(start_seq)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        debug!(
            session_id = %session_id,
            start_seq,
            deleted = result.rows_affected(),
            "steps_range_deleted"
        );
        Ok(result.rows_affected())
    }

    async fn get_last_assistant_content(
        &self,
        session_id: Uuid,
        node_id: &str,
        workflow_id: Option<&str>,
    ) -> Result<Option<String>> {
        let mut query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT content FROM steps WHERE session_id = ");
        query
            .push_bind(session_id)
            .push(" AND role = 'assistant' AND content IS NOT NULL AND node_id = ")
            .push_bind(node_id.to_string());
        if let Some(workflow_id) = workflow_id {
            query.push(" AND workflow_id = ").push_bind(workflow_id.to_string());
        }
        query.push(" ORDER BY sequence DESC LIMIT 1");

        let row: Option<(Option<String>,)> = query
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(row.and_then(|(content,)| content))
    }

    async fn get_step_by_tool_call_id(
        &self,
        session_id: Uuid,
        tool_call_id: &str,
    ) -> Result<Option<Step>> {
        let row: Option<StepRow> = sqlx::query_as(
            "SELECT * FROM steps WHERE session_id = $1 AND tool_call_id = $2 \
             ORDER BY sequence ASC LIMIT 1",
        )
        .bind(session_id)
        .bind(tool_call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(Step::from))
    }
}
