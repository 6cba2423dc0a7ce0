//! SQLite-backed `Persistence`. WAL mode, a busy timeout tolerant of
//! writer contention, foreign keys on. Schema creation is idempotent;
//! new columns are added via `ALTER TABLE ... ADD COLUMN`, swallowing
//! the "duplicate column" error so repeated startups are harmless.

use crate::core::{Pipeline, PluginKind};
use crate::error::{CoreError, CoreResult};
use crate::persistence::{
    ExecutionLog, ExecutionLogEntry, ExecutionLogFilter, JobType, LogLevel, Persistence,
    PipelineStatusFilter, SchedulerJob, StoredPlugin,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqlitePersistence {
    pool: SqlitePool,
}

fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

/// Runs an `ALTER TABLE` migration, ignoring the "duplicate column name"
/// error SQLite raises when the column already exists.
async fn add_column_if_missing(pool: &SqlitePool, sql: &str) -> CoreResult<()> {
    match sqlx::query(sql).execute(pool).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.message().contains("duplicate column") => Ok(()),
        Err(e) => Err(CoreError::from(e)),
    }
}

impl SqlitePersistence {
    pub async fn new(db_path: &str) -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| CoreError::Fatal(format!("invalid sqlite path '{db_path}': {e}")))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(CoreError::from)?;

        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await.map_err(CoreError::from)?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn with_default_path() -> CoreResult<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("mimir-aip");
        std::fs::create_dir_all(&db_dir)
            .map_err(|e| CoreError::Fatal(format!("failed to create data directory: {e}")))?;
        let db_path = db_dir.join("mimir-aip.db");
        Self::new(db_path.to_str().expect("utf8 path")).await
    }

    async fn init(&self) -> CoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                enabled INTEGER NOT NULL DEFAULT 1,
                metadata_json TEXT NOT NULL,
                config_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pipelines_enabled ON pipelines(enabled);
            CREATE INDEX IF NOT EXISTS idx_pipelines_name ON pipelines(name);

            CREATE TABLE IF NOT EXISTS scheduler_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                job_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                timezone TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                next_run TEXT,
                last_run TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_next_run ON scheduler_jobs(next_run, enabled);

            CREATE TABLE IF NOT EXISTS execution_logs (
                id TEXT PRIMARY KEY,
                job_id TEXT,
                pipeline_id TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                status TEXT NOT NULL,
                entries_json TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_logs_pipeline_started ON execution_logs(pipeline_id, started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_logs_job_started ON execution_logs(job_id, started_at DESC);

            CREATE TABLE IF NOT EXISTS stored_plugins (
                name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                version TEXT NOT NULL,
                file_path TEXT,
                built_in INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                config_json TEXT,
                input_schema_json TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;

        add_column_if_missing(&self.pool, "ALTER TABLE pipelines ADD COLUMN version INTEGER NOT NULL DEFAULT 1").await?;

        Ok(())
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn create_pipeline(&self, pipeline: Pipeline) -> CoreResult<Pipeline> {
        let metadata_json = serde_json::to_string(&pipeline.metadata).map_err(|e| CoreError::Fatal(e.to_string()))?;
        let config_json = serde_json::to_string(&pipeline.config).map_err(|e| CoreError::Fatal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO pipelines (id, name, version, enabled, metadata_json, config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(pipeline.version as i64)
        .bind(pipeline.enabled)
        .bind(&metadata_json)
        .bind(&config_json)
        .bind(to_naive(pipeline.metadata.created_at))
        .bind(to_naive(pipeline.metadata.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => {
                CoreError::Conflict(format!("pipeline '{}' already exists", pipeline.id))
            }
            other => CoreError::from(other),
        })?;

        Ok(pipeline)
    }

    async fn get_pipeline(&self, id: &str) -> CoreResult<Pipeline> {
        let row = sqlx::query("SELECT id, name, version, enabled, metadata_json, config_json FROM pipelines WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("pipeline", id))?;
        row_to_pipeline(&row)
    }

    async fn list_pipelines(&self, filter: PipelineStatusFilter) -> CoreResult<Vec<Pipeline>> {
        let rows = match filter {
            PipelineStatusFilter::All => {
                sqlx::query("SELECT id, name, version, enabled, metadata_json, config_json FROM pipelines")
                    .fetch_all(&self.pool)
                    .await
            }
            PipelineStatusFilter::Active => sqlx::query(
                "SELECT id, name, version, enabled, metadata_json, config_json FROM pipelines WHERE enabled = 1",
            )
            .fetch_all(&self.pool)
            .await,
            PipelineStatusFilter::Inactive => sqlx::query(
                "SELECT id, name, version, enabled, metadata_json, config_json FROM pipelines WHERE enabled = 0",
            )
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(CoreError::from)?;

        rows.iter().map(row_to_pipeline).collect()
    }

    async fn update_pipeline(&self, pipeline: Pipeline) -> CoreResult<Pipeline> {
        let metadata_json = serde_json::to_string(&pipeline.metadata).map_err(|e| CoreError::Fatal(e.to_string()))?;
        let config_json = serde_json::to_string(&pipeline.config).map_err(|e| CoreError::Fatal(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE pipelines SET name = ?2, version = ?3, enabled = ?4, metadata_json = ?5, config_json = ?6, updated_at = ?7
             WHERE id = ?1",
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(pipeline.version as i64)
        .bind(pipeline.enabled)
        .bind(&metadata_json)
        .bind(&config_json)
        .bind(to_naive(pipeline.metadata.updated_at))
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("pipeline", pipeline.id.clone()));
        }
        Ok(pipeline)
    }

    async fn delete_pipeline(&self, id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("pipeline", id));
        }
        Ok(())
    }

    async fn save_job(&self, job: SchedulerJob) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO scheduler_jobs (id, name, job_type, target_id, cron_expression, timezone, enabled, next_run, last_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name, job_type = excluded.job_type, target_id = excluded.target_id,
               cron_expression = excluded.cron_expression, timezone = excluded.timezone, enabled = excluded.enabled,
               next_run = excluded.next_run, last_run = excluded.last_run, updated_at = excluded.updated_at",
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(job.job_type.as_str())
        .bind(&job.target_id)
        .bind(&job.cron_expression)
        .bind(&job.timezone)
        .bind(job.enabled)
        .bind(job.next_run.map(to_naive))
        .bind(job.last_run.map(to_naive))
        .bind(to_naive(job.created_at))
        .bind(to_naive(job.updated_at))
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn list_jobs(&self) -> CoreResult<Vec<SchedulerJob>> {
        let rows = sqlx::query(
            "SELECT id, name, job_type, target_id, cron_expression, timezone, enabled, next_run, last_run, created_at, updated_at FROM scheduler_jobs",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn delete_job(&self, id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("scheduler_job", id));
        }
        Ok(())
    }

    async fn set_job_enabled(&self, id: &str, enabled: bool) -> CoreResult<()> {
        let result = sqlx::query("UPDATE scheduler_jobs SET enabled = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(enabled)
            .bind(to_naive(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("scheduler_job", id));
        }
        Ok(())
    }

    async fn create_log(&self, log: ExecutionLog) -> CoreResult<()> {
        let entries_json = serde_json::to_string(&log.entries).map_err(|e| CoreError::Fatal(e.to_string()))?;
        sqlx::query(
            "INSERT INTO execution_logs (id, job_id, pipeline_id, started_at, ended_at, status, entries_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&log.id)
        .bind(&log.job_id)
        .bind(&log.pipeline_id)
        .bind(to_naive(log.started_at))
        .bind(log.ended_at.map(to_naive))
        .bind(log.status.as_str())
        .bind(&entries_json)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn append_log_entry(&self, log_id: &str, entry: ExecutionLogEntry) -> CoreResult<()> {
        let mut log = self.get_log(log_id).await?;
        log.entries.push(entry);
        let entries_json = serde_json::to_string(&log.entries).map_err(|e| CoreError::Fatal(e.to_string()))?;
        sqlx::query("UPDATE execution_logs SET entries_json = ?2 WHERE id = ?1")
            .bind(log_id)
            .bind(&entries_json)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    async fn finalize_log(&self, id: &str, status: crate::core::ExecutionStatus, ended_at: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query("UPDATE execution_logs SET status = ?2, ended_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status.as_str())
            .bind(to_naive(ended_at))
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("execution_log", id));
        }
        Ok(())
    }

    async fn get_log(&self, id: &str) -> CoreResult<ExecutionLog> {
        let row = sqlx::query(
            "SELECT id, job_id, pipeline_id, started_at, ended_at, status, entries_json FROM execution_logs WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::not_found("execution_log", id))?;
        row_to_log(&row)
    }

    async fn list_logs(&self, filter: ExecutionLogFilter) -> CoreResult<Vec<ExecutionLog>> {
        let limit = filter.effective_limit() as i64;
        let rows = match (&filter.job_id, &filter.pipeline_id) {
            (Some(job_id), Some(pipeline_id)) => sqlx::query(
                "SELECT id, job_id, pipeline_id, started_at, ended_at, status, entries_json FROM execution_logs
                 WHERE job_id = ?1 AND pipeline_id = ?2 ORDER BY started_at DESC LIMIT ?3",
            )
            .bind(job_id)
            .bind(pipeline_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await,
            (Some(job_id), None) => sqlx::query(
                "SELECT id, job_id, pipeline_id, started_at, ended_at, status, entries_json FROM execution_logs
                 WHERE job_id = ?1 ORDER BY started_at DESC LIMIT ?2",
            )
            .bind(job_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await,
            (None, Some(pipeline_id)) => sqlx::query(
                "SELECT id, job_id, pipeline_id, started_at, ended_at, status, entries_json FROM execution_logs
                 WHERE pipeline_id = ?1 ORDER BY started_at DESC LIMIT ?2",
            )
            .bind(pipeline_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await,
            (None, None) => sqlx::query(
                "SELECT id, job_id, pipeline_id, started_at, ended_at, status, entries_json FROM execution_logs
                 ORDER BY started_at DESC LIMIT ?1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(CoreError::from)?;

        rows.iter().map(row_to_log).collect()
    }

    async fn upsert_plugin(&self, plugin: StoredPlugin) -> CoreResult<()> {
        let config_json = plugin.config.as_ref().map(|v| v.to_string());
        let schema_json = plugin.input_schema.as_ref().map(|v| v.to_string());
        sqlx::query(
            "INSERT INTO stored_plugins (name, kind, version, file_path, built_in, enabled, config_json, input_schema_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name) DO UPDATE SET
               kind = excluded.kind, version = excluded.version, file_path = excluded.file_path,
               built_in = excluded.built_in, enabled = excluded.enabled,
               config_json = excluded.config_json, input_schema_json = excluded.input_schema_json",
        )
        .bind(&plugin.name)
        .bind(plugin.kind.as_str())
        .bind(&plugin.version)
        .bind(&plugin.file_path)
        .bind(plugin.built_in)
        .bind(plugin.enabled)
        .bind(&config_json)
        .bind(&schema_json)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn list_plugins(&self) -> CoreResult<Vec<StoredPlugin>> {
        let rows = sqlx::query(
            "SELECT name, kind, version, file_path, built_in, enabled, config_json, input_schema_json FROM stored_plugins",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;
        rows.iter().map(row_to_plugin).collect()
    }

    async fn delete_plugin(&self, name: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM stored_plugins WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("plugin", name));
        }
        Ok(())
    }

    async fn set_plugin_enabled(&self, name: &str, enabled: bool) -> CoreResult<()> {
        let result = sqlx::query("UPDATE stored_plugins SET enabled = ?2 WHERE name = ?1")
            .bind(name)
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("plugin", name));
        }
        Ok(())
    }
}

fn row_to_pipeline(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Pipeline> {
    let metadata_json: String = row.get("metadata_json");
    let config_json: String = row.get("config_json");
    Ok(Pipeline {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get::<i64, _>("version") as u32,
        enabled: row.get("enabled"),
        metadata: serde_json::from_str(&metadata_json).map_err(|e| CoreError::Fatal(e.to_string()))?,
        config: serde_json::from_str(&config_json).map_err(|e| CoreError::Fatal(e.to_string()))?,
    })
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> CoreResult<SchedulerJob> {
    Ok(SchedulerJob {
        id: row.get("id"),
        name: row.get("name"),
        job_type: JobType::from_str(&row.get::<String, _>("job_type"))?,
        target_id: row.get("target_id"),
        cron_expression: row.get("cron_expression"),
        timezone: row.get("timezone"),
        enabled: row.get("enabled"),
        next_run: row.get::<Option<NaiveDateTime>, _>("next_run").map(from_naive),
        last_run: row.get::<Option<NaiveDateTime>, _>("last_run").map(from_naive),
        created_at: from_naive(row.get("created_at")),
        updated_at: from_naive(row.get("updated_at")),
    })
}

fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> CoreResult<ExecutionLog> {
    let entries_json: String = row.get("entries_json");
    Ok(ExecutionLog {
        id: row.get("id"),
        job_id: row.get("job_id"),
        pipeline_id: row.get("pipeline_id"),
        started_at: from_naive(row.get("started_at")),
        ended_at: row.get::<Option<NaiveDateTime>, _>("ended_at").map(from_naive),
        status: crate::core::ExecutionStatus::from_str(&row.get::<String, _>("status"))?,
        entries: serde_json::from_str(&entries_json).map_err(|e| CoreError::Fatal(e.to_string()))?,
    })
}

fn row_to_plugin(row: &sqlx::sqlite::SqliteRow) -> CoreResult<StoredPlugin> {
    let config_json: Option<String> = row.get("config_json");
    let schema_json: Option<String> = row.get("input_schema_json");
    Ok(StoredPlugin {
        name: row.get("name"),
        kind: PluginKind::from_str(&row.get::<String, _>("kind"))?,
        version: row.get("version"),
        file_path: row.get("file_path"),
        built_in: row.get("built_in"),
        enabled: row.get("enabled"),
        config: config_json.map(|s| serde_json::from_str(&s)).transpose().map_err(|e| CoreError::Fatal(e.to_string()))?,
        input_schema: schema_json.map(|s| serde_json::from_str(&s)).transpose().map_err(|e| CoreError::Fatal(e.to_string()))?,
    })
}
