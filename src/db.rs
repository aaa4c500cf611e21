//! Database pool and embedded schema migration.

use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

pub type DbPool = Pool<AsyncPgConnection>;

/// Build a bb8 connection pool against Postgres.
pub async fn connect(database_url: &str) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder().build(manager).await?;
    tracing::info!("Connected to database");
    Ok(pool)
}

/// SQL migration for the control-plane tables.
///
/// Resource tables (templates, projects, inventories, hosts, groups) are
/// owned by the API layer; the pipeline tables (unified_jobs,
/// execution_runs, job_events) carry the run lifecycle. The unique index
/// on (execution_run_id, seq) is load-bearing: it is what makes event
/// projection idempotent under bus redelivery.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Praetor control plane tables
-- ================================================================

CREATE TABLE IF NOT EXISTS projects (
    id              BIGSERIAL PRIMARY KEY,
    organization_id BIGINT NOT NULL DEFAULT 1,
    name            VARCHAR(255) NOT NULL,
    scm_type        VARCHAR(32) NOT NULL DEFAULT 'git',
    scm_url         VARCHAR(1024) NOT NULL,
    scm_branch      VARCHAR(255),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS inventories (
    id              BIGSERIAL PRIMARY KEY,
    organization_id BIGINT NOT NULL DEFAULT 1,
    name            VARCHAR(255) NOT NULL,
    kind            VARCHAR(32) NOT NULL DEFAULT 'static',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS hosts (
    id              BIGSERIAL PRIMARY KEY,
    inventory_id    BIGINT NOT NULL REFERENCES inventories(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL,
    variables       JSONB,
    enabled         BOOLEAN NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_hosts_inventory ON hosts (inventory_id);

CREATE TABLE IF NOT EXISTS groups (
    id              BIGSERIAL PRIMARY KEY,
    inventory_id    BIGINT NOT NULL REFERENCES inventories(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL,
    variables       JSONB,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_groups_inventory ON groups (inventory_id);

CREATE TABLE IF NOT EXISTS host_group_mapping (
    id              BIGSERIAL PRIMARY KEY,
    group_id        BIGINT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    host_id         BIGINT NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    UNIQUE (group_id, host_id)
);

CREATE TABLE IF NOT EXISTS job_templates (
    id               BIGSERIAL PRIMARY KEY,
    organization_id  BIGINT NOT NULL DEFAULT 1,
    name             VARCHAR(255) NOT NULL,
    inventory_id     BIGINT REFERENCES inventories(id),
    project_id       BIGINT REFERENCES projects(id),
    playbook         VARCHAR(512) NOT NULL DEFAULT '',
    playbook_content TEXT,
    job_type         VARCHAR(32) NOT NULL DEFAULT 'run',
    verbosity        INTEGER NOT NULL DEFAULT 0,
    extra_vars       JSONB,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS unified_jobs (
    id                      BIGSERIAL PRIMARY KEY,
    unified_job_template_id BIGINT REFERENCES job_templates(id),
    name                    VARCHAR(255) NOT NULL,
    status                  VARCHAR(32) NOT NULL DEFAULT 'pending',
    current_run_id          UUID,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at              TIMESTAMPTZ,
    finished_at             TIMESTAMPTZ,
    cancel_requested        BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_unified_jobs_status ON unified_jobs (status);
CREATE INDEX IF NOT EXISTS idx_unified_jobs_created ON unified_jobs (created_at);

CREATE TABLE IF NOT EXISTS execution_runs (
    id                  UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    unified_job_id      BIGINT NOT NULL REFERENCES unified_jobs(id) ON DELETE CASCADE,
    attempt_number      INTEGER NOT NULL DEFAULT 1,
    state               VARCHAR(32) NOT NULL DEFAULT 'pending',
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at          TIMESTAMPTZ,
    finished_at         TIMESTAMPTZ,
    last_heartbeat_at   TIMESTAMPTZ,
    last_event_seq      BIGINT NOT NULL DEFAULT 0,
    persisted_event_seq BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_execution_runs_job ON execution_runs (unified_job_id);
CREATE INDEX IF NOT EXISTS idx_execution_runs_state ON execution_runs (state);

CREATE TABLE IF NOT EXISTS job_events (
    id               BIGSERIAL PRIMARY KEY,
    unified_job_id   BIGINT NOT NULL,
    execution_run_id UUID NOT NULL REFERENCES execution_runs(id) ON DELETE CASCADE,
    seq              BIGINT NOT NULL,
    event_type       VARCHAR(64) NOT NULL,
    host_id          BIGINT,
    task_name        VARCHAR(512),
    play_name        VARCHAR(512),
    event_data       JSONB,
    stdout_snippet   TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (execution_run_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_job_events_run ON job_events (execution_run_id);
CREATE INDEX IF NOT EXISTS idx_job_events_job ON job_events (unified_job_id);
"#;

/// Apply the embedded migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}
