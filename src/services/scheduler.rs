//! Scheduler — background loop that claims pending jobs and publishes
//! execution requests.
//!
//! Each tick runs one transaction: claim up to a batch of `pending` jobs
//! with `FOR UPDATE SKIP LOCKED`, create an ExecutionRun per job, move the
//! job to `queued`, and resolve template/project/inventory into a
//! self-contained manifest. Requests publish to the bus only after the
//! transaction commits. The skip-locked claim is what lets multiple
//! scheduler replicas run without coordination.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::bus::{publish_json, MessageBus, TOPIC_JOB_REQUESTS};
use crate::config::Config;
use crate::db::DbPool;
use crate::messages::{ExecutionRequest, JobManifest};
use crate::models::group::{Group, HostGroupMapping};
use crate::models::host::Host;
use crate::models::inventory::Inventory;
use crate::models::job::UnifiedJob;
use crate::models::project::Project;
use crate::models::run::NewExecutionRun;
use crate::models::template::JobTemplate;
use crate::schema::{
    execution_runs, groups, host_group_mapping, hosts, inventories, job_templates, projects,
    unified_jobs,
};
use crate::services::inventory::render_inventory;

/// Run the scheduler loop forever. Spawned as a background tokio task.
pub async fn run_scheduler(pool: DbPool, bus: std::sync::Arc<dyn MessageBus>, config: Config) {
    tracing::info!(
        interval_secs = config.schedule_interval_secs,
        batch_size = config.schedule_batch_size,
        "Scheduler started"
    );

    loop {
        if let Err(e) = tick(&pool, bus.as_ref(), &config).await {
            tracing::error!("Scheduler tick error: {e:#}");
        }
        tokio::time::sleep(std::time::Duration::from_secs(config.schedule_interval_secs)).await;
    }
}

/// One claim-and-publish cycle.
async fn tick(pool: &DbPool, bus: &dyn MessageBus, config: &Config) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;
    let batch_size = config.schedule_batch_size;

    let requests = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            async move { claim_batch(conn, batch_size).await }.scope_boxed()
        })
        .await?;

    // Publish after commit. A failed publish leaves the run 'pending' for
    // an operator to re-drive; there is no auto-retry here.
    for request in &requests {
        match publish_json(bus, TOPIC_JOB_REQUESTS, request).await {
            Ok(()) => {
                crate::metrics::request_published();
                tracing::info!(
                    job_id = request.unified_job_id,
                    run_id = %request.execution_run_id,
                    playbook = %request.job_manifest.playbook,
                    "Published execution request"
                );
            }
            Err(e) => {
                tracing::error!(
                    run_id = %request.execution_run_id,
                    "Failed to publish execution request: {e:#}"
                );
            }
        }
    }

    Ok(())
}

/// Claim up to `batch_size` pending jobs and materialize their requests.
/// Runs inside the tick transaction.
async fn claim_batch(
    conn: &mut AsyncPgConnection,
    batch_size: i64,
) -> anyhow::Result<Vec<ExecutionRequest>> {
    let jobs: Vec<UnifiedJob> = unified_jobs::table
        .filter(unified_jobs::status.eq("pending"))
        .filter(unified_jobs::current_run_id.is_null())
        .order(unified_jobs::created_at.asc())
        .limit(batch_size)
        .select(UnifiedJob::as_select())
        .for_update()
        .skip_locked()
        .load(conn)
        .await?;

    let mut requests = Vec::with_capacity(jobs.len());

    for job in jobs {
        let run_id: Uuid = diesel::insert_into(execution_runs::table)
            .values(&NewExecutionRun {
                unified_job_id: job.id,
                attempt_number: 1,
                state: "pending".to_string(),
            })
            .returning(execution_runs::id)
            .get_result(conn)
            .await?;

        diesel::update(unified_jobs::table.find(job.id))
            .set((
                unified_jobs::status.eq("queued"),
                unified_jobs::current_run_id.eq(run_id),
            ))
            .execute(conn)
            .await?;
        crate::metrics::job_status_changed("queued");

        match resolve_manifest(conn, &job).await? {
            Some(manifest) => {
                requests.push(ExecutionRequest {
                    execution_run_id: run_id,
                    unified_job_id: job.id,
                    job_manifest: manifest,
                    created_at: Utc::now(),
                });
            }
            None => {
                mark_job_failed(conn, job.id).await?;
            }
        }
    }

    Ok(requests)
}

/// Resolve a job's template, project, and inventory into a manifest.
/// Returns `None` when a linked entity is missing (a terminal data error
/// for this job); database errors propagate and abort the tick.
async fn resolve_manifest(
    conn: &mut AsyncPgConnection,
    job: &UnifiedJob,
) -> anyhow::Result<Option<JobManifest>> {
    let Some(template_id) = job.unified_job_template_id else {
        tracing::warn!(job_id = job.id, "Job has no template");
        return Ok(None);
    };

    let template: Option<JobTemplate> = job_templates::table
        .find(template_id)
        .select(JobTemplate::as_select())
        .first(conn)
        .await
        .optional()?;
    let Some(template) = template else {
        tracing::warn!(job_id = job.id, template_id, "Template not found");
        return Ok(None);
    };

    let mut project_url = String::new();
    let mut project_ref = String::new();
    if let Some(project_id) = template.project_id {
        let project: Option<Project> = projects::table
            .find(project_id)
            .select(Project::as_select())
            .first(conn)
            .await
            .optional()?;
        match project {
            Some(project) => {
                tracing::info!(
                    job_id = job.id,
                    project = %project.name,
                    url = %project.scm_url,
                    "Resolved project"
                );
                project_url = project.scm_url;
                project_ref = project.scm_branch.unwrap_or_default();
            }
            None => {
                tracing::warn!(job_id = job.id, project_id, "Project not found");
                return Ok(None);
            }
        }
    }

    let mut inventory_text = String::new();
    if let Some(inventory_id) = template.inventory_id {
        let inventory: Option<Inventory> = inventories::table
            .find(inventory_id)
            .select(Inventory::as_select())
            .first(conn)
            .await
            .optional()?;
        let Some(inventory) = inventory else {
            tracing::warn!(job_id = job.id, inventory_id, "Inventory not found");
            return Ok(None);
        };

        let inv_hosts: Vec<Host> = hosts::table
            .filter(hosts::inventory_id.eq(inventory_id))
            .filter(hosts::enabled.eq(true))
            .order(hosts::id.asc())
            .select(Host::as_select())
            .load(conn)
            .await?;
        let inv_groups: Vec<Group> = groups::table
            .filter(groups::inventory_id.eq(inventory_id))
            .order(groups::id.asc())
            .select(Group::as_select())
            .load(conn)
            .await?;
        let group_ids: Vec<i64> = inv_groups.iter().map(|g| g.id).collect();
        let memberships: Vec<HostGroupMapping> = host_group_mapping::table
            .filter(host_group_mapping::group_id.eq_any(&group_ids))
            .order(host_group_mapping::id.asc())
            .select(HostGroupMapping::as_select())
            .load(conn)
            .await?;

        inventory_text = render_inventory(&inv_hosts, &inv_groups, &memberships);
        tracing::info!(
            job_id = job.id,
            inventory = %inventory.name,
            hosts = inv_hosts.len(),
            groups = inv_groups.len(),
            "Generated inventory"
        );

        if inv_hosts.is_empty() {
            tracing::warn!(
                job_id = job.id,
                inventory = %inventory.name,
                "Inventory has no enabled hosts; executor will default to localhost"
            );
        }
    }

    let extra_vars: HashMap<String, serde_json::Value> = template
        .extra_vars
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    Ok(Some(JobManifest {
        inventory: inventory_text,
        project_url,
        project_ref,
        playbook: template.playbook,
        playbook_content: template.playbook_content.unwrap_or_default(),
        extra_vars,
        environment_refs: Vec::new(),
    }))
}

/// Move a job to terminal `failed` (data error; never retried).
async fn mark_job_failed(conn: &mut AsyncPgConnection, job_id: i64) -> anyhow::Result<()> {
    diesel::update(unified_jobs::table.find(job_id))
        .set((
            unified_jobs::status.eq("failed"),
            unified_jobs::finished_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    crate::metrics::job_status_changed("failed");
    Ok(())
}
