//! Diesel table definitions for the praetor control plane.
//!
//! Tables: unified_jobs, job_templates, projects, inventories, hosts,
//! groups, host_group_mapping, execution_runs, job_events.
//! The API layer owns resource CRUD; the pipeline only reads resources and
//! mutates unified_jobs / execution_runs / job_events.

diesel::table! {
    unified_jobs (id) {
        id -> Int8,
        unified_job_template_id -> Nullable<Int8>,
        name -> Varchar,
        status -> Varchar,
        current_run_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
        cancel_requested -> Bool,
    }
}

diesel::table! {
    job_templates (id) {
        id -> Int8,
        organization_id -> Int8,
        name -> Varchar,
        inventory_id -> Nullable<Int8>,
        project_id -> Nullable<Int8>,
        playbook -> Varchar,
        playbook_content -> Nullable<Text>,
        job_type -> Varchar,
        verbosity -> Int4,
        extra_vars -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    projects (id) {
        id -> Int8,
        organization_id -> Int8,
        name -> Varchar,
        scm_type -> Varchar,
        scm_url -> Varchar,
        scm_branch -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    inventories (id) {
        id -> Int8,
        organization_id -> Int8,
        name -> Varchar,
        kind -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    hosts (id) {
        id -> Int8,
        inventory_id -> Int8,
        name -> Varchar,
        variables -> Nullable<Jsonb>,
        enabled -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    groups (id) {
        id -> Int8,
        inventory_id -> Int8,
        name -> Varchar,
        variables -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    host_group_mapping (id) {
        id -> Int8,
        group_id -> Int8,
        host_id -> Int8,
    }
}

diesel::table! {
    execution_runs (id) {
        id -> Uuid,
        unified_job_id -> Int8,
        attempt_number -> Int4,
        state -> Varchar,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
        last_heartbeat_at -> Nullable<Timestamptz>,
        last_event_seq -> Int8,
        persisted_event_seq -> Int8,
    }
}

diesel::table! {
    job_events (id) {
        id -> Int8,
        unified_job_id -> Int8,
        execution_run_id -> Uuid,
        seq -> Int8,
        event_type -> Varchar,
        host_id -> Nullable<Int8>,
        task_name -> Nullable<Varchar>,
        play_name -> Nullable<Varchar>,
        event_data -> Nullable<Jsonb>,
        stdout_snippet -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

// Foreign key relationships
diesel::joinable!(unified_jobs -> job_templates (unified_job_template_id));
diesel::joinable!(hosts -> inventories (inventory_id));
diesel::joinable!(groups -> inventories (inventory_id));
diesel::joinable!(host_group_mapping -> groups (group_id));
diesel::joinable!(host_group_mapping -> hosts (host_id));
diesel::joinable!(execution_runs -> unified_jobs (unified_job_id));
diesel::joinable!(job_events -> execution_runs (execution_run_id));

diesel::allow_tables_to_appear_in_same_query!(
    unified_jobs,
    job_templates,
    projects,
    inventories,
    hosts,
    groups,
    host_group_mapping,
    execution_runs,
    job_events,
);
