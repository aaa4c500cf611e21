//! Playbook runner — materializes a working tree, drives the external
//! playbook engine, and streams lifecycle events.
//!
//! The engine (`ansible-runner`) drops one JSON file per event under
//! `artifacts/*/job_events/`; a watcher task polls that directory, maps raw
//! engine events onto the core event vocabulary, and feeds them into the
//! run's event channel. Raw event files are deduplicated by filename.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::messages::{ExecutionRequest, JobEvent, JobManifest};
use crate::services::executor::CancelProbe;

const DEFAULT_INVENTORY: &str = "localhost ansible_connection=local";
const DEFAULT_PLAYBOOK: &str = "- hosts: all\n  tasks:\n    - name: Ping\n      ping:";
const WATCH_INTERVAL_MS: u64 = 500;
const CANCEL_POLL_SECS: u64 = 2;
const MAX_SNIPPET_BYTES: usize = 65536;

pub struct PlaybookRunner {
    base_dir: PathBuf,
}

impl PlaybookRunner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Execute one request end to end, emitting events on `events_tx`.
    ///
    /// All failure paths emit a `JOB_FAILED` event before the error is
    /// returned, so the run's observable outcome never depends on the
    /// caller's error handling.
    pub async fn run(
        &self,
        req: &ExecutionRequest,
        events_tx: mpsc::Sender<JobEvent>,
        cancel: Option<&CancelProbe>,
    ) -> anyhow::Result<()> {
        let run_id = req.execution_run_id;
        let job_id = req.unified_job_id;
        let run_dir = self.base_dir.join(run_id.to_string());
        tracing::info!(run_id = %run_id, dir = %run_dir.display(), "Preparing run");

        if let Err(e) = prepare_workspace(&run_dir, &req.job_manifest).await {
            let mut failed = JobEvent::lifecycle(run_id, job_id, "JOB_FAILED", 1);
            failed.stdout_snippet = Some(format!("failed to prepare working tree: {e:#}"));
            let _ = events_tx.send(failed).await;
            return Err(e);
        }

        // Highest engine seq observed so far; the terminal event goes one
        // past it so (run, seq) stays unique.
        let seq_high = Arc::new(AtomicI64::new(0));
        let (done_tx, done_rx) = watch::channel(false);
        let watcher = tokio::spawn(watch_events(
            run_dir.clone(),
            run_id,
            job_id,
            events_tx.clone(),
            done_rx,
            seq_high.clone(),
        ));

        events_tx
            .send(JobEvent::lifecycle(run_id, job_id, "JOB_STARTED", 0))
            .await
            .ok();

        let playbook = if req.job_manifest.playbook.is_empty() {
            "playbook.yml"
        } else {
            req.job_manifest.playbook.as_str()
        };
        tracing::info!(run_id = %run_id, playbook, "Launching playbook engine");
        let started = Instant::now();

        let spawned = Command::new("ansible-runner")
            .arg("run")
            .arg(&run_dir)
            .args(["-p", playbook, "-v"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = done_tx.send(true);
                let _ = watcher.await;
                let seq = seq_high.load(Ordering::SeqCst) + 1;
                let mut failed = JobEvent::lifecycle(run_id, job_id, "JOB_FAILED", seq);
                failed.stdout_snippet = Some(format!("failed to start playbook engine: {e}"));
                let _ = events_tx.send(failed).await;
                return Err(e).context("spawn ansible-runner");
            }
        };

        // Drain the engine's pipes concurrently so verbose output cannot
        // fill them and stall the subprocess.
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });
        let stdout_task = child.stdout.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut cancelled = false;
        let status = loop {
            // The wait future is dropped at the end of each select so the
            // child can be signalled between polls; Child::wait is cancel
            // safe.
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = tokio::time::sleep(std::time::Duration::from_secs(CANCEL_POLL_SECS)) => None,
            };
            if let Some(status) = exited {
                break status;
            }
            if !cancelled && cancel_requested(cancel, job_id).await {
                tracing::warn!(run_id = %run_id, job_id, "Cancel requested, killing playbook engine");
                cancelled = true;
                let _ = child.start_kill();
            }
        };

        // Let the watcher drain the artifact directory one final time.
        let _ = done_tx.send(true);
        let _ = watcher.await;

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        if let Some(task) = stdout_task {
            let _ = task.await;
        }

        crate::metrics::run_duration(started.elapsed().as_millis() as u64);

        let seq = seq_high.load(Ordering::SeqCst) + 1;
        let event = match status {
            _ if cancelled => {
                let mut failed = JobEvent::lifecycle(run_id, job_id, "JOB_FAILED", seq);
                failed.stdout_snippet = Some("run cancelled by request".to_string());
                failed
            }
            Ok(status) if status.success() => {
                JobEvent::lifecycle(run_id, job_id, "JOB_COMPLETED", seq)
            }
            Ok(status) => {
                let mut failed = JobEvent::lifecycle(run_id, job_id, "JOB_FAILED", seq);
                failed.stdout_snippet = Some(format!(
                    "playbook engine exited with {}: {}",
                    status,
                    tail_snippet(&stderr)
                ));
                failed
            }
            Err(e) => {
                let mut failed = JobEvent::lifecycle(run_id, job_id, "JOB_FAILED", seq);
                failed.stdout_snippet = Some(format!("failed to wait on playbook engine: {e}"));
                failed
            }
        };

        tracing::info!(run_id = %run_id, outcome = %event.event_type, "Finished run");
        let _ = events_tx.send(event).await;

        Ok(())
    }
}

/// Lay out the per-run working tree the engine expects:
/// `inventory/hosts.ini`, `project/` (cloned or inline), `env/extravars`.
pub async fn prepare_workspace(run_dir: &Path, manifest: &JobManifest) -> anyhow::Result<()> {
    for sub in ["inventory", "project", "env"] {
        tokio::fs::create_dir_all(run_dir.join(sub)).await?;
    }

    let inventory = if manifest.inventory.is_empty() {
        DEFAULT_INVENTORY
    } else {
        manifest.inventory.as_str()
    };
    tokio::fs::write(run_dir.join("inventory").join("hosts.ini"), inventory).await?;

    if !manifest.project_url.is_empty() {
        let project_dir = run_dir.join("project");
        tracing::info!(url = %manifest.project_url, dir = %project_dir.display(), "Cloning project");

        let mut clone = Command::new("git");
        clone.args(["clone", "--depth", "1"]);
        if !manifest.project_ref.is_empty() {
            clone.args(["--branch", &manifest.project_ref]);
        }
        clone.arg(&manifest.project_url).arg(&project_dir);

        let output = clone.output().await.context("run git clone")?;
        if !output.status.success() {
            anyhow::bail!(
                "failed to clone project: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
    } else {
        let content = if manifest.playbook_content.is_empty() {
            DEFAULT_PLAYBOOK
        } else {
            manifest.playbook_content.as_str()
        };
        tokio::fs::write(run_dir.join("project").join("playbook.yml"), content).await?;
    }

    if !manifest.extra_vars.is_empty() {
        let vars = serde_json::to_vec(&manifest.extra_vars)?;
        tokio::fs::write(run_dir.join("env").join("extravars"), vars).await?;
    }

    Ok(())
}

async fn cancel_requested(cancel: Option<&CancelProbe>, job_id: i64) -> bool {
    let Some(probe) = cancel else {
        return false;
    };
    match probe.cancel_requested(job_id).await {
        Ok(flag) => flag,
        Err(e) => {
            tracing::warn!(job_id, "Cancel probe failed: {e:#}");
            false
        }
    }
}

/// Poll the engine's artifact directory for new event files until the run
/// finishes, then drain once more.
async fn watch_events(
    run_dir: PathBuf,
    run_id: Uuid,
    job_id: i64,
    events_tx: mpsc::Sender<JobEvent>,
    mut done_rx: watch::Receiver<bool>,
    seq_high: Arc<AtomicI64>,
) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut events_dir: Option<PathBuf> = None;
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_millis(WATCH_INTERVAL_MS));

    loop {
        tokio::select! {
            _ = done_rx.changed() => {
                if events_dir.is_none() {
                    events_dir = find_events_dir(&run_dir).await;
                }
                if let Some(dir) = &events_dir {
                    drain_new_events(dir, run_id, job_id, &events_tx, &mut seen, &seq_high).await;
                }
                return;
            }
            _ = ticker.tick() => {
                if events_dir.is_none() {
                    events_dir = find_events_dir(&run_dir).await;
                }
                if let Some(dir) = &events_dir {
                    drain_new_events(dir, run_id, job_id, &events_tx, &mut seen, &seq_high).await;
                }
            }
        }
    }
}

/// The engine names its artifact directory with a fresh ident per run;
/// locate the first `artifacts/*/job_events` that exists.
async fn find_events_dir(run_dir: &Path) -> Option<PathBuf> {
    let artifacts = run_dir.join("artifacts");
    let mut entries = tokio::fs::read_dir(&artifacts).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let candidate = entry.path().join("job_events");
        if tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

/// Emit every not-yet-seen event file in ascending seq order. Files that
/// fail to parse are dropped individually; the run continues.
async fn drain_new_events(
    events_dir: &Path,
    run_id: Uuid,
    job_id: i64,
    events_tx: &mpsc::Sender<JobEvent>,
    seen: &mut HashSet<String>,
    seq_high: &AtomicI64,
) {
    let Ok(mut entries) = tokio::fs::read_dir(events_dir).await else {
        return;
    };

    let mut new_files: Vec<String> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".json") && !seen.contains(&name) {
            new_files.push(name);
        }
    }
    new_files.sort_by_key(|name| extract_seq(name));

    for name in new_files {
        // Read failures are transient (retried next pass); parse failures
        // drop the individual event.
        let Ok(content) = tokio::fs::read(events_dir.join(&name)).await else {
            continue;
        };
        seen.insert(name.clone());

        let raw: serde_json::Value = match serde_json::from_slice(&content) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(file = %name, "Dropping unparseable engine event: {e}");
                continue;
            }
        };

        if let Some(event) = map_raw_event(run_id, job_id, &raw) {
            seq_high.fetch_max(event.seq, Ordering::SeqCst);
            if events_tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Numeric prefix of an engine event filename (`<seq>-<uuid>.json`).
pub fn extract_seq(filename: &str) -> i64 {
    filename
        .split('-')
        .next()
        .and_then(|prefix| prefix.parse().ok())
        .unwrap_or(0)
}

/// Map a raw engine event onto the core event vocabulary. Unmapped events
/// with output become `JOB_LOG`; unmapped silent events are dropped.
pub fn map_raw_event(run_id: Uuid, job_id: i64, raw: &serde_json::Value) -> Option<JobEvent> {
    let raw_type = raw.get("event").and_then(|v| v.as_str()).unwrap_or_default();
    let seq = raw.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
    let stdout = raw
        .get("stdout")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());

    let event_type = match raw_type {
        "playbook_on_start" => "JOB_STARTED",
        "runner_on_ok" => "TASK_OK",
        "runner_on_failed" => "TASK_FAILED",
        "playbook_on_stats" => "JOB_COMPLETED",
        _ if stdout.is_some() => "JOB_LOG",
        _ => return None,
    };

    let task_name = raw
        .pointer("/event_data/task")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(JobEvent {
        execution_run_id: run_id,
        unified_job_id: job_id,
        seq,
        event_type: event_type.to_string(),
        timestamp: Utc::now(),
        host: None,
        task_name,
        play_name: None,
        stdout_snippet: stdout.map(str::to_string),
        event_data: Some(raw.clone()),
    })
}

/// Last 64KB of subprocess output, lossily decoded.
fn tail_snippet(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    if text.len() > MAX_SNIPPET_BYTES {
        let cut = text.len() - MAX_SNIPPET_BYTES;
        let mut start = cut;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        format!("...truncated...\n{}", &text[start..])
    } else {
        text.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn maps_lifecycle_and_task_events() {
        let run_id = Uuid::new_v4();
        let cases = [
            ("playbook_on_start", "JOB_STARTED"),
            ("runner_on_ok", "TASK_OK"),
            ("runner_on_failed", "TASK_FAILED"),
            ("playbook_on_stats", "JOB_COMPLETED"),
        ];
        for (raw_type, expected) in cases {
            let raw = json!({"event": raw_type, "counter": 4});
            let event = map_raw_event(run_id, 1, &raw).unwrap();
            assert_eq!(event.event_type, expected);
            assert_eq!(event.seq, 4);
            assert_eq!(event.execution_run_id, run_id);
        }
    }

    #[test]
    fn unmapped_event_with_stdout_becomes_log() {
        let raw = json!({"event": "verbose", "counter": 2, "stdout": "PLAY [all]"});
        let event = map_raw_event(Uuid::nil(), 1, &raw).unwrap();
        assert_eq!(event.event_type, "JOB_LOG");
        assert_eq!(event.stdout_snippet.as_deref(), Some("PLAY [all]"));
    }

    #[test]
    fn unmapped_silent_event_is_dropped() {
        let raw = json!({"event": "verbose", "counter": 2, "stdout": ""});
        assert!(map_raw_event(Uuid::nil(), 1, &raw).is_none());
    }

    #[test]
    fn task_name_comes_from_event_data() {
        let raw = json!({
            "event": "runner_on_ok",
            "counter": 7,
            "stdout": "ok: [web1]",
            "event_data": {"task": "Install Nginx"}
        });
        let event = map_raw_event(Uuid::nil(), 1, &raw).unwrap();
        assert_eq!(event.task_name.as_deref(), Some("Install Nginx"));
        assert_eq!(event.event_data.unwrap()["event_data"]["task"], "Install Nginx");
    }

    #[test]
    fn seq_extraction_orders_files_numerically() {
        assert_eq!(extract_seq("1-abc.json"), 1);
        assert_eq!(extract_seq("10-def.json"), 10);
        assert_eq!(extract_seq("garbage.json"), 0);

        let mut names = vec!["10-b.json", "2-a.json", "1-c.json"];
        names.sort_by_key(|n| extract_seq(n));
        assert_eq!(names, vec!["1-c.json", "2-a.json", "10-b.json"]);
    }

    #[tokio::test]
    async fn workspace_uses_inline_playbook_content() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = JobManifest {
            playbook_content: "- hosts: all\n  tasks: []".to_string(),
            ..Default::default()
        };

        prepare_workspace(dir.path(), &manifest).await.unwrap();

        let playbook = tokio::fs::read_to_string(dir.path().join("project/playbook.yml"))
            .await
            .unwrap();
        assert_eq!(playbook, "- hosts: all\n  tasks: []");
        let inventory = tokio::fs::read_to_string(dir.path().join("inventory/hosts.ini"))
            .await
            .unwrap();
        assert_eq!(inventory, "localhost ansible_connection=local");
    }

    #[tokio::test]
    async fn workspace_defaults_to_ping_playbook() {
        let dir = tempfile::tempdir().unwrap();
        prepare_workspace(dir.path(), &JobManifest::default())
            .await
            .unwrap();

        let playbook = tokio::fs::read_to_string(dir.path().join("project/playbook.yml"))
            .await
            .unwrap();
        assert!(playbook.contains("ping:"));
    }

    #[tokio::test]
    async fn workspace_writes_inventory_and_extravars() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = JobManifest {
            inventory: "[web]\nweb1\n".to_string(),
            ..Default::default()
        };
        manifest
            .extra_vars
            .insert("release".to_string(), json!("1.2.3"));

        prepare_workspace(dir.path(), &manifest).await.unwrap();

        let inventory = tokio::fs::read_to_string(dir.path().join("inventory/hosts.ini"))
            .await
            .unwrap();
        assert_eq!(inventory, "[web]\nweb1\n");
        let vars: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.path().join("env/extravars")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(vars["release"], "1.2.3");
    }

    #[tokio::test]
    async fn clone_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = JobManifest {
            project_url: "file:///nonexistent/praetor-missing-repo.git".to_string(),
            ..Default::default()
        };

        let err = prepare_workspace(dir.path(), &manifest).await.unwrap_err();
        assert!(err.to_string().contains("failed to clone project"));
    }
}
