//! Controller — materializes execution requests as isolated workloads.
//!
//! Subscribes to the request topic on its own queue group (so a request
//! lands on exactly one controller replica) and creates, per request, a
//! one-shot secret holding the manifest plus a single-shot executor pod
//! with that secret mounted.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::Api;

use crate::bus::{subscribe_json, MessageBus, QUEUE_GROUP_CONTROLLER, TOPIC_JOB_REQUESTS};
use crate::config::Config;
use crate::messages::ExecutionRequest;

const MANIFEST_MOUNT_PATH: &str = "/etc/praetor";

pub async fn run_controller(
    bus: Arc<dyn MessageBus>,
    client: kube::Client,
    config: Config,
) -> anyhow::Result<()> {
    let mut requests = subscribe_json::<ExecutionRequest>(
        bus.as_ref(),
        TOPIC_JOB_REQUESTS,
        QUEUE_GROUP_CONTROLLER,
    )
    .await?;

    tracing::info!(namespace = %config.namespace, "Controller started, listening for job requests");

    while let Some(request) = requests.recv().await {
        tracing::info!(
            job_id = request.unified_job_id,
            run_id = %request.execution_run_id,
            "Reconciling job request"
        );
        match launch_workload(&client, &config, &request).await {
            Ok(()) => crate::metrics::workload_launched(),
            Err(e) => {
                // Logged and dropped; the reconciler will surface the run
                // as lost if it never materializes.
                tracing::error!(
                    run_id = %request.execution_run_id,
                    "Failed to launch workload: {e:#}"
                );
            }
        }
    }

    Ok(())
}

/// Create the manifest secret and the executor pod for one request.
/// The secret is not cleaned up on pod-creation failure in v1.
async fn launch_workload(
    client: &kube::Client,
    config: &Config,
    request: &ExecutionRequest,
) -> anyhow::Result<()> {
    let run_id = request.execution_run_id.to_string();
    let name = format!("execution-{run_id}");
    let manifest_json = serde_json::to_string(request)?;

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            "manifest.json".to_string(),
            manifest_json,
        )])),
        ..Default::default()
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &config.namespace);
    secrets
        .create(&PostParams::default(), &secret)
        .await
        .map_err(|e| anyhow::anyhow!("create secret {name}: {e}"))?;

    let pod = build_pod(&name, &run_id, config);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);
    pods.create(&PostParams::default(), &pod)
        .await
        .map_err(|e| anyhow::anyhow!("create pod {name}: {e}"))?;

    tracing::info!(pod = %name, run_id = %run_id, "Launched execution pod");
    Ok(())
}

fn build_pod(name: &str, run_id: &str, config: &Config) -> Pod {
    let labels = BTreeMap::from([
        ("app".to_string(), "praetor-execution".to_string()),
        ("execution_id".to_string(), run_id.to_string()),
    ]);

    let container = Container {
        name: "executor".to_string(),
        image: Some(config.executor_image.clone()),
        env: Some(vec![
            EnvVar {
                name: "PRAETOR_MODE".to_string(),
                value: Some("oneshot".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "NATS_URL".to_string(),
                value: Some(config.nats_url.clone()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "manifest-volume".to_string(),
            mount_path: MANIFEST_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: "manifest-volume".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
