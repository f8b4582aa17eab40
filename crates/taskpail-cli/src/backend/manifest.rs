//! Kubernetes manifests for a compiled topology.
//!
//! Every component becomes a `Job`; an auto-provisioned queue becomes a
//! `Deployment` and `Service` named `<run>-queue`, with a sidecar that
//! creates the run's bucket. Resources the compiler passed through are
//! emitted first, unchanged.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use taskpail_core::{Component, ComponentKind, Llir};
use taskpail_queue::config::{DEFAULT_COPY_IF_NOT_EXISTS, ENV_COPY_IF_NOT_EXISTS};

use crate::context::{
    ENV_RUN_QUEUE_ACCESS_KEY_ID, ENV_RUN_QUEUE_ENDPOINT, ENV_RUN_QUEUE_SECRET_ACCESS_KEY,
};

pub const LABEL_RUN: &str = "taskpail.io/run";
pub const LABEL_COMPONENT: &str = "taskpail.io/component";
pub const LABEL_POOL: &str = "taskpail.io/pool";
pub const LABEL_INSTANCE: &str = "taskpail.io/instance";

/// Image for components whose application names none.
pub const DEFAULT_IMAGE: &str = "docker.io/alpine:3";
pub const QUEUE_IMAGE: &str = "docker.io/minio/minio:latest";
pub const QUEUE_CLIENT_IMAGE: &str = "docker.io/minio/mc:latest";

/// Where the taskpail binary lives inside component images.
pub const EXE_PATH: &str = "/usr/local/bin/taskpail";
pub const ENV_EXE: &str = "TASKPAIL_EXE";

/// Handler command a pool worker runs for each task.
pub const ENV_TASK_COMMAND: &str = "TASKPAIL_TASK_COMMAND";

/// One YAML document per resource, in apply order.
pub fn render(llir: &Llir) -> Result<Vec<String>, serde_yaml::Error> {
    let mut docs = Vec::with_capacity(llir.others.len() + llir.components.len() + 2);
    for other in &llir.others {
        docs.push(serde_yaml::to_string(other)?);
    }
    if llir.queue.auto {
        for resource in queue_resources(llir) {
            docs.push(serde_yaml::to_string(&resource)?);
        }
    }
    for component in &llir.components {
        docs.push(serde_yaml::to_string(&job(llir, component))?);
    }
    Ok(docs)
}

/// Platform name of one component of a run.
pub fn resource_name(run: &str, instance: &str) -> String {
    format!("{}-{}", run, instance).to_lowercase()
}

fn labels(llir: &Llir, kind: ComponentKind, instance: &str, pool: Option<&str>) -> Value {
    let mut labels = json!({
        LABEL_RUN: llir.context.run_name.as_str(),
        LABEL_COMPONENT: kind.as_str(),
        LABEL_INSTANCE: instance,
    });
    if let Some(pool) = pool {
        labels[LABEL_POOL] = json!(pool);
    }
    labels
}

fn job(llir: &Llir, component: &Component) -> Value {
    let run = llir.context.run_name.as_str();
    let labels = labels(
        llir,
        component.kind,
        &component.instance_name,
        component.pool.as_deref(),
    );

    let mut env: BTreeMap<&str, &str> = component
        .spec
        .env
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    env.insert(ENV_EXE, EXE_PATH);
    env.insert(ENV_RUN_QUEUE_ENDPOINT, &llir.queue.endpoint);
    env.insert(ENV_RUN_QUEUE_ACCESS_KEY_ID, &llir.queue.access_key);
    env.insert(ENV_RUN_QUEUE_SECRET_ACCESS_KEY, &llir.queue.secret_key);
    env.insert(ENV_COPY_IF_NOT_EXISTS, DEFAULT_COPY_IF_NOT_EXISTS);

    // Pool workers run the worker runtime, which invokes the application
    // command once per claimed task.
    let worker_command = format!("${} worker run", ENV_EXE);
    let command = match component.kind {
        ComponentKind::Workers => {
            env.insert(ENV_TASK_COMMAND, &component.spec.command);
            worker_command.as_str()
        }
        _ => component.spec.command.as_str(),
    };

    let env: Vec<Value> = env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut resources = json!({
        "requests": { "cpu": component.sizing.cpu, "memory": component.sizing.memory }
    });
    if component.sizing.gpu > 0 {
        resources["limits"] = json!({ "nvidia.com/gpu": component.sizing.gpu });
    }

    let parallelism = match component.kind {
        ComponentKind::Workers => component.sizing.workers.max(1),
        _ => 1,
    };

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": resource_name(run, &component.instance_name),
            "labels": labels,
        },
        "spec": {
            "parallelism": parallelism,
            "completions": parallelism,
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "main",
                        "image": component.spec.image.as_deref().unwrap_or(DEFAULT_IMAGE),
                        "command": ["/bin/sh", "-c", command],
                        "env": env,
                        "resources": resources,
                    }],
                },
            },
        },
    })
}

/// Waits for the queue server, creates the bucket, then idles so the pod
/// stays ready.
fn make_bucket_script(port: u16, bucket: &str) -> String {
    format!(
        "until mc alias set queue http://127.0.0.1:{port} \"$MINIO_ROOT_USER\" \"$MINIO_ROOT_PASSWORD\"; do sleep 1; done\n\
         mc mb --ignore-existing queue/{bucket}\n\
         while true; do sleep 3600; done\n"
    )
}

fn queue_resources(llir: &Llir) -> [Value; 2] {
    let name = resource_name(llir.context.run_name.as_str(), "queue");
    let labels = labels(llir, ComponentKind::Queue, "queue", None);
    let port = llir.queue.port;
    let credentials = json!([
        { "name": "MINIO_ROOT_USER", "value": llir.queue.access_key },
        { "name": "MINIO_ROOT_PASSWORD", "value": llir.queue.secret_key },
    ]);

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "labels": labels },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "containers": [
                        {
                            "name": "queue",
                            "image": QUEUE_IMAGE,
                            "args": ["server", "/data", "--address", format!(":{}", port)],
                            "env": credentials,
                            "ports": [{ "containerPort": port }],
                        },
                        {
                            "name": "make-bucket",
                            "image": QUEUE_CLIENT_IMAGE,
                            "command": ["/bin/sh", "-c", make_bucket_script(port, &llir.queue.bucket)],
                            "env": credentials,
                        },
                    ],
                },
            },
        },
    });

    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "labels": labels },
        "spec": {
            "selector": labels,
            "ports": [{ "port": port, "targetPort": port }],
        },
    });

    [deployment, service]
}
