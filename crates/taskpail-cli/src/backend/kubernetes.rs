//! Kubernetes backend, driven through `kubectl`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskpail_core::{
    ComponentKind, ComponentUpdate, Llir, Message, QueueStats, RunContext, RunEvent, Utilization,
    WorkerStatus, WorkerUtilization,
};
use taskpail_queue::QueueClient;
use taskpail_status::{QueueStatsPoller, StatusError, Streamer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manifest::{self, LABEL_COMPONENT, LABEL_RUN};
use super::{Backend, BackendError};

/// Buffer of each stream channel.
const STREAM_BUFFER: usize = 64;

/// Placeholder kubectl prints for absent custom columns.
const NONE: &str = "<none>";

const KINDS: [ComponentKind; 5] = [
    ComponentKind::Queue,
    ComponentKind::Dispatcher,
    ComponentKind::WorkStealer,
    ComponentKind::Workers,
    ComponentKind::Shell,
];

pub struct Kubernetes {
    kubectl: String,
}

impl Default for Kubernetes {
    fn default() -> Self {
        Self::new()
    }
}

impl Kubernetes {
    pub fn new() -> Self {
        Self {
            kubectl: std::env::var("TASKPAIL_KUBECTL").unwrap_or_else(|_| "kubectl".to_string()),
        }
    }

    async fn run(&self, op: &str, yaml: &str, namespace: &str, context: &str) -> Result<(), BackendError> {
        let yaml = yaml.trim();
        if yaml.is_empty() {
            // kubectl rejects an empty object list
            return Ok(());
        }

        let mut cmd = Command::new(&self.kubectl);
        cmd.arg(op).arg("-f").arg("-");
        if !namespace.is_empty() {
            cmd.arg("-n").arg(namespace);
        }
        if !context.is_empty() {
            cmd.arg(format!("--context={}", context));
        }
        if op == "delete" {
            cmd.arg("--ignore-not-found");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        debug!(command = ?cmd, "running kubectl");
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(yaml.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(BackendError::Command {
                command: format!("{} {}", self.kubectl, op),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for Kubernetes {
    async fn apply(&self, llir: &Llir, namespace: &str, context: &str) -> Result<(), BackendError> {
        let docs = manifest::render(llir)?;
        for doc in &docs {
            self.run("apply", doc, namespace, context).await?;
        }
        info!(run = %llir.context.run_name, resources = docs.len(), "applied run");
        Ok(())
    }

    async fn delete(&self, llir: &Llir, namespace: &str, context: &str) -> Result<(), BackendError> {
        let docs = manifest::render(llir)?;
        for doc in docs.iter().rev() {
            self.run("delete", doc, namespace, context).await?;
        }
        info!(run = %llir.context.run_name, resources = docs.len(), "deleted run");
        Ok(())
    }

    fn streamer(&self, run: &RunContext, namespace: &str, client: QueueClient) -> Box<dyn Streamer> {
        Box::new(KubernetesStreamer {
            kubectl: self.kubectl.clone(),
            namespace: namespace.to_string(),
            run: run.clone(),
            client,
        })
    }
}

struct KubernetesStreamer {
    kubectl: String,
    namespace: String,
    run: RunContext,
    client: QueueClient,
}

impl KubernetesStreamer {
    fn selector(&self, kind: Option<ComponentKind>) -> String {
        let mut selector = format!("{}={}", LABEL_RUN, self.run.run_name);
        if let Some(kind) = kind {
            selector.push_str(&format!(",{}={}", LABEL_COMPONENT, kind.as_str()));
        }
        selector
    }

    fn kubectl(&self) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        cmd.arg("-n").arg(&self.namespace);
        cmd
    }
}

#[async_trait]
impl Streamer for KubernetesStreamer {
    async fn run_events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RunEvent>, StatusError> {
        let mut cmd = self.kubectl();
        cmd.args([
            "get",
            "events",
            "--watch",
            "--no-headers",
            "-o",
            "custom-columns=REASON:.reason,OBJECT:.involvedObject.name,MESSAGE:.message",
        ]);
        let mut lines = spawn_lines(cmd, cancel.clone())?;

        let prefix = manifest::resource_name(self.run.run_name.as_str(), "");
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                let Some(event) = parse_event_line(&line) else {
                    continue;
                };
                if !event.object.starts_with(&prefix) {
                    continue;
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn component_updates(
        &self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<ComponentUpdate>, mpsc::Receiver<Message>), StatusError> {
        let mut cmd = self.kubectl();
        cmd.args(["get", "pods", "--watch", "--no-headers", "-l"])
            .arg(self.selector(None))
            .arg("-o")
            .arg(format!(
                "custom-columns=NAME:.metadata.name,COMPONENT:.metadata.labels.{},POOL:.metadata.labels.{},PHASE:.status.phase,DELETED:.metadata.deletionTimestamp",
                escape_label(LABEL_COMPONENT),
                escape_label(manifest::LABEL_POOL),
            ));
        let mut lines = spawn_lines(cmd, cancel.clone())?;

        let (update_tx, update_rx) = mpsc::channel(STREAM_BUFFER);
        let (message_tx, message_rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut last: HashMap<String, WorkerStatus> = HashMap::new();
            while let Some(line) = lines.recv().await {
                let Some(update) = parse_pod_line(&line) else {
                    continue;
                };

                if last.insert(update.instance.clone(), update.status) != Some(update.status) {
                    let message = Message::new(&update.instance, format!("{:?}", update.status));
                    // Messages are best-effort; a full channel drops them.
                    let _ = message_tx.try_send(message);
                }
                if update_tx.send(update).await.is_err() {
                    break;
                }
            }
        });
        Ok((update_rx, message_rx))
    }

    async fn utilization(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Utilization>, StatusError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let kubectl = self.kubectl.clone();
        let namespace = self.namespace.clone();
        let selectors: Vec<(ComponentKind, String)> =
            KINDS.iter().map(|k| (*k, self.selector(Some(*k)))).collect();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let mut sample = Utilization::default();
                for (kind, selector) in &selectors {
                    let output = Command::new(&kubectl)
                        .args(["top", "pods", "--no-headers", "-n"])
                        .arg(&namespace)
                        .arg("-l")
                        .arg(selector)
                        .output()
                        .await;
                    match output {
                        Ok(output) if output.status.success() => {
                            let stdout = String::from_utf8_lossy(&output.stdout);
                            sample
                                .workers
                                .extend(stdout.lines().filter_map(|l| parse_top_line(l, *kind)));
                        }
                        Ok(output) => debug!(
                            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                            "kubectl top failed"
                        ),
                        Err(e) => warn!(error = %e, "kubectl top failed"),
                    }
                }

                if tx.send(sample).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn queue_stats(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<QueueStats>, StatusError> {
        Ok(QueueStatsPoller::new(self.client.clone(), self.run.clone()).spawn(
            interval,
            STREAM_BUFFER,
            cancel,
        ))
    }

    async fn component_logs(
        &self,
        component: ComponentKind,
        follow: bool,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, StatusError> {
        let mut cmd = self.kubectl();
        cmd.args(["logs", "--tail=-1", "--prefix", "--max-log-requests=32", "-l"])
            .arg(self.selector(Some(component)));
        if follow {
            cmd.arg("-f");
        }
        spawn_lines(cmd, cancel)
    }
}

/// Run `cmd` and stream its stdout line by line. The process is killed when
/// `cancel` fires or the receiver goes away.
fn spawn_lines(mut cmd: Command, cancel: CancellationToken) -> Result<mpsc::Receiver<String>, StatusError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StatusError::Stream("no stdout".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    debug!(stderr = %line.trim(), "kubectl stderr");
                }
            }
        });
    }

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read kubectl output");
                    break;
                }
            }
        }
        let _ = child.kill().await;
    });
    Ok(rx)
}

/// `taskpail.io/pool` as a custom-columns path segment.
fn escape_label(label: &str) -> String {
    label.replace('.', "\\.")
}

fn component_kind(label: &str) -> Option<ComponentKind> {
    KINDS.iter().copied().find(|k| k.as_str() == label)
}

/// One line of the pod watch: name, component, pool, phase, deletion time.
fn parse_pod_line(line: &str) -> Option<ComponentUpdate> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [name, component, pool, phase, deleted] = fields.as_slice() else {
        return None;
    };

    let kind = component_kind(component)?;
    let status = if *deleted != NONE {
        WorkerStatus::Terminating
    } else {
        WorkerStatus::from_phase(phase)
    };

    let update = ComponentUpdate::new(kind, *name, status);
    Some(if *pool != NONE {
        update.with_pool(*pool)
    } else {
        update
    })
}

/// One line of the event watch: reason, object, free-text message.
fn parse_event_line(line: &str) -> Option<RunEvent> {
    let (reason, rest) = line.trim().split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (object, message) = rest
        .split_once(char::is_whitespace)
        .map(|(o, m)| (o, m.trim()))
        .unwrap_or((rest, ""));
    Some(RunEvent {
        timestamp: Utc::now(),
        reason: reason.to_string(),
        object: object.to_string(),
        message: message.to_string(),
    })
}

/// One line of `kubectl top pods`: name, cpu, memory.
fn parse_top_line(line: &str, component: ComponentKind) -> Option<WorkerUtilization> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [name, cpu, memory] = fields.as_slice() else {
        return None;
    };
    Some(WorkerUtilization {
        instance: name.to_string(),
        component,
        cpu_millis: parse_cpu(cpu)?,
        memory_bytes: parse_memory(memory)?,
    })
}

/// `250m` is 250 millicores, `2` is 2000.
fn parse_cpu(quantity: &str) -> Option<u64> {
    match quantity.strip_suffix('m') {
        Some(millis) => millis.parse().ok(),
        None => quantity.parse::<f64>().ok().map(|cores| (cores * 1000.0) as u64),
    }
}

/// Kubernetes memory quantity in bytes.
fn parse_memory(quantity: &str) -> Option<u64> {
    const SUFFIXES: [(&str, u64); 8] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    for (suffix, multiplier) in SUFFIXES {
        if let Some(n) = quantity.strip_suffix(suffix) {
            return n.parse::<u64>().ok().map(|n| n * multiplier);
        }
    }
    quantity.parse().ok()
}
