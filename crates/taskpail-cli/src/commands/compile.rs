//! `compile`, `up` and `down`.

use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use taskpail_compiler::lower::{ENV_QUEUE_BUCKET, ENV_RUN_NAME};
use taskpail_compiler::options::DEFAULT_MAX_WORKERS_PER_COMPONENT;
use taskpail_compiler::{lower, parse, CompileOptions, QueueProfiles};
use taskpail_core::{Llir, QueueSpec, RunContext, RunName};
use tracing::info;
use uuid::Uuid;

use crate::backend::{self, manifest};
use crate::context::{
    TargetArgs, ENV_RUN_QUEUE_ACCESS_KEY_ID, ENV_RUN_QUEUE_ENDPOINT,
    ENV_RUN_QUEUE_SECRET_ACCESS_KEY,
};

/// Access key of queues provisioned alongside a run.
const AUTO_QUEUE_ACCESS_KEY: &str = "taskpail";

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Spec files, each a stream of YAML documents
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Application name; defaults to the first file's stem
    #[arg(long)]
    pub name: Option<String>,

    /// Run name; generated when absent
    #[arg(long = "run", env = ENV_RUN_NAME)]
    pub run_name: Option<String>,

    /// Bucket of the run queue; defaults to the run name
    #[arg(long, env = ENV_QUEUE_BUCKET)]
    pub bucket: Option<String>,

    /// Queue-access profiles referenced by datasets and dispatchers
    #[arg(long, env = "TASKPAIL_PROFILES")]
    pub profiles: Option<PathBuf>,

    /// Use an existing queue instead of provisioning one with the run
    #[arg(long = "queue-endpoint", env = ENV_RUN_QUEUE_ENDPOINT)]
    pub queue_endpoint: Option<String>,

    #[arg(long, env = ENV_RUN_QUEUE_ACCESS_KEY_ID, hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, env = ENV_RUN_QUEUE_SECRET_ACCESS_KEY, hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Split worker pools into components of at most this many workers
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS_PER_COMPONENT)]
    pub max_workers_per_component: u32,

    /// Worker count of every worker application
    #[arg(long)]
    pub workers: Option<u32>,

    /// Image for components whose application names none
    #[arg(long)]
    pub image: Option<String>,

    /// Fail when any document could not be decoded
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct UpArgs {
    #[command(flatten)]
    pub compile: CompileArgs,

    #[command(flatten)]
    pub target: TargetArgs,
}

/// Parse and lower the application files.
pub fn build(args: &CompileArgs, verbose: bool) -> Result<Llir, Box<dyn Error>> {
    let mut yamls = String::new();
    for file in &args.files {
        let text = std::fs::read_to_string(file)
            .map_err(|e| format!("{}: {}", file.display(), e))?;
        yamls.push_str(&text);
        yamls.push_str("\n---\n");
    }

    let parsed = parse(&yamls);
    for diagnostic in &parsed.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
    if args.strict && parsed.has_diagnostics() {
        return Err(format!("{} document(s) could not be decoded", parsed.diagnostics.len()).into());
    }

    let name = args
        .name
        .clone()
        .or_else(|| {
            args.files
                .first()
                .and_then(|f| f.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "taskpail".to_string());

    let run_name = match &args.run_name {
        Some(run) => RunName::new(run.as_str()),
        None => RunName::generate(&name),
    };
    let bucket = args.bucket.clone().unwrap_or_else(|| run_name.to_string());
    let run = RunContext::new(run_name, bucket);
    let queue = queue_spec(args, &run);

    let mut opts = CompileOptions {
        verbose,
        workers: args.workers,
        default_image: args.image.clone(),
        ..Default::default()
    }
    .with_max_workers_per_component(args.max_workers_per_component);
    if let Some(path) = &args.profiles {
        opts = opts.with_profiles(QueueProfiles::load(path)?);
    }

    let llir = lower(&name, &run, &parsed.into_model(), &queue, &opts)?;
    info!(
        run = %llir.context.run_name,
        components = llir.components.len(),
        workers = llir.total_workers(),
        "compiled"
    );
    Ok(llir)
}

/// The queue a run uses: an existing endpoint, or one provisioned with it.
fn queue_spec(args: &CompileArgs, run: &RunContext) -> QueueSpec {
    match &args.queue_endpoint {
        Some(endpoint) => QueueSpec {
            auto: false,
            bucket: run.bucket.clone(),
            endpoint: endpoint.clone(),
            port: run.queue_port,
            access_key: args.access_key_id.clone().unwrap_or_default(),
            secret_key: args.secret_access_key.clone().unwrap_or_default(),
        },
        None => QueueSpec {
            auto: true,
            bucket: run.bucket.clone(),
            endpoint: format!(
                "http://{}:{}",
                manifest::resource_name(run.run_name.as_str(), "queue"),
                run.queue_port
            ),
            port: run.queue_port,
            access_key: AUTO_QUEUE_ACCESS_KEY.to_string(),
            secret_key: Uuid::new_v4().simple().to_string(),
        },
    }
}

pub fn compile(args: CompileArgs, verbose: bool) -> Result<(), Box<dyn Error>> {
    let llir = build(&args, verbose)?;
    backend::print::write_documents(manifest::render(&llir)?.into_iter())?;
    Ok(())
}

pub async fn up(args: UpArgs, verbose: bool) -> Result<(), Box<dyn Error>> {
    let backend = backend::new(&args.target.target)?;
    let llir = build(&args.compile, verbose)?;
    backend
        .apply(&llir, &args.target.namespace, &args.target.context)
        .await?;
    eprintln!("run {} is up", llir.context.run_name);
    Ok(())
}

pub async fn down(args: UpArgs, verbose: bool) -> Result<(), Box<dyn Error>> {
    if args.compile.run_name.is_none() {
        return Err("down needs the run name (--run)".into());
    }
    let backend = backend::new(&args.target.target)?;
    let llir = build(&args.compile, verbose)?;
    backend
        .delete(&llir, &args.target.namespace, &args.target.context)
        .await?;
    eprintln!("run {} is down", llir.context.run_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use taskpail_core::ComponentKind;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        compile: CompileArgs,
    }

    fn spec_file(name: &str, yaml: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("taskpail-{}-{}.yaml", name, std::process::id()));
        std::fs::write(&path, yaml).unwrap();
        path
    }

    const SPEC: &str = "\
kind: Application
metadata: { name: work }
spec: { role: worker, command: ./work.sh }
---
kind: WorkerPool
metadata: { name: pool1 }
spec: { workers: { count: 3 } }
";

    #[test]
    fn test_build_with_auto_queue() {
        let file = spec_file("auto", SPEC);
        let cli = TestCli::parse_from([
            "t",
            file.to_str().unwrap(),
            "--run",
            "r1",
            "--max-workers-per-component",
            "2",
        ]);
        let mut args = cli.compile;
        args.queue_endpoint = None;
        args.bucket = None;

        let llir = build(&args, false).unwrap();
        assert_eq!(llir.context.run_name.as_str(), "r1");
        assert_eq!(llir.context.bucket, "r1");
        assert!(llir.queue.auto);
        assert_eq!(llir.queue.endpoint, "http://r1-queue:9000");
        assert_eq!(llir.components_of(ComponentKind::Workers).count(), 2);
        assert_eq!(llir.components_of(ComponentKind::WorkStealer).count(), 1);
        assert_eq!(llir.app_name, format!("taskpail-auto-{}", std::process::id()));
    }

    #[test]
    fn test_strict_rejects_diagnostics() {
        let file = spec_file("strict", "kind: WorkerPool\nmetadata: { name: p }\nspec: 7\n");
        let cli = TestCli::parse_from(["t", file.to_str().unwrap(), "--run", "r", "--strict"]);
        assert!(build(&cli.compile, false).is_err());

        let cli = TestCli::parse_from(["t", file.to_str().unwrap(), "--run", "r"]);
        assert!(build(&cli.compile, false).is_ok());
    }

    #[test]
    fn test_existing_queue() {
        let file = spec_file("existing", SPEC);
        let cli = TestCli::parse_from([
            "t",
            file.to_str().unwrap(),
            "--run",
            "r",
            "--queue-endpoint",
            "http://minio:9000",
            "--access-key-id",
            "ak",
            "--secret-access-key",
            "sk",
        ]);
        let llir = build(&cli.compile, false).unwrap();
        assert!(!llir.queue.auto);
        assert_eq!(llir.queue.endpoint, "http://minio:9000");
        assert_eq!(llir.queue.access_key, "ak");
    }
}
