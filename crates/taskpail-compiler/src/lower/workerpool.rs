//! Worker pools: resolve the application a pool runs and split the requested
//! parallelism into components the platform can schedule.

use taskpail_core::hlir::{Application, Hlir, WorkerPool};
use taskpail_core::llir::{Component, ComponentKind};
use taskpail_core::RunContext;
use tracing::debug;

use super::application::{application_command, application_env};
use super::{sizing_for, ENV_POOL};
use crate::error::CompileError;
use crate::options::CompileOptions;

pub(crate) fn lower_all(
    run: &RunContext,
    model: &Hlir,
    opts: &CompileOptions,
) -> Result<Vec<Component>, CompileError> {
    let mut components = Vec::new();
    for pool in &model.worker_pools {
        components.extend(lower_pool(run, model, pool, opts)?);
    }
    Ok(components)
}

/// Names of the applications some worker pool runs.
pub(crate) fn pooled_applications(model: &Hlir) -> Vec<&str> {
    model
        .worker_pools
        .iter()
        .filter_map(|pool| resolve_application(model, pool).ok())
        .map(|app| app.name())
        .collect()
}

fn resolve_application<'a>(
    model: &'a Hlir,
    pool: &WorkerPool,
) -> Result<&'a Application, CompileError> {
    if let Some(app_ref) = &pool.spec.application {
        return model
            .application(&app_ref.name)
            .ok_or_else(|| CompileError::UnknownApplication {
                pool: pool.name().to_string(),
                application: app_ref.name.clone(),
            });
    }

    let mut workers = model.worker_applications();
    match (workers.next(), workers.next()) {
        (Some(app), None) => Ok(app),
        _ => Err(CompileError::AmbiguousApplication(pool.name().to_string())),
    }
}

fn lower_pool(
    run: &RunContext,
    model: &Hlir,
    pool: &WorkerPool,
    opts: &CompileOptions,
) -> Result<Vec<Component>, CompileError> {
    let app = resolve_application(model, pool)?;
    let command = application_command(run, app, opts)?;

    let mut env = application_env(run, app);
    env.extend(pool.spec.env.clone());
    env.insert(ENV_POOL.to_string(), pool.name().to_string());

    let size = pool
        .spec
        .workers
        .size
        .or(app.spec.min_size)
        .unwrap_or_default();

    let counts = split_workers(pool.spec.workers.count, opts.max_workers_per_component);
    let split = counts.len() > 1;
    debug!(
        pool = %pool.name(),
        application = %app.name(),
        components = counts.len(),
        "lowering worker pool"
    );

    Ok(counts
        .into_iter()
        .enumerate()
        .map(|(i, workers)| {
            let name = if split {
                format!("{}-{}", pool.name(), i)
            } else {
                pool.name().to_string()
            };
            let mut c = Component::new(ComponentKind::Workers, name).with_command(command.clone());
            c.pool = Some(pool.name().to_string());
            c.sizing = sizing_for(size);
            c.sizing.workers = workers;
            c.spec.image = app.spec.image.clone().or_else(|| opts.default_image.clone());
            c.spec.env = env.clone();
            c
        })
        .collect())
}

/// Split a requested worker count into chunks of at most `cap`.
///
/// A request of zero is rounded up to one worker.
fn split_workers(requested: u32, cap: u32) -> Vec<u32> {
    let cap = cap.max(1);
    let mut remaining = requested.max(1);
    let mut counts = Vec::new();
    while remaining > 0 {
        let n = remaining.min(cap);
        counts.push(n);
        remaining -= n;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const APPS: &str = r#"
kind: Application
metadata: { name: w1 }
spec: { role: worker, command: ./w1.sh, env: { FROM: app } }
"#;

    fn lower_yaml(yaml: &str, opts: &CompileOptions) -> Result<Vec<Component>, CompileError> {
        lower_all(&RunContext::new("r", "b"), &parse(yaml).into_model(), opts)
    }

    #[test]
    fn test_split_workers() {
        assert_eq!(split_workers(0, 16), vec![1]);
        assert_eq!(split_workers(5, 16), vec![5]);
        assert_eq!(split_workers(16, 16), vec![16]);
        assert_eq!(split_workers(40, 16), vec![16, 16, 8]);
        assert_eq!(split_workers(3, 0), vec![1, 1, 1]);
    }

    #[test]
    fn test_pool_split_and_naming() {
        let yaml = format!(
            "{}---\nkind: WorkerPool\nmetadata: {{ name: p }}\nspec: {{ workers: {{ count: 5 }}, env: {{ FROM: pool }} }}\n",
            APPS
        );
        let opts = CompileOptions::default().with_max_workers_per_component(2);
        let components = lower_yaml(&yaml, &opts).unwrap();

        let names: Vec<_> = components.iter().map(|c| c.instance_name.as_str()).collect();
        assert_eq!(names, vec!["p-0", "p-1", "p-2"]);
        let workers: Vec<_> = components.iter().map(|c| c.sizing.workers).collect();
        assert_eq!(workers, vec![2, 2, 1]);

        for c in &components {
            assert_eq!(c.pool.as_deref(), Some("p"));
            assert_eq!(c.spec.command, "./w1.sh");
            assert_eq!(c.spec.env.get(ENV_POOL).map(String::as_str), Some("p"));
            assert_eq!(c.spec.env.get("FROM").map(String::as_str), Some("pool"));
        }
    }

    #[test]
    fn test_zero_count_rounds_up() {
        let yaml = format!(
            "{}---\nkind: WorkerPool\nmetadata: {{ name: p }}\nspec: {{ workers: {{ count: 0 }} }}\n",
            APPS
        );
        let components = lower_yaml(&yaml, &CompileOptions::default()).unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].instance_name, "p");
        assert_eq!(components[0].sizing.workers, 1);
    }

    #[test]
    fn test_pooled_applications() {
        let yaml = format!(
            "{}---\nkind: Application\nmetadata: {{ name: d }}\nspec: {{ command: ./d.sh }}\n---\nkind: WorkerPool\nmetadata: {{ name: p }}\n",
            APPS
        );
        let model = parse(&yaml).into_model();
        assert_eq!(pooled_applications(&model), vec!["w1"]);
    }

    #[test]
    fn test_unknown_application() {
        let yaml = format!(
            "{}---\nkind: WorkerPool\nmetadata: {{ name: p }}\nspec: {{ application: {{ name: nope }} }}\n",
            APPS
        );
        let err = lower_yaml(&yaml, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownApplication { .. }));
    }

    #[test]
    fn test_ambiguous_application() {
        let yaml = "kind: WorkerPool\nmetadata: { name: p }\n";
        let err = lower_yaml(yaml, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::AmbiguousApplication(ref p) if p == "p"));
    }
}
