//! Lowering: HLIR → LLIR.
//!
//! Components are emitted in a fixed order: one per application, then one
//! per dispatch-style resource, then the worker-pool components, and finally
//! a single work stealer whenever any worker component exists. An application
//! run by a worker pool is lowered through that pool only, so it never
//! consumes a second inbox. The first failing resource aborts the whole
//! compile.

mod application;
mod dispatch;
mod workerpool;

use std::collections::BTreeMap;

use taskpail_core::hlir::Hlir;
use taskpail_core::llir::{Component, ComponentKind, Llir};
use taskpail_core::{QueueSpec, RunContext};
use tracing::{debug, info};

use crate::error::CompileError;
use crate::options::CompileOptions;

pub use application::{lower_application, sizing_for};

/// Run identity variables every component receives.
pub const ENV_RUN_NAME: &str = "TASKPAIL_RUN_NAME";
pub const ENV_STEP: &str = "TASKPAIL_STEP";
pub const ENV_QUEUE_BUCKET: &str = "TASKPAIL_QUEUE_BUCKET";
/// Pool whose inbox a worker component consumes.
pub const ENV_POOL: &str = "TASKPAIL_POOL";
/// Comma-separated pools the work stealer assigns to.
pub const ENV_POOLS: &str = "TASKPAIL_POOLS";

/// Instance name of the work stealer component.
pub const WORKSTEALER_NAME: &str = "workstealer";

/// Lower a parsed model into a validated component topology.
pub fn lower(
    name: &str,
    run: &RunContext,
    model: &Hlir,
    queue: &QueueSpec,
    opts: &CompileOptions,
) -> Result<Llir, CompileError> {
    let mut components = Vec::new();

    let pooled = workerpool::pooled_applications(model);
    for app in &model.applications {
        if pooled.contains(&app.name()) {
            debug!(application = %app.name(), "application runs in a worker pool");
            continue;
        }
        components.push(lower_application(run, app, opts)?);
    }
    components.extend(dispatch::lower_all(run, model, opts)?);
    components.extend(workerpool::lower_all(run, model, opts)?);

    let mut pools: Vec<String> = Vec::new();
    for pool in components.iter().filter_map(|c| c.pool.as_ref()) {
        if !pools.contains(pool) {
            pools.push(pool.clone());
        }
    }
    if !pools.is_empty() {
        components.push(workstealer(run, &pools, opts));
    }

    let llir = Llir {
        app_name: name.to_string(),
        context: run.clone(),
        queue: queue.clone(),
        components,
        others: model.others.clone(),
    };
    llir.validate()?;

    for c in &llir.components {
        debug!(
            kind = %c.kind,
            instance = %c.instance_name,
            workers = c.sizing.workers,
            "lowered component"
        );
    }
    info!(
        run = %run.run_name,
        kinds = ?llir.component_kinds(),
        others = llir.others.len(),
        "lowered topology"
    );

    Ok(llir)
}

/// Environment shared by every component of a run.
pub(crate) fn run_env(run: &RunContext) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ENV_RUN_NAME.to_string(), run.run_name.to_string()),
        (ENV_STEP.to_string(), run.step.to_string()),
        (ENV_QUEUE_BUCKET.to_string(), run.bucket.clone()),
    ])
}

fn workstealer(run: &RunContext, pools: &[String], opts: &CompileOptions) -> Component {
    let mut c = Component::new(ComponentKind::WorkStealer, WORKSTEALER_NAME)
        .with_command(format!("$TASKPAIL_EXE workstealer --verbose={}", opts.verbose));
    c.spec.image = opts.default_image.clone();
    c.spec.env = run_env(run);
    c.spec.env.insert(ENV_POOLS.to_string(), pools.join(","));
    c
}
