//! Dispatch-style resources: each lowers to a dispatcher component that
//! drives the queue CLI.

use taskpail_core::hlir::{Hlir, ParameterSweep, ProcessS3Objects};
use taskpail_core::llir::{Component, ComponentKind};
use taskpail_core::RunContext;

use super::run_env;
use crate::error::CompileError;
use crate::options::CompileOptions;

pub(crate) fn lower_all(
    run: &RunContext,
    model: &Hlir,
    opts: &CompileOptions,
) -> Result<Vec<Component>, CompileError> {
    let mut components = Vec::new();
    for sweep in &model.parameter_sweeps {
        components.push(lower_sweep(run, sweep, opts));
    }
    for job in &model.process_s3_objects {
        components.push(lower_process_s3_objects(run, job, opts)?);
    }
    Ok(components)
}

fn lower_sweep(run: &RunContext, sweep: &ParameterSweep, opts: &CompileOptions) -> Component {
    let spec = &sweep.spec;
    let mut command = format!(
        "$TASKPAIL_EXE queue sweep {} {} --step {} --interval {}",
        spec.min, spec.max, spec.step, spec.interval
    );
    if spec.wait {
        command.push_str(" --wait");
    }
    command.push_str(&format!(" --verbose={}", opts.verbose));

    let mut c = Component::new(ComponentKind::Dispatcher, sweep.metadata.name.clone())
        .with_command(command);
    c.spec.image = opts.default_image.clone();
    c.spec.env = run_env(run);
    c
}

fn lower_process_s3_objects(
    run: &RunContext,
    job: &ProcessS3Objects,
    opts: &CompileOptions,
) -> Result<Component, CompileError> {
    let resource = format!("ProcessS3Objects '{}'", job.metadata.name);
    let origin = opts
        .profiles
        .resolve(&job.spec.rclone.remote_name, &resource, run)?;

    let command = format!(
        "$TASKPAIL_EXE queue add-s3 {} --repeat {} --verbose={}",
        job.spec.path, job.spec.repeat, opts.verbose
    );

    let mut c = Component::new(ComponentKind::Dispatcher, job.metadata.name.clone())
        .with_command(command)
        .with_env("taskpail_queue_endpoint", origin.endpoint)
        .with_env("taskpail_queue_accessKeyID", origin.access_key)
        .with_env("taskpail_queue_secretAccessKey", origin.secret_key);
    c.spec.image = opts.default_image.clone();
    c.spec.env.extend(run_env(run));
    Ok(c)
}
