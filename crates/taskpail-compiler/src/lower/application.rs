//! Application lowering: role mapping, environment wiring and the command
//! prefixes that resolve `needs` and copy datasets in.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use taskpail_core::hlir::{Application, Dataset, Needs, TShirtSize};
use taskpail_core::llir::{Component, ComponentKind, Sizing};
use taskpail_core::RunContext;
use tracing::debug;

use super::run_env;
use crate::error::CompileError;
use crate::options::CompileOptions;

/// Lower one application into a single component.
///
/// A `worker` role becomes a worker component consuming the pool named after
/// the application; every other role becomes a dispatcher.
pub fn lower_application(
    run: &RunContext,
    app: &Application,
    opts: &CompileOptions,
) -> Result<Component, CompileError> {
    let kind = if app.is_worker() {
        ComponentKind::Workers
    } else {
        ComponentKind::Dispatcher
    };

    let mut component = Component::new(kind, app.name());
    component.sizing = sizing_for(app.spec.min_size.unwrap_or_default());
    if kind == ComponentKind::Workers {
        component.pool = Some(app.name().to_string());
        component.sizing.workers = opts.workers.unwrap_or(1).max(1);
    }

    component.spec.image = app.spec.image.clone().or_else(|| opts.default_image.clone());
    component.spec.command = application_command(run, app, opts)?;
    component.spec.env = application_env(run, app);
    if let Some(pool) = &component.pool {
        component.spec.env.insert(super::ENV_POOL.to_string(), pool.clone());
    }

    Ok(component)
}

/// The application's env overlaid with the run identity variables.
pub(crate) fn application_env(
    run: &RunContext,
    app: &Application,
) -> std::collections::BTreeMap<String, String> {
    let mut env = app.spec.env.clone();
    env.extend(run_env(run));
    env
}

/// The application command with `needs` and dataset prefixes applied.
///
/// An application with neither keeps its command untouched.
pub(crate) fn application_command(
    run: &RunContext,
    app: &Application,
    opts: &CompileOptions,
) -> Result<String, CompileError> {
    let mut command = app.spec.command.clone();

    for needs in &app.spec.needs {
        command = needs_prefix(needs, opts.verbose, &command);
    }

    for dataset in &app.spec.datasets {
        if let Some(prefix) = copy_in_prefix(run, app, dataset, opts)? {
            command = format!("{}\n{}", prefix, command);
        }
    }

    Ok(command)
}

fn needs_prefix(needs: &Needs, verbose: bool, command: &str) -> String {
    let mut resolve = format!("$TASKPAIL_EXE needs {}", needs.name);
    if !needs.version.is_empty() {
        resolve.push(' ');
        resolve.push_str(&needs.version);
    }
    if !needs.requirements.is_empty() {
        resolve.push_str(" --requirements ");
        resolve.push_str(&BASE64.encode(needs.requirements.as_bytes()));
        if verbose {
            debug!(needs = %needs.name, "setting requirements for needs");
        }
    }
    format!("PATH=$({} --verbose={}):$PATH {}", resolve, verbose, command)
}

fn copy_in_prefix(
    run: &RunContext,
    app: &Application,
    dataset: &Dataset,
    opts: &CompileOptions,
) -> Result<Option<String>, CompileError> {
    let Some((remote, copy_in)) = dataset.copy_in() else {
        return Ok(None);
    };

    let resource = format!("Application '{}'", app.name());
    let spec = opts.profiles.resolve(remote, &resource, run)?;

    let basename = Path::new(&copy_in.path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| copy_in.path.clone());

    let download = format!(
        "env taskpail_queue_endpoint={} taskpail_queue_accessKeyID={} taskpail_queue_secretAccessKey={} \
         $TASKPAIL_EXE queue download {} {}/{}",
        spec.endpoint, spec.access_key, spec.secret_key, copy_in.path, dataset.name, basename
    );

    Ok(Some(if copy_in.delay > 0 {
        format!("sleep {}\n{}", copy_in.delay, download)
    } else {
        download
    }))
}

/// Resource requests for a sizing hint. `auto` sizes like `sm`.
pub fn sizing_for(size: TShirtSize) -> Sizing {
    let (cpu, memory, gpu) = match size {
        TShirtSize::Xxs => ("100m", "128Mi", 0),
        TShirtSize::Xs => ("250m", "256Mi", 0),
        TShirtSize::Auto | TShirtSize::Sm => ("500m", "512Mi", 0),
        TShirtSize::Md => ("1", "2Gi", 0),
        TShirtSize::Lg => ("2", "4Gi", 0),
        TShirtSize::Xl => ("4", "8Gi", 1),
    };
    Sizing {
        workers: 1,
        cpu: cpu.to_string(),
        memory: memory.to_string(),
        gpu,
    }
}
