//! `needs`: prepare a dependency and print the directory to put on `PATH`.
//!
//! Generated application commands run
//! `PATH=$($TASKPAIL_EXE needs <name> ...):$PATH <command>`, so stdout must
//! carry the bin directory and nothing else.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Args;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info};

const ENV_CACHE_DIR: &str = "TASKPAIL_CACHE_DIR";

#[derive(Args)]
pub struct NeedsArgs {
    /// Dependency name (python)
    pub name: String,

    /// Version, e.g. 3.12
    pub version: Option<String>,

    /// Base64-encoded requirements file
    #[arg(long)]
    pub requirements: Option<String>,
}

pub async fn run(args: NeedsArgs, verbose: bool) -> Result<(), Box<dyn Error>> {
    let requirements = match &args.requirements {
        Some(encoded) => Some(String::from_utf8(BASE64.decode(encoded.trim())?)?),
        None => None,
    };
    let version = args.version.as_deref().unwrap_or("");

    let bin = match args.name.as_str() {
        "python" => python(version, requirements.as_deref(), verbose).await?,
        other => return Err(format!("unsupported needs '{}'", other).into()),
    };

    println!("{}", bin.display());
    Ok(())
}

fn cache_root() -> PathBuf {
    std::env::var_os(ENV_CACHE_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("taskpail").join("needs"))
}

/// Directory name for one resolved dependency. Identical inputs share it
/// across builds and hosts.
fn env_dir_name(name: &str, version: &str, requirements: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(requirements.unwrap_or("").as_bytes());
    let digest = hex::encode(hasher.finalize());
    let version = if version.is_empty() { "default" } else { version };
    format!("{}-{}-{}", name, version, &digest[..16])
}

fn is_cached(bin: &Path) -> bool {
    bin.join("python").exists()
}

fn python_interpreter(version: &str) -> String {
    if version.is_empty() {
        "python3".to_string()
    } else {
        format!("python{}", version)
    }
}

async fn python(
    version: &str,
    requirements: Option<&str>,
    verbose: bool,
) -> Result<PathBuf, Box<dyn Error>> {
    let venv = cache_root().join(env_dir_name("python", version, requirements));
    let bin = venv.join("bin");
    if is_cached(&bin) {
        debug!(venv = %venv.display(), "reusing python environment");
        return Ok(bin);
    }

    tokio::fs::create_dir_all(&venv).await?;
    info!(venv = %venv.display(), version, "creating python environment");
    let venv_arg = venv.to_string_lossy().into_owned();
    run_quiet(&python_interpreter(version), &["-m", "venv", venv_arg.as_str()], verbose).await?;

    if let Some(requirements) = requirements {
        let file = venv.join("requirements.txt");
        tokio::fs::write(&file, requirements).await?;
        let pip = bin.join("pip").to_string_lossy().into_owned();
        let file_arg = file.to_string_lossy().into_owned();
        run_quiet(&pip, &["install", "-r", file_arg.as_str()], verbose).await?;
    }
    Ok(bin)
}

/// Run a setup command. Its output goes to stderr when verbose, since
/// stdout is reserved for the result.
async fn run_quiet(program: &str, args: &[&str], verbose: bool) -> Result<(), Box<dyn Error>> {
    let sink = || if verbose { Stdio::from(std::io::stderr()) } else { Stdio::null() };
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(sink())
        .stderr(sink())
        .status()
        .await?;
    if !status.success() {
        return Err(format!("{} {} failed: {}", program, args.join(" "), status).into());
    }
    Ok(())
}
