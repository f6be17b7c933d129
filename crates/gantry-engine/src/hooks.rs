//! Hook execution — shell command lists at fixed lifecycle points.
//!
//! A hook is written to a throwaway `<appID>_<phase>.sh` script and run
//! with `sh`, inheriting the process environment and forwarding
//! stdout/stderr. The script file is removed on every exit path; a
//! non-zero exit fails the application run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Removes the hook script when the run scope ends, error paths included.
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Run a hook command list via a temporary shell script named `file_name`.
pub async fn run_hook(commands: &[String], file_name: &str) -> EngineResult<()> {
    if commands.is_empty() {
        debug!(file = file_name, "hook has nothing to run, skipping");
        return Ok(());
    }

    info!(file = file_name, commands = commands.len(), "running hook");
    let script = format!("#!/bin/sh\n\n{}", commands.join("\n"));
    write_executable(Path::new(file_name), &script)?;
    let _guard = RemoveOnDrop(PathBuf::from(file_name));

    let status = Command::new("sh")
        .arg(file_name)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;

    if !status.success() {
        return Err(EngineError::HookFailed {
            file: file_name.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }

    Ok(())
}

#[cfg(unix)]
fn write_executable(path: &Path, script: &str) -> EngineResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, script)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_executable(path: &Path, script: &str) -> EngineResult<()> {
    std::fs::write(path, script)?;
    Ok(())
}
