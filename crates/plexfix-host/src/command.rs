use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use plexfix_core::CommandOutput;
use tracing::debug;

/// Run to completion with stdin closed, capturing both streams.
pub(crate) fn capture(command: &mut Command) -> Result<CommandOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!(
        %program,
        args = ?command.get_args().map(|arg| arg.to_string_lossy()).collect::<Vec<_>>(),
        "exec"
    );
    let output = command
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to execute {program}"))?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`capture`], but a non-zero exit becomes an error carrying the output.
pub(crate) fn check(command: &mut Command) -> Result<CommandOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = capture(command)?;
    if output.success {
        Ok(output)
    } else {
        let detail = output.combined();
        Err(anyhow!(
            "{program} exited unsuccessfully{}",
            if detail.is_empty() { String::new() } else { format!(": {detail}") }
        ))
    }
}
