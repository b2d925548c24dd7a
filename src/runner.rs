use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

/// Runs `argv` to completion and returns everything it wrote to stdout.
///
/// Blocks the calling thread for as long as the child runs. A non-zero exit
/// is an error carrying the child's stderr.
pub fn run(argv: &[String]) -> Result<Vec<u8>> {
    let (program, args) = argv.split_first().context("no command to run")?;
    let cmdline = argv.join(" ");
    debug!(target: "afz::runner", "running {cmdline}");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to start command: {cmdline}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            bail!("command `{cmdline}` failed: {}", output.status);
        }
        bail!("command `{cmdline}` failed: {}: {stderr}", output.status);
    }

    info!(
        target: "afz::runner",
        "{cmdline}: {} bytes of output",
        output.stdout.len()
    );
    Ok(output.stdout)
}
