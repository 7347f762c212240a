use anyhow::{Context, Result};
use tokio::process::Command;

/// Run a system command and return its stdout, failing on a non-zero
/// exit status.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("running {}", program))?;
    if !output.status.success() {
        anyhow::bail!("{} exited with {}", program, output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
