//! Host command execution. Every shell-out in the engine — git clone,
//! docker build/run invocations that don't go through the Docker API,
//! nginx config-test/reload — goes through here so timeouts, quoting,
//! and logging stay in one place.

use std::{collections::HashMap, time::Duration};

use anyhow::Context;
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  process::Command as TokioCommand,
  time::timeout,
};

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
  pub stdout: String,
  pub stderr: String,
  pub exit_code: i32,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error("command timed out after {0:?}")]
  CommandTimeout(Duration),
  #[error("command failed with exit code {exit_code}")]
  CommandFailed {
    exit_code: i32,
    stdout: String,
    stderr: String,
  },
  #[error("failed to spawn command: {0:#}")]
  Spawn(#[source] anyhow::Error),
}

/// One shell argument, quoted so its value can never be reinterpreted by
/// the shell. Single-quoted on POSIX (embedded `'` escaped as `'\''`),
/// double-quoted with escaping on Windows.
pub fn quote_arg(arg: &str) -> String {
  #[cfg(windows)]
  {
    let escaped = arg.replace('"', "\"\"");
    format!("\"{escaped}\"")
  }
  #[cfg(not(windows))]
  {
    shell_escape::escape(arg.into()).into_owned()
  }
}

fn build_command_line(program: &str, args: &[&str]) -> String {
  let mut parts = vec![quote_arg(program)];
  parts.extend(args.iter().map(|a| quote_arg(a)));
  parts.join(" ")
}

fn shell_invocation(command_line: &str) -> TokioCommand {
  #[cfg(windows)]
  {
    let mut cmd = TokioCommand::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
  }
  #[cfg(not(windows))]
  {
    let mut cmd = TokioCommand::new("sh");
    cmd.arg("-c").arg(command_line);
    cmd
  }
}

/// Run `program args...` to completion, capturing stdout/stderr. Never
/// logs the command line itself — only `label` at info level.
#[tracing::instrument(name = "run_command", skip(args, env), fields(label))]
pub async fn run(
  label: &str,
  program: &str,
  args: &[&str],
  run_timeout: Duration,
  env: Option<&HashMap<String, String>>,
) -> Result<CommandOutput, CommandError> {
  tracing::info!("running command: {label}");
  let command_line = build_command_line(program, args);
  let mut cmd = shell_invocation(&command_line);
  cmd.kill_on_drop(true);
  cmd
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::piped())
    .stderr(std::process::Stdio::piped());
  if let Some(env) = env {
    cmd.envs(env);
  }

  let child = cmd
    .spawn()
    .context("failed to spawn child process")
    .map_err(CommandError::Spawn)?;

  match timeout(run_timeout, child.wait_with_output()).await {
    Ok(Ok(output)) => {
      let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
      let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
      let exit_code = output.status.code().unwrap_or(-1);
      if exit_code == 0 {
        Ok(CommandOutput { stdout, stderr, exit_code })
      } else {
        Err(CommandError::CommandFailed { exit_code, stdout, stderr })
      }
    }
    Ok(Err(e)) => Err(CommandError::Spawn(anyhow::Error::new(e))),
    Err(_) => Err(CommandError::CommandTimeout(run_timeout)),
  }
}

/// Run `program args...`, invoking `line_callback` with each stdout/stderr
/// line as it is produced, in addition to returning the final output.
#[tracing::instrument(name = "run_command_streaming", skip(args, env, line_callback), fields(label))]
pub async fn run_streaming<F>(
  label: &str,
  program: &str,
  args: &[&str],
  run_timeout: Duration,
  env: Option<&HashMap<String, String>>,
  mut line_callback: F,
) -> Result<CommandOutput, CommandError>
where
  F: FnMut(&str) + Send,
{
  tracing::info!("running command: {label}");
  let command_line = build_command_line(program, args);
  let mut cmd = shell_invocation(&command_line);
  cmd.kill_on_drop(true);
  cmd
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::piped())
    .stderr(std::process::Stdio::piped());
  if let Some(env) = env {
    cmd.envs(env);
  }

  let mut child = cmd
    .spawn()
    .context("failed to spawn child process")
    .map_err(CommandError::Spawn)?;

  let stdout = child.stdout.take().expect("piped stdout");
  let stderr = child.stderr.take().expect("piped stderr");

  let mut stdout_lines = BufReader::new(stdout).lines();
  let mut stderr_lines = BufReader::new(stderr).lines();
  let mut collected_stdout = String::new();
  let mut collected_stderr = String::new();

  let read_fut = async {
    loop {
      tokio::select! {
        line = stdout_lines.next_line() => match line {
          Ok(Some(line)) => {
            line_callback(&line);
            collected_stdout.push_str(&line);
            collected_stdout.push('\n');
          }
          Ok(None) => break,
          Err(_) => break,
        },
        line = stderr_lines.next_line() => match line {
          Ok(Some(line)) => {
            line_callback(&line);
            collected_stderr.push_str(&line);
            collected_stderr.push('\n');
          }
          Ok(None) => continue,
          Err(_) => continue,
        },
      }
    }
    (collected_stdout, collected_stderr)
  };

  let wait_fut = async {
    let (stdout, stderr) = read_fut.await;
    let status = child.wait().await;
    (status, stdout, stderr)
  };

  match timeout(run_timeout, wait_fut).await {
    Ok((Ok(status), stdout, stderr)) => {
      let exit_code = status.code().unwrap_or(-1);
      if exit_code == 0 {
        Ok(CommandOutput { stdout, stderr, exit_code })
      } else {
        Err(CommandError::CommandFailed { exit_code, stdout, stderr })
      }
    }
    Ok((Err(e), ..)) => Err(CommandError::Spawn(anyhow::Error::new(e))),
    Err(_) => Err(CommandError::CommandTimeout(run_timeout)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn runs_successful_command() {
    let out = run("echo", "echo", &["hello world"], Duration::from_secs(5), None)
      .await
      .unwrap();
    assert_eq!(out.stdout.trim(), "hello world");
    assert!(out.success());
  }

  #[tokio::test]
  async fn nonzero_exit_is_command_failed() {
    let err = run("false", "false", &[], Duration::from_secs(5), None)
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::CommandFailed { exit_code, .. } if exit_code != 0));
  }

  #[tokio::test]
  async fn timeout_is_reported() {
    let err = run(
      "sleep",
      "sleep",
      &["2"],
      Duration::from_millis(50),
      None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommandError::CommandTimeout(_)));
  }

  #[test]
  fn quoting_neutralizes_shell_metacharacters() {
    let quoted = quote_arg("$(rm -rf /); echo pwned");
    assert!(!quoted.contains("$(rm"));
  }

  #[tokio::test]
  async fn streaming_calls_line_callback() {
    let mut lines = Vec::new();
    let out = run_streaming(
      "printf",
      "printf",
      &["a\\nb\\n"],
      Duration::from_secs(5),
      None,
      |line| lines.push(line.to_string()),
    )
    .await
    .unwrap();
    assert!(out.success());
    assert_eq!(lines, vec!["a", "b"]);
  }
}
