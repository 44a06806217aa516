//! Host executor trait (§4.C). A thin seam over the `command` crate so
//! the pipeline and edge router can be tested against a fake without a
//! real shell, mirroring the teacher's instrumented
//! `run_komodo_command` free function but exposed as a swappable trait
//! per Design Notes.

use std::{collections::HashMap, time::Duration};

use command::{CommandError, CommandOutput};

use crate::error::EngineError;

impl From<CommandError> for EngineError {
  fn from(err: CommandError) -> Self {
    EngineError::Command(err)
  }
}

#[async_trait::async_trait]
pub trait HostExecutor: Send + Sync {
  async fn run(
    &self,
    label: &str,
    program: &str,
    args: &[&str],
    timeout: Duration,
    env: Option<&HashMap<String, String>>,
  ) -> Result<CommandOutput, EngineError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostExecutor;

#[async_trait::async_trait]
impl HostExecutor for SystemHostExecutor {
  #[tracing::instrument(name = "host_exec", skip(self, args, env, timeout), fields(label))]
  async fn run(
    &self,
    label: &str,
    program: &str,
    args: &[&str],
    timeout: Duration,
    env: Option<&HashMap<String, String>>,
  ) -> Result<CommandOutput, EngineError> {
    Ok(command::run(label, program, args, timeout, env).await?)
  }
}

pub type SharedHostExecutor = std::sync::Arc<dyn HostExecutor>;

#[cfg(test)]
pub mod fake {
  use std::sync::Mutex;

  use super::*;

  /// Records every invocation and returns a fixed canned result, for
  /// tests of callers (edge router, pipeline) that shell out.
  #[derive(Default)]
  pub struct FakeHostExecutor {
    pub calls: Mutex<Vec<String>>,
    pub result: Mutex<Option<Result<CommandOutput, String>>>,
  }

  #[async_trait::async_trait]
  impl HostExecutor for FakeHostExecutor {
    async fn run(
      &self,
      label: &str,
      _program: &str,
      _args: &[&str],
      _timeout: Duration,
      _env: Option<&HashMap<String, String>>,
    ) -> Result<CommandOutput, EngineError> {
      self.calls.lock().unwrap().push(label.to_string());
      match self.result.lock().unwrap().clone() {
        Some(Ok(output)) => Ok(output),
        Some(Err(message)) => Err(EngineError::ValidationFailed(message)),
        None => Ok(CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 }),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn system_executor_runs_real_commands() {
    let executor = SystemHostExecutor;
    let out = executor
      .run("echo", "echo", &["ok"], Duration::from_secs(5), None)
      .await
      .unwrap();
    assert_eq!(out.stdout.trim(), "ok");
  }

  #[tokio::test]
  async fn fake_executor_records_labels() {
    let fake = fake::FakeHostExecutor::default();
    fake.run("nginx reload", "nginx", &["-s", "reload"], Duration::from_secs(1), None).await.unwrap();
    assert_eq!(fake.calls.lock().unwrap().as_slice(), ["nginx reload"]);
  }
}
