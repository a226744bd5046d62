use std::future::Future;
use std::pin::Pin;
use std::process::Output;

use bstr::ByteSlice;
use tokio::process::Command;

use crate::common::error::CommandExecutionFailure;

/// Captured result of a successfully finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

pub type CommandResult = Result<CommandOutput, CommandExecutionFailure>;
pub type CommandFuture = Pin<Box<dyn Future<Output = CommandResult>>>;

/// Executes shell commands on behalf of the adapters.
///
/// Implementations spawn one process per call and never retry. The returned future suspends
/// only the task that awaits it.
pub trait CommandRunner {
    fn run_command(&self, command: &str) -> CommandFuture;
}

/// Runs commands through `sh -c` on the local machine.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner for ShellExecutor {
    fn run_command(&self, command: &str) -> CommandFuture {
        let mut process = create_command(&self.shell, command);
        let command = command.to_string();

        Box::pin(async move {
            log::debug!("Running command `{command}`");
            let output = process.output().await.map_err(|error| {
                CommandExecutionFailure::new(
                    format!("Could not start `{command}`: {error}"),
                    String::new(),
                    String::new(),
                    None,
                )
            })?;
            let output = check_command_output(&command, output)?;
            log::trace!(
                "Command `{command}` finished\nStdout\n{}\nStderr\n{}",
                output.stdout,
                output.stderr
            );
            Ok(output)
        })
    }
}

pub fn create_command(shell: &str, command: &str) -> Command {
    let mut process = Command::new(shell);
    process.arg("-c").arg(command);
    process.kill_on_drop(true);
    process
}

pub fn check_command_output(command: &str, output: Output) -> CommandResult {
    let stdout = output.stdout.to_str_lossy().trim().to_string();
    let stderr = output.stderr.to_str_lossy().trim().to_string();
    let status = output.status;
    if !status.success() {
        return Err(CommandExecutionFailure::new(
            format!("Execution of `{command}` failed"),
            stdout,
            stderr,
            status.code(),
        ));
    }
    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or_default(),
    })
}
