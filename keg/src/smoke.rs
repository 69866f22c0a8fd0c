//! Runs a formula's `test do` commands against an installed keg.

use std::{
    env, fmt,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use keg_linter::{
    formula::{Formula, TestCommand},
    logger::TaskLogger,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;

use crate::types::OutputStream;

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { command: String, status: Option<i32> },
    LaunchFailed { command: String, error: String },
    TimedOut { command: String, after: Duration },
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "passed"),
            TestOutcome::Failed {
                command,
                status: Some(code),
            } => write!(f, "`{}` exited with status {}", command, code),
            TestOutcome::Failed {
                command,
                status: None,
            } => write!(f, "`{}` was terminated by a signal", command),
            TestOutcome::LaunchFailed { command, error } => {
                write!(f, "`{}` could not be started: {}", command, error)
            }
            TestOutcome::TimedOut { command, after } => {
                write!(f, "`{}` timed out after {:?}", command, after)
            }
        }
    }
}

/// Resolves `#{...}` names against a committed keg.
pub fn interpolation(formula: &Formula, keg: &Path, name: &str) -> Option<String> {
    let path = |p: PathBuf| Some(p.to_string_lossy().into_owned());
    match name {
        "bin" => path(keg.join("bin")),
        "sbin" => path(keg.join("sbin")),
        "libexec" => path(keg.join("libexec")),
        "share" => path(keg.join("share")),
        "doc" => path(keg.join("share/doc").join(&formula.name)),
        "prefix" => path(keg.to_path_buf()),
        "name" => Some(formula.name.clone()),
        "version" => Some(formula.version.clone()),
        _ => None,
    }
}

pub struct SelfTest<'a> {
    logger: &'a TaskLogger,
    timeout: Duration,
}

impl<'a> SelfTest<'a> {
    pub fn new(logger: &'a TaskLogger, timeout: Duration) -> Self {
        Self { logger, timeout }
    }

    /// Runs every test command in order, stopping at the first failure.
    pub async fn run(&self, formula: &Formula, keg: &Path) -> TestOutcome {
        for cmd in &formula.test {
            let outcome = self.run_command(formula, keg, cmd).await;
            if !outcome.passed() {
                return outcome;
            }
        }
        TestOutcome::Passed
    }

    async fn run_command(&self, formula: &Formula, keg: &Path, cmd: &TestCommand) -> TestOutcome {
        let resolve = |name: &str| interpolation(formula, keg, name);
        let rendered = cmd
            .program
            .render(resolve)
            .and_then(|program| {
                let args = cmd
                    .args
                    .iter()
                    .map(|arg| arg.render(resolve))
                    .collect::<keg_linter::error::Result<Vec<_>>>()?;
                Ok((program, args))
            });
        let (program, args) = match rendered {
            Ok(rendered) => rendered,
            Err(err) => {
                return TestOutcome::LaunchFailed {
                    command: cmd.program.to_string(),
                    error: err.to_string(),
                }
            }
        };
        let command_line = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let program_path = if program.contains('/') {
            PathBuf::from(&program)
        } else {
            match which::which(&program) {
                Ok(path) => path,
                Err(err) => {
                    return TestOutcome::LaunchFailed {
                        command: command_line,
                        error: err.to_string(),
                    }
                }
            }
        };

        self.logger.info(format!("Testing: {}", command_line));

        let paths = env::var("PATH").unwrap_or_default();
        let workdir = tempfile::Builder::new().prefix("keg-test-").tempdir().ok();
        let mut command = Command::new(&program_path);
        command
            .args(&args)
            .env("PATH", format!("{}:{}", keg.join("bin").display(), paths))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref workdir) = workdir {
            command.current_dir(workdir.path());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return TestOutcome::LaunchFailed {
                    command: command_line,
                    error: err.to_string(),
                }
            }
        };

        let deadline = Instant::now() + self.timeout;
        let stdout = child
            .stdout
            .take()
            .map(|out| self.forward_output(out, OutputStream::Stdout));
        let stderr = child
            .stderr
            .take()
            .map(|err| self.forward_output(err, OutputStream::Stderr));

        let outcome = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => TestOutcome::Passed,
            Ok(Ok(status)) => TestOutcome::Failed {
                command: command_line,
                status: status.code(),
            },
            Ok(Err(err)) => TestOutcome::LaunchFailed {
                command: command_line,
                error: err.to_string(),
            },
            Err(_) => {
                let _ = child.kill().await;
                TestOutcome::TimedOut {
                    command: command_line,
                    after: self.timeout,
                }
            }
        };

        // Background children can hold the pipes open past the command's exit
        let mut abandoned = false;
        for mut handle in [stdout, stderr].into_iter().flatten() {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                abandoned = true;
            }
        }
        if abandoned {
            self.logger
                .warn("Test output was still open at the timeout, stopped reading it");
        }

        debug!("self-test outcome: {:?}", outcome);
        outcome
    }

    fn forward_output<R>(&self, reader: R, wrap: fn(String) -> OutputStream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match wrap(line) {
                    OutputStream::Stdout(msg) => logger.info(msg),
                    OutputStream::Stderr(msg) => logger.custom_error(msg),
                }
            }
        })
    }
}
