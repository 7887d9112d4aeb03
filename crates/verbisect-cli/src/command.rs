//! Oracle backed by shell commands.
//!
//! Every probe gets a fresh temporary directory holding the snapshot as
//! `snapshot.json` and `requirements.txt`. An optional materialize command
//! runs first (e.g. to build a virtualenv from the requirements), then the
//! check command. Both run through `sh -c` inside the work directory with:
//!
//! | Variable                 | Value                                 |
//! |--------------------------|---------------------------------------|
//! | `VERBISECT_WORKDIR`      | the probe's temporary directory       |
//! | `VERBISECT_SNAPSHOT`     | path of `snapshot.json`               |
//! | `VERBISECT_REQUIREMENTS` | path of `requirements.txt`            |
//!
//! The check's exit status is the verdict: 0 passes, anything else fails.
//! Being killed by a signal, failing to start, or running past the timeout
//! is an [`OracleError`], not a verdict.
//!
//! Commands run in their own process group, so a Ctrl-C aimed at the search
//! lets the probe in flight finish, and a timeout kills everything the
//! command started.

use log::debug;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use verbisect_core::{Oracle, OracleError, Snapshot, Verdict};

const SNAPSHOT_FILE: &str = "snapshot.json";
const REQUIREMENTS_FILE: &str = "requirements.txt";
const STDOUT_FILE: &str = "stdout.log";
const STDERR_FILE: &str = "stderr.log";

/// How many trailing bytes of a command's stderr end up in errors and logs.
const STDERR_TAIL: u64 = 2048;

/// Runs a check command against each snapshot.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    check: String,
    materialize: Option<String>,
    shell: PathBuf,
    poll_interval: Duration,
}

/// How a command ended.
enum Exit {
    Code(i32),
    Signal(i32),
}

impl CommandOracle {
    /// Check with a shell command line.
    pub fn new(check: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            materialize: None,
            shell: PathBuf::from("sh"),
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Check with an argument vector. A single argument is taken as a shell
    /// command line; several are quoted and joined.
    pub fn from_args(args: &[String]) -> Self {
        match args {
            [single] => Self::new(single.clone()),
            _ => Self::new(shell_join(args)),
        }
    }

    /// Run `command` before every check to set the environment up. A non-zero
    /// exit is reported as [`OracleError::Materialize`].
    pub fn with_materialize(mut self, command: impl Into<String>) -> Self {
        self.materialize = Some(command.into());
        self
    }

    /// Use another POSIX shell than `sh`.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// The check command line.
    pub fn check_command(&self) -> &str {
        &self.check
    }

    fn prepare(&self, snapshot: &Snapshot, workdir: &Path) -> Result<(), OracleError> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| OracleError::Materialize(format!("cannot encode snapshot: {}", e)))?;
        fs::write(workdir.join(SNAPSHOT_FILE), json)
            .and_then(|_| fs::write(workdir.join(REQUIREMENTS_FILE), snapshot.to_requirements()))
            .map_err(|e| OracleError::Materialize(format!("cannot write snapshot files: {}", e)))
    }

    fn spawn(&self, command: &str, workdir: &Path) -> Result<Child, OracleError> {
        let log_file = |name: &str| {
            File::create(workdir.join(name))
                .map_err(|e| OracleError::Spawn(format!("cannot create {}: {}", name, e)))
        };

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .env("VERBISECT_WORKDIR", workdir)
            .env("VERBISECT_SNAPSHOT", workdir.join(SNAPSHOT_FILE))
            .env("VERBISECT_REQUIREMENTS", workdir.join(REQUIREMENTS_FILE))
            .stdin(Stdio::null())
            .stdout(log_file(STDOUT_FILE)?)
            .stderr(log_file(STDERR_FILE)?);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|e| {
            OracleError::Spawn(format!("{} -c {:?}: {}", self.shell.display(), command, e))
        })
    }

    /// Run `command` to completion or until `deadline`.
    fn run(
        &self,
        command: &str,
        workdir: &Path,
        timeout: Option<Duration>,
        deadline: Option<Instant>,
    ) -> Result<Exit, OracleError> {
        let mut child = self.spawn(command, workdir)?;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(exit_of(status)),
                Ok(None) => {}
                Err(e) => {
                    kill(&mut child);
                    return Err(OracleError::Other(format!("cannot wait for check: {}", e)));
                }
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    debug!("{:?} ran past {:?}, killing it", command, timeout);
                    kill(&mut child);
                    return Err(OracleError::Timeout(timeout));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Oracle for CommandOracle {
    fn check(&self, snapshot: &Snapshot, timeout: Option<Duration>) -> Result<Verdict, OracleError> {
        let workdir = tempfile::Builder::new()
            .prefix("verbisect-")
            .tempdir()
            .map_err(|e| OracleError::Materialize(format!("cannot create work directory: {}", e)))?;
        self.prepare(snapshot, workdir.path())?;
        let deadline = timeout.map(|t| Instant::now() + t);

        if let Some(materialize) = &self.materialize {
            match self.run(materialize, workdir.path(), timeout, deadline)? {
                Exit::Code(0) => {}
                Exit::Code(code) => {
                    return Err(OracleError::Materialize(format!(
                        "{:?} exited with status {}{}",
                        materialize,
                        code,
                        stderr_suffix(workdir.path())
                    )))
                }
                Exit::Signal(signal) => {
                    return Err(OracleError::Terminated(format!(
                        "{:?} killed by signal {}",
                        materialize, signal
                    )))
                }
            }
        }

        let verdict = match self.run(&self.check, workdir.path(), timeout, deadline)? {
            Exit::Code(0) => Verdict::Pass,
            Exit::Code(code) => {
                debug!(
                    "check exited with status {}{}",
                    code,
                    stderr_suffix(workdir.path())
                );
                Verdict::Fail
            }
            Exit::Signal(signal) => {
                return Err(OracleError::Terminated(format!(
                    "{:?} killed by signal {}",
                    self.check, signal
                )))
            }
        };
        Ok(verdict)
    }
}

fn exit_of(status: ExitStatus) -> Exit {
    if let Some(code) = status.code() {
        return Exit::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Exit::Signal(signal);
        }
    }
    Exit::Code(-1)
}

/// Kill the child and everything in its process group, then reap it.
fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: kill(2) has no memory-safety preconditions.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// `": <last lines of stderr>"`, or nothing if stderr was empty.
fn stderr_suffix(workdir: &Path) -> String {
    let mut file = match File::open(workdir.join(STDERR_FILE)) {
        Ok(file) => file,
        Err(_) => return String::new(),
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    if len > STDERR_TAIL && file.seek(SeekFrom::Start(len - STDERR_TAIL)).is_err() {
        return String::new();
    }
    let mut tail = Vec::new();
    if file.read_to_end(&mut tail).is_err() {
        return String::new();
    }
    let tail = String::from_utf8_lossy(&tail);
    let tail = tail.trim();
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail)
    }
}

/// Quote each argument for `sh` and join them with spaces.
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
