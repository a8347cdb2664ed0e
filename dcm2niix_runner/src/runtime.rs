//! Container runtimes that dcm2niix is executed with.
//!
//! [`CommandRuntime`] drives the `docker` and `singularity` executables.
//! [`MockRuntime`] records calls and replays canned output, for tests.

use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Image repository dcm2niix is published under.
pub const DOCKER_REPOSITORY: &str = "svdvoort/dcm2niix";
/// The same repository, addressed the way singularity pulls from Docker Hub.
pub const SINGULARITY_REPOSITORY: &str = "docker://svdvoort/dcm2niix";

/// Mount point of the input directory inside the container.
pub const INPUT_MOUNT: &str = "/input";
/// Mount point of the output directory inside the container.
pub const OUTPUT_MOUNT: &str = "/output";

/// Supported container backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Docker,
    Singularity,
}

impl Backend {
    pub fn executable(self) -> &'static str {
        match self {
            Backend::Docker => "docker",
            Backend::Singularity => "singularity",
        }
    }

    /// Image reference of dcm2niix `version` for this backend.
    pub fn image_url(self, version: &str) -> String {
        let repository = match self {
            Backend::Docker => DOCKER_REPOSITORY,
            Backend::Singularity => SINGULARITY_REPOSITORY,
        };
        format!("{}:{}", repository, version)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "docker" => Ok(Backend::Docker),
            "singularity" => Ok(Backend::Singularity),
            other => Err(Error::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Lines printed by a running container. A failed run ends with an `Err` item.
pub type LineStream<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// Executes images on a container backend.
pub trait ContainerRuntime {
    /// Whether the backend's executable is available on this host.
    fn is_installed(&self, backend: Backend) -> bool;

    /// Pulls `image`. With a destination, the image is stored as that file.
    fn pull(&self, backend: Backend, image: &str, destination: Option<&Path>) -> Result<()>;

    /// Runs `image` with `args`, binding each `source:target` in `binds`.
    fn run(
        &self,
        backend: Backend,
        image: &str,
        args: &[String],
        binds: &[String],
    ) -> Result<LineStream<'_>>;
}

/// Full argument list passed to the backend executable for a run.
pub fn run_arguments(backend: Backend, image: &str, args: &[String], binds: &[String]) -> Vec<String> {
    let mut command = Vec::with_capacity(args.len() + binds.len() * 2 + 4);
    match backend {
        Backend::Docker => {
            command.push("run".to_string());
            command.push("--rm".to_string());
            for bind in binds {
                command.push("-v".to_string());
                command.push(bind.clone());
            }
        }
        Backend::Singularity => {
            command.push("run".to_string());
            if !binds.is_empty() {
                command.push("--bind".to_string());
                command.push(binds.join(","));
            }
        }
    }
    command.push(image.to_string());
    command.extend(args.iter().cloned());
    command
}

/// Runs containers through the `docker`/`singularity` command-line clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRuntime;

impl ContainerRuntime for CommandRuntime {
    fn is_installed(&self, backend: Backend) -> bool {
        Command::new(backend.executable())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn pull(&self, backend: Backend, image: &str, destination: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new(backend.executable());
        cmd.arg("pull");
        if let (Backend::Singularity, Some(destination)) = (backend, destination) {
            cmd.arg("--name").arg(destination);
        }
        cmd.arg(image);

        info!("Pulling {} with {}", image, backend);
        let status = cmd
            .status()
            .map_err(|e| Error::Execution(format!("failed to start {}: {}", backend, e)))?;
        if !status.success() {
            return Err(Error::Execution(format!(
                "{} pull of {} exited with {}",
                backend, image, status
            )));
        }
        Ok(())
    }

    fn run(
        &self,
        backend: Backend,
        image: &str,
        args: &[String],
        binds: &[String],
    ) -> Result<LineStream<'_>> {
        let arguments = run_arguments(backend, image, args, binds);
        debug!("Running: {} {}", backend, arguments.join(" "));

        let mut command = Command::new(backend.executable());
        command.args(&arguments);
        Ok(Box::new(spawn_lines(command, backend)?))
    }
}

/// Starts `command` with stdout piped and returns its output lines.
fn spawn_lines(mut command: Command, backend: Backend) -> Result<ProcessLines> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::Execution(format!("failed to start {}: {}", backend, e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Execution("container stdout was not captured".into()))?;

    Ok(ProcessLines {
        child,
        reader: BufReader::new(stdout),
        backend,
        finished: false,
    })
}

/// Lazily reads a child's stdout; reports the exit status once stdout closes.
struct ProcessLines {
    child: Child,
    reader: BufReader<ChildStdout>,
    backend: Backend,
    finished: bool,
}

impl ProcessLines {
    fn exit_status(&mut self) -> Option<Result<String>> {
        match self.child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Err(Error::Execution(format!(
                "{} run exited with {}",
                self.backend, status
            )))),
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl Iterator for ProcessLines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.finished = true;
                self.exit_status()
            }
            Ok(_) => Some(Ok(String::from_utf8_lossy(&buf)
                .trim_end_matches(&['\n', '\r'][..])
                .to_string())),
            Err(e) => {
                self.finished = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                Some(Err(e.into()))
            }
        }
    }
}

impl Drop for ProcessLines {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// A call received by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedCall {
    Pull {
        backend: Backend,
        image: String,
        destination: Option<PathBuf>,
    },
    Run {
        backend: Backend,
        image: String,
        args: Vec<String>,
        binds: Vec<String>,
    },
}

/// In-memory runtime for tests: records calls, replays `output`, and fails
/// the run after the output when `failure` is set.
#[derive(Debug, Default)]
pub struct MockRuntime {
    pub installed: Vec<Backend>,
    pub output: Vec<String>,
    pub failure: Option<String>,
    calls: Mutex<Vec<CapturedCall>>,
    install_checks: AtomicUsize,
}

impl MockRuntime {
    /// A runtime where both backends are installed.
    pub fn new() -> Self {
        Self {
            installed: vec![Backend::Docker, Backend::Singularity],
            ..Self::default()
        }
    }

    pub fn with_output<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn calls(&self) -> Vec<CapturedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn install_checks(&self) -> usize {
        self.install_checks.load(Ordering::SeqCst)
    }

    fn record(&self, call: CapturedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl ContainerRuntime for MockRuntime {
    fn is_installed(&self, backend: Backend) -> bool {
        self.install_checks.fetch_add(1, Ordering::SeqCst);
        self.installed.contains(&backend)
    }

    fn pull(&self, backend: Backend, image: &str, destination: Option<&Path>) -> Result<()> {
        self.record(CapturedCall::Pull {
            backend,
            image: image.to_string(),
            destination: destination.map(Path::to_path_buf),
        });
        if let Some(destination) = destination {
            std::fs::write(destination, b"")?;
        }
        Ok(())
    }

    fn run(
        &self,
        backend: Backend,
        image: &str,
        args: &[String],
        binds: &[String],
    ) -> Result<LineStream<'_>> {
        self.record(CapturedCall::Run {
            backend,
            image: image.to_string(),
            args: args.to_vec(),
            binds: binds.to_vec(),
        });
        let lines = self.output.iter().cloned().map(Ok);
        let failure = self.failure.clone().map(|msg| Err(Error::Execution(msg)));
        Ok(Box::new(lines.chain(failure)))
    }
}
