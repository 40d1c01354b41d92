//! Container driver backed by a container engine command-line tool.
//!
//! [`EngineDriver`] spawns `<engine> run ...` with all three standard
//! streams piped. Output is pumped on reader threads and written to the
//! action's (masked) streams from the calling thread, so the caller's
//! writers never cross a thread boundary. Environment values are handed to
//! the engine through its own environment (`-e NAME`), never on the command
//! line.

use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;

use tracing::{debug, warn};

use crate::action::Streams;
use crate::cancel::{CancellationToken, POLL_INTERVAL};
use crate::container::{CONTAINER_TARGET, ContainerDriver, ContainerRequest, DriverError};

/// Engine program used when none is configured.
pub const DEFAULT_ENGINE: &str = "docker";

const CHUNK_SIZE: usize = 8192;

enum Chunk {
    Out(Vec<u8>),
    Err(Vec<u8>),
}

/// Runs containers through a Docker-compatible CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDriver {
    program: String,
}

impl Default for EngineDriver {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE)
    }
}

impl EngineDriver {
    /// Uses `program` as the engine CLI.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Engine program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the engine for `request`.
    #[must_use]
    pub fn args(request: &ContainerRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![OsString::from("run"), OsString::from("-i")];
        if request.remove {
            args.push(OsString::from("--rm"));
        }
        if request.pull {
            args.push(OsString::from("--pull=always"));
        }
        if let Some(entrypoint) = &request.entrypoint {
            args.push(OsString::from("--entrypoint"));
            args.push(OsString::from(entrypoint));
        }
        for (name, _) in &request.env {
            args.push(OsString::from("-e"));
            args.push(OsString::from(name));
        }
        args.push(OsString::from(&request.image));
        args.extend(request.command.iter().map(OsString::from));
        args
    }
}

impl ContainerDriver for EngineDriver {
    fn run(
        &self,
        request: &ContainerRequest,
        streams: &mut Streams<'_>,
        cancel: &CancellationToken,
    ) -> Result<i32, DriverError> {
        let mut command = Command::new(&self.program);
        command
            .args(Self::args(request))
            .envs(request.env.iter().map(|(name, value)| (name, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            target: CONTAINER_TARGET,
            engine = %self.program,
            action = %request.action_id,
            "spawning container engine"
        );

        let mut child = command.spawn().map_err(|source| DriverError::Spawn {
            engine: self.program.clone(),
            source: Arc::new(source),
        })?;

        pump_input(&mut child, streams.take_input())?;
        let (sender, receiver) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader("marshal-container-stdout", stdout, sender.clone(), Chunk::Out)?;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader("marshal-container-stderr", stderr, sender, Chunk::Err)?;
        }

        loop {
            if cancel.is_cancelled() {
                return Err(stop(&mut child, &request.action_id));
            }
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(Chunk::Out(bytes)) => streams.out.write_all(&bytes)?,
                Ok(Chunk::Err(bytes)) => streams.err.write_all(&bytes)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        streams.out.flush()?;
        streams.err.flush()?;

        wait_for_exit(&mut child, &request.action_id, cancel)
    }
}

/// Copies the action's input into the child's stdin on its own thread.
///
/// The thread ends when the input reaches end of file, fails, or the child
/// stops reading. An input that never ends keeps the thread alive; callers
/// wrap blocking sources in a [`CancellableReader`](crate::CancellableReader).
fn pump_input(child: &mut Child, mut input: Box<dyn Read + Send>) -> Result<(), DriverError> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    thread::Builder::new()
        .name(String::from("marshal-container-stdin"))
        .spawn(move || {
            if let Err(error) = io::copy(&mut input, &mut stdin) {
                debug!(
                    target: CONTAINER_TARGET,
                    error = %error,
                    "stopped forwarding input to container"
                );
            }
        })
        .map(drop)
        .map_err(DriverError::from)
}

fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    mut reader: R,
    sender: Sender<Chunk>,
    wrap: fn(Vec<u8>) -> Chunk,
) -> Result<(), DriverError> {
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let mut buffer = vec![0_u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(read) => {
                        let chunk = buffer.get(..read).map(<[u8]>::to_vec).unwrap_or_default();
                        if sender.send(wrap(chunk)).is_err() {
                            break;
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        })
        .map(drop)
        .map_err(DriverError::from)
}

/// Polls the child for exit, killing it if `cancel` fires first.
fn wait_for_exit(
    child: &mut Child,
    action_id: &str,
    cancel: &CancellationToken,
) -> Result<i32, DriverError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    target: CONTAINER_TARGET,
                    action = action_id,
                    ?status,
                    "container engine exited"
                );
                return Ok(status.code().unwrap_or(-1));
            }
            Ok(None) => {
                if cancel.is_cancelled() {
                    return Err(stop(child, action_id));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(error) => return Err(error.into()),
        }
    }
}

fn stop(child: &mut Child, action_id: &str) -> DriverError {
    warn!(
        target: CONTAINER_TARGET,
        action = action_id,
        "cancelling container run, killing engine process"
    );
    drop(child.kill());
    drop(child.wait());
    DriverError::Cancelled
}
