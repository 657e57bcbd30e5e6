//-
// Copyright (c) 2026, The Qsubmit Authors
//
// This file is part of Qsubmit.
//
// Qsubmit is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version  3 of the License, or (at  your option)
// any later version.
//
// Qsubmit is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// Qsubmit. If not, see <http://www.gnu.org/licenses/>.

//! Spawning child programs with both standard streams redirected to pipes.
//!
//! Each of the child's standard input and standard output is bound to a
//! fresh pipe. Normally the parent writes the child's input and reads its
//! output, but either stream can be flipped: the qmail-queue protocol has
//! the child *read* its standard output, which carries the envelope.
//!
//! A child is always reaped. `Subprocess::wait` and `Subprocess::converse`
//! close the parent's pipe ends before waiting so the child sees EOF, and a
//! `Subprocess` dropped without either is killed and reaped.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use log::{error, warn};

use super::error::Error;

/// How often to check whether a child under a deadline has exited.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which end of a standard stream the parent keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Redirect {
    /// The child reads the stream; the parent holds the write end.
    Feed,
    /// The child writes the stream; the parent holds the read end.
    Capture,
}

impl Redirect {
    /// Create a pipe, returning the child's end and then the parent's end.
    fn pipe(self) -> io::Result<(File, File)> {
        let (read, write) = cloexec_pipe()?;
        Ok(match self {
            Redirect::Feed => (read, write),
            Redirect::Capture => (write, read),
        })
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn cloexec_pipe() -> io::Result<(File, File)> {
    let (read, write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;
    Ok((File::from(read), File::from(write)))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn cloexec_pipe() -> io::Result<(File, File)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::unix::io::AsRawFd;

    let (read, write) = nix::unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((File::from(read), File::from(write)))
}

/// Describes a child program and how its standard streams are bound.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    stdin: Redirect,
    stdout: Redirect,
}

/// The parent's ends of the child's standard input and output.
#[derive(Debug)]
pub struct Pipes {
    pub stdin: File,
    pub stdout: File,
}

/// How a child program finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    /// The child exited with this status code.
    Exited(i32),
    /// The child was terminated by this signal.
    Killed(i32),
    /// The child was killed because it exceeded its time limit.
    TimedOut,
}

/// The result of a callback-driven conversation with a child.
#[derive(Debug)]
pub struct Completion<R> {
    pub exit: ChildExit,
    /// What the handler returned. An error here usually accompanies an
    /// unexpected exit, e.g. `BrokenPipe` when the child quit early.
    pub result: io::Result<R>,
}

impl CommandSpec {
    /// A command which reads its input from the parent and writes its output
    /// back to it, running in the current directory.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdin: Redirect::Feed,
            stdout: Redirect::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: Option<&Path>) -> Self {
        self.working_dir = dir.map(Path::to_owned);
        self
    }

    pub fn stdin(mut self, redirect: Redirect) -> Self {
        self.stdin = redirect;
        self
    }

    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    /// Start the child, leaving the conversation and its end to the caller.
    pub fn spawn(&self) -> Result<Subprocess, Error> {
        let spawn_error = |source: io::Error| Error::ProcessSpawn {
            program: self.program.clone(),
            source,
        };

        let (child_stdin, parent_stdin) =
            self.stdin.pipe().map_err(spawn_error)?;
        let (child_stdout, parent_stdout) =
            self.stdout.pipe().map_err(spawn_error)?;

        let child = {
            let mut command = Command::new(&self.program);
            command.args(&self.args).stdin(child_stdin).stdout(child_stdout);
            if let Some(ref dir) = self.working_dir {
                command.current_dir(dir);
            }

            // `command` owns the child's ends of the pipes; they must be
            // closed in this process once the child has them.
            command.spawn().map_err(spawn_error)?
        };

        Ok(Subprocess {
            pipes: Pipes {
                stdin: parent_stdin,
                stdout: parent_stdout,
            },
            child: Reaper {
                program: self.program.clone(),
                child: Mutex::new(child),
            },
        })
    }

    /// Start the child and run `handler` against its pipes.
    ///
    /// Once `handler` returns, both pipes are closed and the child is
    /// awaited.
    pub fn run<R>(
        &self,
        timeout: Option<Duration>,
        handler: impl FnOnce(Pipes) -> io::Result<R>,
    ) -> Result<Completion<R>, Error> {
        self.spawn()?.converse(timeout, handler)
    }
}

/// A running child program.
#[derive(Debug)]
pub struct Subprocess {
    pub pipes: Pipes,
    child: Reaper,
}

impl Subprocess {
    pub fn id(&self) -> u32 {
        self.child.lock().id()
    }

    /// Close both pipes and wait for the child to exit.
    pub fn wait(self, timeout: Option<Duration>) -> Result<ChildExit, Error> {
        self.converse(timeout, |_| Ok(())).map(|c| c.exit)
    }

    /// Run `handler` against the pipes, then close them and wait for the
    /// child to exit.
    ///
    /// If `timeout` elapses before the child exits, it is killed. This also
    /// unblocks a handler stuck writing to a child that stopped reading.
    pub fn converse<R>(
        self,
        timeout: Option<Duration>,
        handler: impl FnOnce(Pipes) -> io::Result<R>,
    ) -> Result<Completion<R>, Error> {
        let Subprocess { pipes, child } = self;

        let Some(timeout) = timeout else {
            let result = handler(pipes);
            let status = child.lock().wait()?;
            return Ok(Completion {
                exit: child_exit(status, false),
                result,
            });
        };

        let timed_out = AtomicBool::new(false);
        let (done_send, done_recv) = channel::bounded::<()>(1);
        let (result, status) = crossbeam::scope(|s| {
            s.spawn(|_| {
                if let Err(RecvTimeoutError::Timeout) =
                    done_recv.recv_timeout(timeout)
                {
                    warn!(
                        "{} still running after {:?}; killing it",
                        child.program.display(),
                        timeout,
                    );
                    timed_out.store(true, Ordering::SeqCst);
                    child.kill();
                }
            });

            let result = handler(pipes);
            let status = child.poll_wait();
            let _ = done_send.send(());
            (result, status)
        })
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

        Ok(Completion {
            exit: child_exit(status?, timed_out.load(Ordering::SeqCst)),
            result,
        })
    }
}

fn child_exit(status: ExitStatus, timed_out: bool) -> ChildExit {
    match status.code() {
        Some(code) => ChildExit::Exited(code),
        None if timed_out => ChildExit::TimedOut,
        None => ChildExit::Killed(status.signal().unwrap_or(0)),
    }
}

/// Owns the child handle, making sure it is reaped even on error paths.
#[derive(Debug)]
struct Reaper {
    program: PathBuf,
    child: Mutex<Child>,
}

impl Reaper {
    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_wait(&self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.lock().try_wait()? {
                return Ok(status);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill(&self) {
        // Child::kill() does nothing once the child has been reaped, so
        // there is no danger of signalling a recycled PID.
        if let Err(e) = self.lock().kill() {
            error!("Failed to kill {}: {}", self.program.display(), e);
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Ok(None) = child.try_wait() {
            warn!(
                "Killing abandoned child {} ({})",
                child.id(),
                self.program.display(),
            );
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
