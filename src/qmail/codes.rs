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

//! Exit codes from `qmail-queue(8)`, and the outcome of a submission.

use std::fmt;

use crate::support::error::Error;
use crate::support::subprocess::ChildExit;

pub const UNKNOWN_ERROR: &str = "Unknown Error";

/// Messages for each exit code documented by `qmail-queue(8)`.
static QMAIL_QUEUE_EXITS: &[(i32, &str)] = &[
    (0, "Success"),
    (11, "Address too long"),
    (
        31,
        "Mail server permanently refuses to send the message to any \
         recipients.",
    ),
    (51, "Out of memory."),
    (52, "Timeout."),
    (53, "Write error; e.g., disk full."),
    (54, "Unable to read the message or envelope."),
    (55, "Unable to read a configuration file."),
    (56, "Problem making a network connection from this host."),
    (61, "Problem with the qmail home directory."),
    (62, "Problem with the queue directory."),
    (63, "Problem with queue/pid."),
    (64, "Problem with queue/mess."),
    (65, "Problem with queue/intd."),
    (66, "Problem with queue/todo."),
    (
        71,
        "Mail server temporarily refuses to send the message to any \
         recipients.",
    ),
    (72, "Connection to mail server timed out."),
    (73, "Connection to mail server rejected. "),
    (
        74,
        "Connection to mail server  succeeded,  but  communication  failed.",
    ),
    (81, "Internal bug; e.g., segmentation fault."),
    (91, "Envelope format error"),
];

/// Look up the message for a `qmail-queue` exit code.
pub fn lookup(code: i32) -> &'static str {
    QMAIL_QUEUE_EXITS
        .iter()
        .find(|&&(c, _)| c == code)
        .map(|&(_, message)| message)
        .unwrap_or(UNKNOWN_ERROR)
}

/// Whether a non-zero `qmail-queue` exit code means resubmitting the same
/// message will never work.
///
/// qmail itself treats 11 through 40 as permanent and everything else as
/// temporary.
pub fn is_permanent(code: i32) -> bool {
    (11..=40).contains(&code)
}

/// The raw protocol-level signal behind an outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The exit code of a child program.
    ExitCode(i32),
    /// A child program was terminated by this signal.
    Killed(i32),
    /// The status byte of a QMQP or `qmail-remote` response.
    Response(u8),
    /// The time limit elapsed.
    Deadline,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Signal::ExitCode(code) => write!(f, "exit {}", code),
            Signal::Killed(signal) => write!(f, "signal {}", signal),
            Signal::Response(code) => {
                write!(f, "response {:?}", char::from(code))
            },
            Signal::Deadline => write!(f, "deadline"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub signal: Signal,
    /// Human-readable description, e.g. the text after a QMQP status code.
    pub text: String,
}

impl Status {
    pub fn new(signal: Signal, text: impl Into<String>) -> Self {
        Status {
            signal,
            text: text.into(),
        }
    }
}

/// The result of one submission attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The message was accepted for delivery.
    Accepted(Status),
    /// The message was refused and must not be resubmitted unchanged.
    Rejected(Status),
    /// The message was refused for now; try again later.
    Deferred(Status),
    /// The peer did not finish within the configured time limit. Whether the
    /// message was accepted is unknown.
    TimedOut(Status),
}

impl Outcome {
    /// Interpret how a `qmail-queue` program exited.
    pub fn from_queue_exit(exit: ChildExit) -> Self {
        match exit {
            ChildExit::Exited(0) => {
                Outcome::Accepted(Status::new(Signal::ExitCode(0), lookup(0)))
            },
            ChildExit::Exited(code) => {
                let status = Status::new(
                    Signal::ExitCode(code),
                    format!("qmail-queue error {}: {}", code, lookup(code)),
                );
                if is_permanent(code) {
                    Outcome::Rejected(status)
                } else {
                    Outcome::Deferred(status)
                }
            },
            ChildExit::Killed(signal) => Outcome::Deferred(Status::new(
                Signal::Killed(signal),
                format!("qmail-queue killed by signal {}", signal),
            )),
            ChildExit::TimedOut => Outcome::TimedOut(Status::new(
                Signal::Deadline,
                "qmail-queue did not finish in time",
            )),
        }
    }

    pub fn status(&self) -> &Status {
        match *self {
            Outcome::Accepted(ref s)
            | Outcome::Rejected(ref s)
            | Outcome::Deferred(ref s)
            | Outcome::TimedOut(ref s) => s,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(*self, Outcome::Accepted(..))
    }

    /// Convert anything but acceptance into an error.
    pub fn into_result(self) -> Result<Status, Error> {
        match self {
            Outcome::Accepted(status) => Ok(status),
            Outcome::Rejected(status) => {
                Err(Error::SubmissionRejected(status.text))
            },
            Outcome::Deferred(status) => {
                Err(Error::SubmissionDeferred(status.text))
            },
            Outcome::TimedOut(status) => Err(Error::TimedOut(status.text)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let verb = match *self {
            Outcome::Accepted(..) => "accepted",
            Outcome::Rejected(..) => "rejected",
            Outcome::Deferred(..) => "deferred",
            Outcome::TimedOut(..) => "timed out",
        };
        let status = self.status();
        write!(f, "{} ({}): {}", verb, status.signal, status.text)
    }
}
