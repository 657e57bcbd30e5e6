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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed netstring: {0}")]
    MalformedNetstring(&'static str),
    #[error("Invalid return path '{0}'")]
    InvalidReturnPath(String),
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("Unable to connect to QMQP server {server}: {source}")]
    Connection {
        server: String,
        #[source]
        source: io::Error,
    },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Unable to start '{}': {source}", .program.display())]
    ProcessSpawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No QMQP server listed in '{}'", .0.display())]
    NoQmqpServer(PathBuf),
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("Submission deferred: {0}")]
    SubmissionDeferred(String),
    #[error("Timed out: {0}")]
    TimedOut(String),
    #[error("Error in config file '{}': {source}", .path.display())]
    BadConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether retrying the same submission later could succeed.
    ///
    /// This only classifies the error; nothing in this crate retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            *self,
            Error::Connection { .. }
                | Error::SubmissionDeferred(..)
                | Error::TimedOut(..)
        )
    }
}
