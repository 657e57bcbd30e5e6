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

//! Client for the `qmail-queue` protocol.
//!
//! The queue program reads the message from descriptor 0 until EOF, then
//! the envelope from descriptor 1, then exits with a status from the table
//! in `codes`. Both descriptors are pipes the parent writes to.

use std::io::{self, BufWriter, Write};

use log::{error, info};

use super::codes::Outcome;
use super::envelope::Envelope;
use super::message::Message;
use crate::support::{
    error::Error,
    log_prefix::LogPrefix,
    subprocess::{ChildExit, CommandSpec, Pipes, Redirect},
    system_config::SubmissionConfig,
};

/// Place the message into the queue by running the configured
/// `qmail-queue` program.
pub fn submit(
    config: &SubmissionConfig,
    envelope: &Envelope,
    message: &Message,
) -> Result<Outcome, Error> {
    let return_path = envelope.wire_return_path(config)?;
    let program = config.queue_program();

    let mut log_prefix = LogPrefix::new("queue");
    log_prefix.set_sender(&return_path);
    log_prefix.set_peer(&program.to_string_lossy());

    let completion = CommandSpec::new(program)
        .working_dir(config.working_dir())
        .stdin(Redirect::Feed)
        .stdout(Redirect::Feed)
        .run(config.timeout(), |pipes| {
            let Pipes {
                stdin: message_pipe,
                stdout: envelope_pipe,
            } = pipes;

            let mut message_pipe = BufWriter::new(message_pipe);
            message.write_to(&mut message_pipe)?;
            message_pipe.flush()?;
            // The queue program only reads the envelope after EOF on the
            // message.
            drop(message_pipe);

            let mut envelope_pipe = BufWriter::new(envelope_pipe);
            envelope.write_queue_envelope(&mut envelope_pipe, &return_path)?;
            envelope_pipe.flush()
        })
        .map_err(|e| {
            error!("{} {}", log_prefix, e);
            e
        })?;

    if let Err(e) = completion.result {
        // A queue program which bails out early (e.g. on a bad envelope)
        // closes its pipes, so its exit status explains a broken pipe better
        // than the pipe does.
        if io::ErrorKind::BrokenPipe != e.kind()
            || ChildExit::Exited(0) == completion.exit
        {
            error!(
                "{} Failed writing to queue program ({:?}): {}",
                log_prefix, completion.exit, e
            );
            return Err(e.into());
        }
    }

    let outcome = Outcome::from_queue_exit(completion.exit);
    info!(
        "{} to {} recipient(s) {}",
        log_prefix,
        envelope.recipients().len(),
        outcome
    );
    Ok(outcome)
}
