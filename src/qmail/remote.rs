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

//! Direct delivery through `qmail-remote`, bypassing the queue.
//!
//! `qmail-remote` is run once per recipient so that each can be given its
//! own VERP return path. It reads the message on standard input and answers
//! on standard output with NUL-terminated reports: recipient reports (`r`
//! accepted, `h` refused, `s` deferred) followed by one message report
//! (`K`, `Z`, or `D`, as with QMQP).

use std::io::{BufWriter, Read, Write};

use log::info;

use super::codes::{Outcome, Signal, Status};
use super::envelope::Envelope;
use super::message::Message;
use crate::support::{
    error::Error,
    log_prefix::LogPrefix,
    subprocess::{ChildExit, CommandSpec, Completion, Pipes},
    system_config::SubmissionConfig,
};

const RESPONSE_LIMIT: u64 = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientReport {
    pub recipient: String,
    pub outcome: Outcome,
}

struct Route<'a> {
    recipient: &'a str,
    host: &'a str,
    return_path: String,
}

/// Work out the host and return path for every recipient, failing on the
/// first one that cannot be routed.
fn routes<'a>(
    config: &SubmissionConfig,
    envelope: &'a Envelope,
) -> Result<Vec<Route<'a>>, Error> {
    envelope
        .recipients()
        .iter()
        .map(|recipient| -> Result<Route<'a>, Error> {
            let (_, host) = recipient.rsplit_once('@').ok_or_else(|| {
                Error::InvalidEnvelope(format!(
                    "recipient {:?} has no domain",
                    recipient
                ))
            })?;
            Ok(Route {
                recipient,
                host,
                return_path: envelope
                    .recipient_return_path(recipient, config)?,
            })
        })
        .collect()
}

/// Check that every recipient of `envelope` can be handed to
/// `qmail-remote`.
pub fn check_envelope(
    config: &SubmissionConfig,
    envelope: &Envelope,
) -> Result<(), Error> {
    routes(config, envelope).map(|_| ())
}

/// Deliver the message to each recipient in turn, waiting for each delivery
/// attempt to finish.
///
/// Nothing is delivered unless every recipient can be routed.
pub fn deliver(
    config: &SubmissionConfig,
    envelope: &Envelope,
    message: &Message,
) -> Result<Vec<RecipientReport>, Error> {
    let program = config.remote_program();
    let routes = routes(config, envelope)?;
    let mut reports = Vec::with_capacity(routes.len());

    for route in routes {
        let mut log_prefix = LogPrefix::new("remote");
        log_prefix.set_sender(&route.return_path);
        log_prefix.set_peer(route.host);

        let completion = CommandSpec::new(&program)
            .arg(route.host)
            .arg(&route.return_path)
            .arg(route.recipient)
            .working_dir(config.working_dir())
            .run(config.timeout(), |Pipes { stdin, stdout }| {
                let mut stdin = BufWriter::new(stdin);
                message.write_to(&mut stdin)?;
                stdin.flush()?;
                drop(stdin);

                let mut response = Vec::new();
                stdout.take(RESPONSE_LIMIT).read_to_end(&mut response)?;
                Ok(response)
            })?;

        let outcome = interpret(completion);
        info!("{} to <{}> {}", log_prefix, route.recipient, outcome);
        reports.push(RecipientReport {
            recipient: route.recipient.to_owned(),
            outcome,
        });
    }

    Ok(reports)
}

fn interpret(completion: Completion<Vec<u8>>) -> Outcome {
    match completion.exit {
        ChildExit::Exited(0) => (),
        ChildExit::Exited(code) => {
            return Outcome::Deferred(Status::new(
                Signal::ExitCode(code),
                format!("qmail-remote exited with status {}", code),
            ));
        },
        ChildExit::Killed(signal) => {
            return Outcome::Deferred(Status::new(
                Signal::Killed(signal),
                format!("qmail-remote killed by signal {}", signal),
            ));
        },
        ChildExit::TimedOut => {
            return Outcome::TimedOut(Status::new(
                Signal::Deadline,
                "qmail-remote did not finish in time",
            ));
        },
    }

    match completion.result {
        Ok(response) => parse_response(&response),
        Err(e) => Outcome::Deferred(Status::new(
            Signal::ExitCode(0),
            format!("Unable to talk to qmail-remote: {}", e),
        )),
    }
}

/// Interpret the output of `qmail-remote` for a single recipient.
pub fn parse_response(response: &[u8]) -> Outcome {
    let reports = response
        .split(|&b| 0 == b)
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>();
    let recipient_report = reports
        .iter()
        .find(|r| matches!(r[0], b'r' | b'h' | b's'));
    let message_report = reports
        .iter()
        .rev()
        .find(|r| matches!(r[0], b'K' | b'Z' | b'D'));

    let text = recipient_report
        .iter()
        .chain(message_report.iter())
        .map(|r| String::from_utf8_lossy(&r[1..]).into_owned())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    let code = |r: Option<&&[u8]>| r.map(|r| r[0]);
    let status = |c: u8| Status::new(Signal::Response(c), text.clone());
    match (code(recipient_report), code(message_report)) {
        (Some(c @ b'h'), _) | (_, Some(c @ b'D')) => {
            Outcome::Rejected(status(c))
        },
        (Some(c @ b's'), _) | (_, Some(c @ b'Z')) => {
            Outcome::Deferred(status(c))
        },
        (_, Some(b'K')) => Outcome::Accepted(status(b'K')),
        _ => Outcome::Deferred(Status::new(
            Signal::ExitCode(0),
            format!(
                "Incomplete response from qmail-remote: {:?}",
                String::from_utf8_lossy(response)
            ),
        )),
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::qmail::queue::test::test_config;

    #[test]
    fn response_parsing() {
        assert_eq!(
            Outcome::Accepted(Status::new(
                Signal::Response(b'K'),
                "Accepted; ok 1234"
            )),
            parse_response(b"rAccepted\0Kok 1234\0")
        );
        assert_eq!(
            Outcome::Rejected(Status::new(
                Signal::Response(b'h'),
                "No such user; Giving up"
            )),
            parse_response(b"hNo such user\0DGiving up\0")
        );
        assert_eq!(
            Outcome::Deferred(Status::new(
                Signal::Response(b's'),
                "Busy; Try again"
            )),
            parse_response(b"sBusy\0ZTry again\0")
        );
        // Message-level failures without recipient reports, e.g. when the
        // connection failed.
        assert_eq!(
            Outcome::Deferred(Status::new(
                Signal::Response(b'Z'),
                "Connected but greeting failed"
            )),
            parse_response(b"ZConnected but greeting failed\0")
        );
        // An accepted recipient is not delivered unless the message is.
        assert_matches!(
            Outcome::Rejected(Status {
                signal: Signal::Response(b'D'),
                ..
            }),
            parse_response(b"rok\0Dmessage refused\0")
        );
        assert_matches!(
            Outcome::Deferred(Status {
                signal: Signal::ExitCode(0),
                ..
            }),
            parse_response(b"rok\0")
        );
        assert_matches!(Outcome::Deferred(..), parse_response(b""));
    }

    #[test]
    fn delivers_per_recipient() {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        let envelope = Envelope::new(
            "alice@example.com",
            vec![
                "bob@example.org".to_owned(),
                "bounce@example.net".to_owned(),
                "later@example.com".to_owned(),
            ],
        )
        .unwrap();
        let message = Message::new(vec!["hello".to_owned()]);

        let reports = deliver(&config, &envelope, &message).unwrap();
        assert_eq!(3, reports.len());
        assert_eq!("bob@example.org", reports[0].recipient);
        assert_eq!(
            Outcome::Accepted(Status::new(
                Signal::Response(b'K'),
                "Accepted for bob@example.org; ok"
            )),
            reports[0].outcome
        );
        assert_matches!(Outcome::Rejected(..), &reports[1].outcome);
        assert_eq!(
            "No such user; Giving up on example.net",
            reports[1].outcome.status().text
        );
        assert_matches!(Outcome::Deferred(..), &reports[2].outcome);

        assert_eq!(
            "example.org alice-bob=example.org@example.com bob@example.org\n\
             example.net alice-bounce=example.net@example.com \
             bounce@example.net\n\
             example.com alice-later=example.com@example.com \
             later@example.com\n",
            fs::read_to_string(root.path().join("remote-args")).unwrap()
        );
        assert_eq!(
            "hello\nhello\nhello\n",
            fs::read_to_string(root.path().join("remote-message")).unwrap()
        );
    }

    #[test]
    fn unroutable_recipient_stops_all_deliveries() {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        let envelope = Envelope::new(
            "alice@example.com",
            vec!["bob@example.org".to_owned(), "carol".to_owned()],
        )
        .unwrap();
        let message = Message::new(vec!["hello".to_owned()]);

        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            deliver(&config, &envelope, &message)
        );
        assert!(!root.path().join("remote-args").exists());
        assert!(!root.path().join("remote-message").exists());
    }

    #[test]
    fn bad_recipient_or_program() {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path());
        let message = Message::new(vec!["hello".to_owned()]);

        let envelope =
            Envelope::new("alice@example.com", vec!["bob".to_owned()])
                .unwrap();
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            deliver(&config, &envelope, &message)
        );
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            check_envelope(&config, &envelope)
        );

        config.remote_program = Some(root.path().join("nx"));
        let envelope = Envelope::new(
            "alice@example.com",
            vec!["bob@example.com".to_owned()],
        )
        .unwrap();
        assert_matches!(
            Err(Error::ProcessSpawn { .. }),
            deliver(&config, &envelope, &message)
        );
    }
}
