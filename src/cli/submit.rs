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


use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::{error, warn};
use structopt::StructOpt;

use crate::qmail::{
    codes::Outcome,
    envelope::Envelope,
    message::{Message, MessageSource, RecipientSource},
    qmqp, queue, remote,
};
use crate::support::{
    error::Error, sysexits::*, system_config::SubmissionConfig,
};

#[derive(StructOpt)]
pub(super) struct SubmitOptions {
    /// The envelope return path. An empty string is the null sender, which
    /// requires --no-verp.
    #[structopt(short = "f", long = "from")]
    pub(super) return_path: String,

    /// The file holding the message. "-" reads from stdin.
    #[structopt(long, parse(from_os_str), default_value = "-")]
    pub(super) message: PathBuf,

    /// Also read recipients from this file, one per line.
    #[structopt(long, parse(from_os_str))]
    pub(super) recipients_file: Option<PathBuf>,

    /// The envelope recipients.
    pub(super) recipients: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Method {
    Queue,
    Qmqp,
    Remote,
}

pub(super) trait Submitter {
    /// Check that `envelope` can be submitted, before any message is read.
    fn validate(&self, envelope: &Envelope) -> Result<(), Error>;

    /// Submit the message, returning one outcome per attempt made.
    fn submit(
        &mut self,
        envelope: &Envelope,
        message: &Message,
    ) -> Result<Vec<Outcome>, Error>;
}

pub(super) struct Target {
    method: Method,
    config: SubmissionConfig,
}

impl Target {
    pub(super) fn new(method: Method, config: SubmissionConfig) -> Self {
        Target { method, config }
    }
}

impl Submitter for Target {
    fn validate(&self, envelope: &Envelope) -> Result<(), Error> {
        match self.method {
            Method::Queue | Method::Qmqp => {
                envelope.wire_return_path(&self.config).map(|_| ())
            },
            Method::Remote => remote::check_envelope(&self.config, envelope),
        }
    }

    fn submit(
        &mut self,
        envelope: &Envelope,
        message: &Message,
    ) -> Result<Vec<Outcome>, Error> {
        let config = &self.config;
        let outcomes = match self.method {
            Method::Queue => vec![queue::submit(config, envelope, message)?],
            Method::Qmqp => vec![qmqp::submit(config, envelope, message)?],
            Method::Remote => remote::deliver(config, envelope, message)?
                .into_iter()
                .map(|report| {
                    if !report.outcome.is_accepted() {
                        eprintln!("<{}>: {}", report.recipient, report.outcome);
                    }
                    report.outcome
                })
                .collect(),
        };

        if Method::Remote != self.method {
            for outcome in outcomes.iter().filter(|o| !o.is_accepted()) {
                eprintln!("{}", outcome);
            }
        }

        Ok(outcomes)
    }
}

pub(super) fn run_submission(
    cmd: SubmitOptions,
    stdin: impl BufRead + 'static,
    target: &mut impl Submitter,
) -> Result<(), Sysexit> {
    let (envelope, message) = match prepare(cmd, stdin, target) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Unable to prepare submission: {}", e);
            eprintln!("{}", e);
            return Err(Sysexit::from(&e));
        },
    };

    let outcomes = match target.submit(&envelope, &message) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            if e.is_transient() {
                warn!("Submission failed, try again later: {}", e);
            } else {
                error!("Submission failed: {}", e);
            }
            eprintln!("{}", e);
            return Err(Sysexit::from(&e));
        },
    };

    match outcomes.iter().map(outcome_exit).max_by_key(|&e| severity(e)) {
        None | Some(EX_OK) => Ok(()),
        Some(exit) => Err(exit),
    }
}

fn prepare(
    cmd: SubmitOptions,
    stdin: impl BufRead + 'static,
    target: &impl Submitter,
) -> Result<(Envelope, Message), Error> {
    let mut recipients = RecipientSource::Sequence(cmd.recipients).resolve()?;
    if let Some(path) = cmd.recipients_file {
        recipients.extend(RecipientSource::FileBacked(path).resolve()?);
    }

    // Validate the envelope before consuming stdin.
    let envelope = Envelope::new(cmd.return_path, recipients)?;
    target.validate(&envelope)?;

    let source = if Path::new("-") == cmd.message {
        MessageSource::Reader(Box::new(stdin))
    } else {
        MessageSource::FileBacked(cmd.message)
    };

    Ok((envelope, source.resolve()?))
}

fn outcome_exit(outcome: &Outcome) -> Sysexit {
    match *outcome {
        Outcome::Accepted(..) => EX_OK,
        Outcome::Rejected(..) => EX_UNAVAILABLE,
        Outcome::Deferred(..) | Outcome::TimedOut(..) => EX_TEMPFAIL,
    }
}

// A permanent refusal of any recipient outweighs a temporary one.
fn severity(exit: Sysexit) -> u8 {
    match exit {
        EX_OK => 0,
        EX_TEMPFAIL => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use tempfile::TempDir;

    use super::*;
    use crate::qmail::codes::{Signal, Status};

    #[derive(Default)]
    struct MockTarget {
        outcomes: Vec<Outcome>,
        error: Option<Error>,
        submitted: Vec<(Envelope, Message)>,
    }

    impl Submitter for MockTarget {
        fn validate(&self, _: &Envelope) -> Result<(), Error> {
            Ok(())
        }

        fn submit(
            &mut self,
            envelope: &Envelope,
            message: &Message,
        ) -> Result<Vec<Outcome>, Error> {
            self.submitted.push((envelope.clone(), message.clone()));
            match self.error.take() {
                Some(e) => Err(e),
                None => Ok(self.outcomes.clone()),
            }
        }
    }

    fn accepted() -> Outcome {
        Outcome::Accepted(Status::new(Signal::ExitCode(0), "Success"))
    }

    fn rejected() -> Outcome {
        Outcome::Rejected(Status::new(Signal::Response(b'D'), "no"))
    }

    fn deferred() -> Outcome {
        Outcome::Deferred(Status::new(Signal::Response(b'Z'), "later"))
    }

    fn options(recipients: &[&str]) -> SubmitOptions {
        SubmitOptions {
            return_path: "alice@example.com".to_owned(),
            message: "-".into(),
            recipients_file: None,
            recipients: recipients.iter().map(|&r| r.to_owned()).collect(),
        }
    }

    fn stdin(text: &'static str) -> impl BufRead + 'static {
        io::Cursor::new(text.as_bytes())
    }

    /// Standard input that must never be touched.
    struct UnreadStdin;

    impl io::Read for UnreadStdin {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            panic!("stdin read before the envelope was checked");
        }
    }

    impl BufRead for UnreadStdin {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            panic!("stdin read before the envelope was checked");
        }

        fn consume(&mut self, _: usize) {}
    }

    #[test]
    fn submits_stdin() {
        crate::init_test_log();

        let mut target = MockTarget {
            outcomes: vec![accepted()],
            ..MockTarget::default()
        };
        assert_eq!(
            Ok(()),
            run_submission(
                options(&["bob@example.com", "carol@example.com"]),
                stdin("Subject: hi\n\nhello\n"),
                &mut target,
            )
        );

        assert_eq!(1, target.submitted.len());
        let (ref envelope, ref message) = target.submitted[0];
        assert_eq!("alice@example.com", envelope.return_path());
        assert_eq!(
            &["bob@example.com".to_owned(), "carol@example.com".to_owned()],
            envelope.recipients()
        );
        assert_eq!(b"Subject: hi\n\nhello\n".to_vec(), message.to_bytes());
    }

    #[test]
    fn submits_files() {
        crate::init_test_log();

        let dir = TempDir::new().unwrap();
        let message_path = dir.path().join("message");
        let recipients_path = dir.path().join("recipients");
        fs::write(&message_path, "Subject: x\r\n\r\nbody\r\n").unwrap();
        fs::write(&recipients_path, "carol@example.com\n\n  dave@example.com\n")
            .unwrap();

        let mut target = MockTarget {
            outcomes: vec![accepted()],
            ..MockTarget::default()
        };
        let mut cmd = options(&["bob@example.com"]);
        cmd.message = message_path;
        cmd.recipients_file = Some(recipients_path);
        assert_eq!(Ok(()), run_submission(cmd, stdin("unused"), &mut target));

        let (ref envelope, ref message) = target.submitted[0];
        assert_eq!(
            &[
                "bob@example.com".to_owned(),
                "carol@example.com".to_owned(),
                "dave@example.com".to_owned()
            ],
            envelope.recipients()
        );
        assert_eq!(b"Subject: x\n\nbody\n".to_vec(), message.to_bytes());
    }

    #[test]
    fn outcome_exit_status() {
        crate::init_test_log();

        fn run(outcomes: Vec<Outcome>) -> Result<(), Sysexit> {
            let mut target = MockTarget {
                outcomes,
                ..MockTarget::default()
            };
            run_submission(
                options(&["bob@example.com"]),
                stdin("hello\n"),
                &mut target,
            )
        }

        assert_eq!(Ok(()), run(vec![accepted(), accepted()]));
        assert_eq!(Err(EX_UNAVAILABLE), run(vec![rejected()]));
        assert_eq!(Err(EX_TEMPFAIL), run(vec![accepted(), deferred()]));
        assert_eq!(
            Err(EX_TEMPFAIL),
            run(vec![Outcome::TimedOut(Status::new(
                Signal::Deadline,
                "slow"
            ))])
        );
        assert_eq!(
            Err(EX_UNAVAILABLE),
            run(vec![deferred(), rejected(), accepted()])
        );
    }

    #[test]
    fn submission_errors() {
        crate::init_test_log();

        let mut target = MockTarget {
            error: Some(Error::NoQmqpServer("/nx".into())),
            ..MockTarget::default()
        };
        assert_eq!(
            Err(EX_CONFIG),
            run_submission(
                options(&["bob@example.com"]),
                stdin("hello\n"),
                &mut target,
            )
        );
    }

    #[test]
    fn bad_input() {
        crate::init_test_log();

        let mut target = MockTarget::default();
        assert_eq!(
            Err(EX_DATAERR),
            run_submission(options(&[]), stdin("hello\n"), &mut target)
        );

        let mut cmd = options(&["bob@example.com"]);
        cmd.message = "/nonexistent/message".into();
        assert_eq!(
            Err(EX_NOINPUT),
            run_submission(cmd, stdin(""), &mut target)
        );

        let mut cmd = options(&["bob@example.com"]);
        cmd.recipients_file = Some("/nonexistent/recipients".into());
        assert_eq!(
            Err(EX_NOINPUT),
            run_submission(cmd, stdin(""), &mut target)
        );

        assert!(target.submitted.is_empty());
    }

    #[test]
    fn return_path_checked_before_reading_stdin() {
        crate::init_test_log();

        for &method in &[Method::Queue, Method::Qmqp, Method::Remote] {
            let mut target = Target::new(method, SubmissionConfig::default());
            let mut cmd = options(&["bob@example.com"]);
            cmd.return_path = "alice".to_owned();
            assert_eq!(
                Err(EX_DATAERR),
                run_submission(cmd, UnreadStdin, &mut target)
            );
        }

        let mut target =
            Target::new(Method::Remote, SubmissionConfig::default());
        assert_eq!(
            Err(EX_DATAERR),
            run_submission(
                options(&["bob@example.com", "carol"]),
                UnreadStdin,
                &mut target
            )
        );
    }
}
