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

use std::io::{self, Write};

use crate::support::{error::Error, system_config::SubmissionConfig};

/// Appended to a return path to ask qmail to apply VERP at delivery time.
pub const VERP_MARKER: &str = "-@[]";

/// The return path and recipients of a message.
///
/// An `Envelope` always has at least one recipient, and none of its
/// addresses contain NUL, which would corrupt the qmail-queue framing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    return_path: String,
    recipients: Vec<String>,
}

impl Envelope {
    pub fn new(
        return_path: impl Into<String>,
        recipients: Vec<String>,
    ) -> Result<Self, Error> {
        let return_path = return_path.into();
        if return_path.contains('\0') {
            return Err(Error::InvalidEnvelope(
                "NUL in return path".to_owned(),
            ));
        }

        if recipients.is_empty() {
            return Err(Error::InvalidEnvelope("no recipients".to_owned()));
        }

        for recipient in &recipients {
            if recipient.is_empty() {
                return Err(Error::InvalidEnvelope(
                    "empty recipient address".to_owned(),
                ));
            }

            if recipient.contains('\0') {
                return Err(Error::InvalidEnvelope(format!(
                    "NUL in recipient {:?}",
                    recipient
                )));
            }
        }

        Ok(Envelope {
            return_path,
            recipients,
        })
    }

    pub fn return_path(&self) -> &str {
        &self.return_path
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// The return path to transmit to qmail-queue or a QMQP server.
    pub fn wire_return_path(
        &self,
        config: &SubmissionConfig,
    ) -> Result<String, Error> {
        if config.no_verp {
            Ok(self.return_path.clone())
        } else {
            verp_rewrite(&self.return_path, config.verp_delimiter)
        }
    }

    /// The return path to use when delivering to `recipient` alone.
    pub fn recipient_return_path(
        &self,
        recipient: &str,
        config: &SubmissionConfig,
    ) -> Result<String, Error> {
        if config.no_verp {
            Ok(self.return_path.clone())
        } else {
            verp_for_recipient(
                &self.return_path,
                recipient,
                config.verp_delimiter,
            )
        }
    }

    /// Write the envelope in the format `qmail-queue` reads from descriptor
    /// 1: `F<sender>\0`, then `T<recipient>\0` for each recipient, then a
    /// final `\0`.
    pub fn write_queue_envelope(
        &self,
        mut dst: impl Write,
        return_path: &str,
    ) -> io::Result<()> {
        write!(dst, "F{}\0", return_path)?;
        for recipient in &self.recipients {
            write!(dst, "T{}\0", recipient)?;
        }
        dst.write_all(b"\0")
    }
}

/// Rewrite `return_path` so that qmail performs VERP at delivery time.
///
/// `bounces@example.com` becomes `bounces-@example.com-@[]`. Rewriting an
/// already rewritten path changes nothing.
pub fn verp_rewrite(return_path: &str, delimiter: char) -> Result<String, Error> {
    let (local, domain) = return_path
        .split_once('@')
        .ok_or_else(|| Error::InvalidReturnPath(return_path.to_owned()))?;

    let mut rewritten = String::with_capacity(return_path.len() + 8);
    rewritten.push_str(local);
    if !local.ends_with(delimiter) {
        rewritten.push(delimiter);
    }
    rewritten.push('@');
    rewritten.push_str(domain);
    if !rewritten.ends_with(VERP_MARKER) {
        rewritten.push_str(VERP_MARKER);
    }

    Ok(rewritten)
}

/// Produce the VERP return path for delivering directly to `recipient`.
///
/// `bounces@lists.example.com` sending to `bob@example.org` becomes
/// `bounces-bob=example.org@lists.example.com`.
pub fn verp_for_recipient(
    return_path: &str,
    recipient: &str,
    delimiter: char,
) -> Result<String, Error> {
    let base = return_path.strip_suffix(VERP_MARKER).unwrap_or(return_path);
    let (local, domain) = base
        .split_once('@')
        .ok_or_else(|| Error::InvalidReturnPath(return_path.to_owned()))?;
    let (mailbox, host) = recipient.rsplit_once('@').ok_or_else(|| {
        Error::InvalidEnvelope(format!("recipient {:?} has no domain", recipient))
    })?;

    let mut verp = String::with_capacity(base.len() + recipient.len() + 1);
    verp.push_str(local);
    if !local.ends_with(delimiter) {
        verp.push(delimiter);
    }
    verp.push_str(mailbox);
    verp.push('=');
    verp.push_str(host);
    verp.push('@');
    verp.push_str(domain);
    Ok(verp)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn rewrite_return_path() {
        assert_eq!(
            "bounces-@example.com-@[]",
            verp_rewrite("bounces@example.com", '-').unwrap()
        );
        assert_eq!(
            "bounces-@example.com-@[]",
            verp_rewrite("bounces-@example.com", '-').unwrap()
        );
        assert_eq!(
            "bounces-@example.com-@[]",
            verp_rewrite("bounces-@example.com-@[]", '-').unwrap()
        );
        assert_eq!(
            "bounces+@example.com-@[]",
            verp_rewrite("bounces@example.com", '+').unwrap()
        );
        assert_matches!(
            Err(Error::InvalidReturnPath(..)),
            verp_rewrite("bounces", '-')
        );
        assert_matches!(Err(Error::InvalidReturnPath(..)), verp_rewrite("", '-'));
    }

    #[test]
    fn rewrite_for_recipient() {
        assert_eq!(
            "bounces-bob=example.org@lists.example.com",
            verp_for_recipient(
                "bounces@lists.example.com",
                "bob@example.org",
                '-'
            )
            .unwrap()
        );
        assert_eq!(
            "bounces-bob=example.org@lists.example.com",
            verp_for_recipient(
                "bounces-@lists.example.com-@[]",
                "bob@example.org",
                '-'
            )
            .unwrap()
        );
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            verp_for_recipient("bounces@example.com", "bob", '-')
        );
    }

    #[test]
    fn envelope_validation() {
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            Envelope::new("alice@example.com", vec![])
        );
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            Envelope::new("alice@example.com", vec!["bob\0@example.com".to_owned()])
        );
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            Envelope::new("alice@example.com", vec![String::new()])
        );
        assert_matches!(
            Err(Error::InvalidEnvelope(..)),
            Envelope::new("alice\0@example.com", vec!["bob@example.com".to_owned()])
        );

        let envelope = Envelope::new(
            "alice@example.com",
            vec!["bob@example.com".to_owned(), "bob@example.com".to_owned()],
        )
        .unwrap();
        assert_eq!(2, envelope.recipients().len());
    }

    #[test]
    fn wire_return_path_respects_no_verp() {
        let envelope =
            Envelope::new("", vec!["bob@example.com".to_owned()]).unwrap();

        let mut config = SubmissionConfig::default();
        assert_matches!(
            Err(Error::InvalidReturnPath(..)),
            envelope.wire_return_path(&config)
        );

        config.no_verp = true;
        assert_eq!("", envelope.wire_return_path(&config).unwrap());
        assert_eq!(
            "",
            envelope
                .recipient_return_path("bob@example.com", &config)
                .unwrap()
        );
    }

    #[test]
    fn queue_envelope_format() {
        let envelope = Envelope::new(
            "alice@example.com",
            vec!["bob@example.com".to_owned(), "carol@example.net".to_owned()],
        )
        .unwrap();

        let mut out = Vec::new();
        envelope
            .write_queue_envelope(&mut out, "alice-@example.com-@[]")
            .unwrap();
        assert_eq!(
            b"Falice-@example.com-@[]\0\
              Tbob@example.com\0\
              Tcarol@example.net\0\
              \0" as &[u8],
            &out[..]
        );
    }

    proptest! {
        #[test]
        fn rewrite_is_idempotent(
            local in "[a-z0-9.+=-]{0,16}",
            domain in "[a-z0-9.-]{1,16}",
            delimiter in prop::sample::select(vec!['-', '+', '=']),
        ) {
            let once = verp_rewrite(&format!("{}@{}", local, domain), delimiter)
                .unwrap();
            let twice = verp_rewrite(&once, delimiter).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
