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

//! Resolving caller-supplied message and recipient inputs.
//!
//! Everything is read fully into memory before any protocol I/O starts, so
//! slow file reads are never interleaved with writes to a child's pipes.

use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

use crate::support::error::Error;

/// A message body, as an ordered sequence of lines without terminators.
///
/// Lines are raw bytes; mail in any character set passes through unchanged.
/// A `Message` can be sent any number of times.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    lines: Vec<Vec<u8>>,
}

impl Message {
    pub fn new<L: Into<Vec<u8>>>(lines: impl IntoIterator<Item = L>) -> Self {
        Message {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    /// Write every line, each followed by a line feed.
    pub fn write_to(&self, mut dst: impl Write) -> io::Result<()> {
        for line in &self.lines {
            dst.write_all(line)?;
            dst.write_all(b"\n")?;
        }
        Ok(())
    }

    /// The message as it is transmitted: every line terminated by a line
    /// feed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            self.lines.iter().map(|l| l.len() + 1).sum(),
        );
        for line in &self.lines {
            bytes.extend_from_slice(line);
            bytes.push(b'\n');
        }
        bytes
    }
}

/// Where a message comes from.
///
/// Text read from a literal, a file, or a stream is split on line feeds. A
/// carriage return before a line feed is dropped, since qmail stores and
/// transmits messages with bare line feeds.
pub enum MessageSource {
    /// The message text itself.
    Literal(String),
    /// A file holding the message.
    FileBacked(PathBuf),
    /// Lines produced by the caller, used exactly as given.
    Sequence(Vec<Vec<u8>>),
    /// Any other stream, such as standard input.
    Reader(Box<dyn BufRead>),
}

impl MessageSource {
    pub fn resolve(self) -> Result<Message, Error> {
        let lines = match self {
            MessageSource::Literal(text) => split_lines(text.as_bytes()),
            MessageSource::FileBacked(path) => split_lines(&fs::read(path)?),
            MessageSource::Sequence(lines) => lines,
            MessageSource::Reader(mut reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data)?;
                split_lines(&data)
            },
        };

        Ok(Message { lines })
    }
}

/// Where the recipients come from.
#[derive(Clone, Debug)]
pub enum RecipientSource {
    /// A single address.
    Literal(String),
    /// A file with one address per line. Blank lines are ignored.
    FileBacked(PathBuf),
    Sequence(Vec<String>),
}

impl RecipientSource {
    pub fn resolve(self) -> Result<Vec<String>, Error> {
        Ok(match self {
            RecipientSource::Literal(address) => vec![address],
            RecipientSource::FileBacked(path) => fs::read_to_string(path)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
            RecipientSource::Sequence(addresses) => addresses,
        })
    }
}

fn split_lines(mut data: &[u8]) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while !data.is_empty() {
        let (line, rest) = match data.iter().position(|&b| b'\n' == b) {
            Some(lf) => (&data[..lf], &data[lf + 1..]),
            None => (data, &[][..]),
        };
        lines.push(line.strip_suffix(b"\r").unwrap_or(line).to_vec());
        data = rest;
    }

    lines
}
