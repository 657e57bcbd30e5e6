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

use std::fmt;
use std::mem;

/// Text included at the start of every log statement about one submission.
#[derive(Clone, Debug)]
pub struct LogPrefix {
    protocol: &'static str,
    sender: Option<String>,
    peer: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: &'static str) -> Self {
        Self {
            protocol,
            sender: None,
            peer: None,
        }
    }

    pub fn set_sender(&mut self, sender: &str) {
        self.sender = Some(sanitise(sender));
    }

    /// Record the program or server on the other end of the submission.
    pub fn set_peer(&mut self, peer: &str) {
        self.peer = Some(sanitise(peer));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.protocol)?;
        if self.sender.is_some() || self.peer.is_some() {
            write!(f, "[")?;
            let mut first = true;
            if let Some(ref sender) = self.sender {
                write!(f, "from=<{sender}>")?;
                first = false;
            }

            if let Some(ref peer) = self.peer {
                if !mem::take(&mut first) {
                    write!(f, " ")?;
                }
                write!(f, "peer={peer}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

fn sanitise(s: &str) -> String {
    let mut s = s.to_owned();
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(128) {
        s.truncate(truncate_len);
    }

    s
}
