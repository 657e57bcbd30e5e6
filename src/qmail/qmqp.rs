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

//! Client for QMQP, the Quick Mail Queueing Protocol.
//!
//! See <https://cr.yp.to/proto/qmqp.html>. The client sends one netstring
//! whose payload is the netstring-encoded message, return path, and each
//! recipient. The server answers with one netstring whose payload is a
//! status byte (`K`, `Z`, or `D`) followed by free text.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, error, info};
use regex::Regex;

use super::codes::{Outcome, Signal, Status};
use super::envelope::Envelope;
use super::message::Message;
use super::netstring;
use crate::support::{
    error::Error, log_prefix::LogPrefix, system_config::SubmissionConfig,
};

/// The most response data that will be read.
///
/// QMQP responses are short status lines, so anything longer is treated as
/// garbage.
const RESPONSE_LIMIT: usize = 1000;

lazy_static! {
    static ref RX_RESPONSE: Regex = Regex::new("(?s)^([KZD])(.*)$").unwrap();
}

/// A QMQP server address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Server {
    /// Parse a `host[:port]` server list entry.
    fn parse(entry: &str, default_port: u16) -> Self {
        if let Ok(addr) = entry.parse::<SocketAddr>() {
            return Server {
                host: addr.ip().to_string(),
                port: addr.port(),
            };
        }

        // A bare IPv6 address is full of colons but has no port.
        if entry.parse::<IpAddr>().is_err() {
            if let Some((host, port)) = entry
                .rsplit_once(':')
                .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h, p)))
            {
                return Server {
                    host: host.to_owned(),
                    port,
                };
            }
        }

        Server {
            host: entry.to_owned(),
            port: default_port,
        }
    }
}

/// Determine which server to submit to.
///
/// An explicitly configured host wins. Otherwise, the first non-blank line of
/// the server list is used; later entries are never consulted. A missing list
/// is the same as an empty one.
pub fn discover_server(config: &SubmissionConfig) -> Result<Server, Error> {
    if let Some(ref host) = config.qmqp_host {
        return Ok(Server {
            host: host.clone(),
            port: config.qmqp_port,
        });
    }

    let path = config.qmqp_servers();
    let list = match fs::read_to_string(&path) {
        Ok(list) => list,
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            return Err(Error::NoQmqpServer(path));
        },
        Err(e) => return Err(e.into()),
    };
    let entry = list
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(Error::NoQmqpServer(path))?;
    Ok(Server::parse(entry, config.qmqp_port))
}

/// Build the complete, framed QMQP request.
pub fn build_request(
    message: &Message,
    return_path: &str,
    recipients: &[String],
) -> Vec<u8> {
    let body = message.to_bytes();
    let mut payload = Vec::with_capacity(
        body.len()
            + return_path.len()
            + recipients.iter().map(|r| r.len() + 8).sum::<usize>()
            + 32,
    );
    netstring::encode_into(&mut payload, &body);
    netstring::encode_into(&mut payload, return_path.as_bytes());
    for recipient in recipients {
        netstring::encode_into(&mut payload, recipient.as_bytes());
    }

    netstring::encode(&payload)
}

/// Interpret the payload of a QMQP response.
///
/// Unknown status bytes are treated as permanent failures.
pub fn classify(payload: &[u8]) -> Result<Outcome, Error> {
    let Some(&first) = payload.first() else {
        return Err(Error::Protocol("empty response".to_owned()));
    };

    let text = String::from_utf8_lossy(payload);
    let Some(cap) = RX_RESPONSE.captures(&text) else {
        return Ok(Outcome::Rejected(Status::new(
            Signal::Response(first),
            format!("unrecognized response: {}", text),
        )));
    };

    let status = Status::new(Signal::Response(first), &cap[2]);
    Ok(match &cap[1] {
        "K" => Outcome::Accepted(status),
        "Z" => Outcome::Deferred(status),
        _ => Outcome::Rejected(status),
    })
}

/// Submit the message to a QMQP server in a single round trip.
pub fn submit(
    config: &SubmissionConfig,
    envelope: &Envelope,
    message: &Message,
) -> Result<Outcome, Error> {
    let return_path = envelope.wire_return_path(config)?;
    let server = discover_server(config)?;

    let mut log_prefix = LogPrefix::new("qmqp");
    log_prefix.set_sender(&return_path);
    log_prefix.set_peer(&server.to_string());

    let request = build_request(message, &return_path, envelope.recipients());
    let result = exchange(config, &server, &request);
    match result {
        Ok(ref outcome) => info!(
            "{} to {} recipient(s) {}",
            log_prefix,
            envelope.recipients().len(),
            outcome
        ),
        Err(ref e) => error!("{} {}", log_prefix, e),
    }

    result
}

fn exchange(
    config: &SubmissionConfig,
    server: &Server,
    request: &[u8],
) -> Result<Outcome, Error> {
    let transport_error = |source: io::Error| Error::Connection {
        server: server.to_string(),
        source,
    };

    // The stream is closed when it goes out of scope, whichever way this
    // function returns.
    let mut stream = connect(server, config.connect_timeout())?;
    stream
        .set_read_timeout(config.timeout())
        .and_then(|_| stream.set_write_timeout(config.timeout()))
        .map_err(transport_error)?;

    if let Err(e) = stream.write_all(request) {
        return if is_timeout(&e) {
            Ok(timed_out("sending the request", config))
        } else {
            Err(transport_error(e))
        };
    }

    let mut response = Vec::with_capacity(RESPONSE_LIMIT);
    let mut buf = [0u8; RESPONSE_LIMIT];
    loop {
        let nread = match stream.read(&mut buf[..RESPONSE_LIMIT - response.len()])
        {
            Ok(n) => n,
            Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
            Err(e) if is_timeout(&e) => {
                return Ok(timed_out("waiting for a response", config));
            },
            Err(e) => return Err(transport_error(e)),
        };
        response.extend_from_slice(&buf[..nread]);

        match netstring::split(&response) {
            Ok((payload, _)) => return classify(payload),
            Err(e) if 0 == nread || response.len() >= RESPONSE_LIMIT => {
                return Err(Error::Protocol(format!(
                    "bad response {:?}: {}",
                    String::from_utf8_lossy(&response),
                    e
                )));
            },
            Err(_) => debug!("Partial QMQP response, {} bytes", response.len()),
        }
    }
}

fn connect(
    server: &Server,
    timeout: Option<Duration>,
) -> Result<TcpStream, Error> {
    let connection_error = |source: io::Error| Error::Connection {
        server: server.to_string(),
        source,
    };

    let addrs = (server.host.as_str(), server.port)
        .to_socket_addrs()
        .map_err(connection_error)?;

    let mut last_error = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Failed to connect to {}: {}", addr, e);
                last_error = Some(e);
            },
        }
    }

    Err(connection_error(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host has no addresses")
    })))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn timed_out(what: &str, config: &SubmissionConfig) -> Outcome {
    Outcome::TimedOut(Status::new(
        Signal::Deadline,
        format!("no progress {} after {} seconds", what, config.timeout),
    ))
}
