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

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::error::Error;

/// Location of `qmail-queue` relative to the qmail root.
const QMAIL_QUEUE: &str = "bin/qmail-queue";
/// Location of `qmail-remote` relative to the qmail root.
const QMAIL_REMOTE: &str = "bin/qmail-remote";
/// Location of the QMQP server list relative to the qmail root.
const QMQP_SERVERS: &str = "control/qmqpservers";

/// Configuration for a single submission.
///
/// This is stored in a file typically named `qsubmit.toml`, which is
/// typically `/etc/qsubmit.toml` or `/usr/local/etc/qsubmit.toml`. Every
/// field has a default, so an empty (or absent) file describes a stock qmail
/// installation under `/var/qmail`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// The qmail home directory.
    ///
    /// The other paths default to locations under this directory, and the
    /// queue and remote programs run with this as their working directory
    /// unless `no_chdir` is set.
    pub root: PathBuf,

    /// The program implementing the qmail-queue protocol.
    ///
    /// Defaults to `bin/qmail-queue` under `root`.
    pub queue_program: Option<PathBuf>,

    /// The program used for direct per-recipient delivery.
    ///
    /// Defaults to `bin/qmail-remote` under `root`.
    pub remote_program: Option<PathBuf>,

    /// The QMQP server to submit to.
    ///
    /// If unset, the first entry of `qmqp_servers` is used.
    pub qmqp_host: Option<String>,

    /// The TCP port of the QMQP server, unless the server list entry names
    /// its own.
    pub qmqp_port: u16,

    /// File listing QMQP servers, one `host[:port]` per line.
    ///
    /// Defaults to `control/qmqpservers` under `root`. Only the first entry
    /// is ever used.
    pub qmqp_servers: Option<PathBuf>,

    /// The character separating the return path's local part from the
    /// recipient information substituted in by VERP.
    pub verp_delimiter: char,

    /// If true, the return path is transmitted exactly as given.
    pub no_verp: bool,

    /// If true, child programs inherit the current working directory instead
    /// of running in `root`.
    pub no_chdir: bool,

    /// Seconds to allow a child program to run, or a QMQP server to answer,
    /// before giving up. 0 disables the limit.
    pub timeout: u64,

    /// Seconds to allow for establishing a QMQP connection. 0 disables the
    /// limit.
    pub connect_timeout: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        SubmissionConfig {
            root: "/var/qmail".into(),
            queue_program: None,
            remote_program: None,
            qmqp_host: None,
            qmqp_port: 628,
            qmqp_servers: None,
            verp_delimiter: '-',
            no_verp: false,
            no_chdir: false,
            timeout: 1200,
            connect_timeout: 10,
        }
    }
}

/// Run-time values which take precedence over the configuration file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub queue_program: Option<PathBuf>,
    pub remote_program: Option<PathBuf>,
    pub qmqp_host: Option<String>,
    pub qmqp_port: Option<u16>,
    pub qmqp_servers: Option<PathBuf>,
    pub verp_delimiter: Option<char>,
    pub no_verp: bool,
    pub no_chdir: bool,
    pub timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
}

impl SubmissionConfig {
    /// Load the configuration at `path`, then apply `overrides`.
    ///
    /// A missing file is equivalent to an empty one.
    pub fn load(
        path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, Error> {
        let mut config = match path {
            None => SubmissionConfig::default(),
            Some(path) => match fs::read_to_string(path) {
                Ok(text) => toml::from_str(&text).map_err(|source| {
                    Error::BadConfig {
                        path: path.to_owned(),
                        source,
                    }
                })?,
                Err(e) if io::ErrorKind::NotFound == e.kind() => {
                    SubmissionConfig::default()
                },
                Err(e) => return Err(e.into()),
            },
        };

        config.apply(overrides);
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        fn set<T: Clone>(dst: &mut T, src: &Option<T>) {
            if let Some(ref v) = *src {
                *dst = v.clone();
            }
        }

        fn set_some<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if src.is_some() {
                *dst = src.clone();
            }
        }

        set(&mut self.root, &overrides.root);
        set_some(&mut self.queue_program, &overrides.queue_program);
        set_some(&mut self.remote_program, &overrides.remote_program);
        set_some(&mut self.qmqp_host, &overrides.qmqp_host);
        set(&mut self.qmqp_port, &overrides.qmqp_port);
        set_some(&mut self.qmqp_servers, &overrides.qmqp_servers);
        set(&mut self.verp_delimiter, &overrides.verp_delimiter);
        self.no_verp |= overrides.no_verp;
        self.no_chdir |= overrides.no_chdir;
        set(&mut self.timeout, &overrides.timeout);
        set(&mut self.connect_timeout, &overrides.connect_timeout);
    }

    pub fn queue_program(&self) -> PathBuf {
        self.queue_program
            .clone()
            .unwrap_or_else(|| self.root.join(QMAIL_QUEUE))
    }

    pub fn remote_program(&self) -> PathBuf {
        self.remote_program
            .clone()
            .unwrap_or_else(|| self.root.join(QMAIL_REMOTE))
    }

    pub fn qmqp_servers(&self) -> PathBuf {
        self.qmqp_servers
            .clone()
            .unwrap_or_else(|| self.root.join(QMQP_SERVERS))
    }

    /// The directory child programs should run in, if any.
    pub fn working_dir(&self) -> Option<&Path> {
        if self.no_chdir {
            None
        } else {
            Some(&self.root)
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        seconds(self.timeout)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        seconds(self.connect_timeout)
    }
}

fn seconds(s: u64) -> Option<Duration> {
    if 0 == s {
        None
    } else {
        Some(Duration::from_secs(s))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_describe_stock_qmail() {
        let config = SubmissionConfig::default();
        assert_eq!(
            Path::new("/var/qmail/bin/qmail-queue"),
            config.queue_program()
        );
        assert_eq!(
            Path::new("/var/qmail/bin/qmail-remote"),
            config.remote_program()
        );
        assert_eq!(
            Path::new("/var/qmail/control/qmqpservers"),
            config.qmqp_servers()
        );
        assert_eq!(628, config.qmqp_port);
        assert_eq!('-', config.verp_delimiter);
        assert_eq!(Some(Path::new("/var/qmail")), config.working_dir());
        assert_eq!(Some(Duration::from_secs(1200)), config.timeout());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let config = SubmissionConfig::load(
            Some(&tmpdir.path().join("qsubmit.toml")),
            &ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(Path::new("/var/qmail"), config.root);
    }

    #[test]
    fn overrides_beat_file_beats_defaults() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let path = tmpdir.path().join("qsubmit.toml");
        fs::File::create(&path)
            .unwrap()
            .write_all(
                b"root = \"/opt/qmail\"\n\
                  qmqp_host = \"10.0.0.1\"\n\
                  verp_delimiter = \"+\"\n\
                  timeout = 0\n",
            )
            .unwrap();

        let overrides = ConfigOverrides {
            qmqp_host: Some("10.0.0.2".to_owned()),
            qmqp_port: Some(631),
            no_chdir: true,
            ..ConfigOverrides::default()
        };

        let config = SubmissionConfig::load(Some(&path), &overrides).unwrap();
        assert_eq!(
            Path::new("/opt/qmail/bin/qmail-queue"),
            config.queue_program()
        );
        assert_eq!(Some("10.0.0.2"), config.qmqp_host.as_deref());
        assert_eq!(631, config.qmqp_port);
        assert_eq!('+', config.verp_delimiter);
        assert_eq!(None, config.timeout());
        assert_eq!(None, config.working_dir());
        assert!(!config.no_verp);
    }

    #[test]
    fn unparsable_file_is_reported() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let path = tmpdir.path().join("qsubmit.toml");
        fs::write(&path, "qmqp_port = \"not a number\"\n").unwrap();

        assert_matches!(
            Err(Error::BadConfig { .. }),
            SubmissionConfig::load(Some(&path), &ConfigOverrides::default())
        );
    }
}
