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


use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use super::submit::{self, Method, SubmitOptions, Target};
use crate::support::sysexits::*;
use crate::support::system_config::{ConfigOverrides, SubmissionConfig};

/// Submit a message to a qmail-compatible mail transfer agent.
///
/// The message is read from standard input unless `--message` names a file.
/// Recipients are taken from the command line and, if given, from a file
/// with one address per line.
///
/// Unless `--no-verp` is given, the return path is rewritten so that each
/// recipient's bounces come back to an address identifying that recipient
/// (variable envelope return path).
///
/// The exit status is 0 if the message was accepted, EX_UNAVAILABLE (69) if
/// it was permanently refused, and EX_TEMPFAIL (75) if it should be tried
/// again later.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Command {
    #[structopt(flatten)]
    global: GlobalOptions,

    #[structopt(subcommand)]
    method: MethodSubcommand,
}

#[derive(StructOpt)]
struct GlobalOptions {
    /// The configuration file
    /// [default: /etc/qsubmit.toml or /usr/local/etc/qsubmit.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// The qmail installation directory [default: /var/qmail]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,

    /// The program to run instead of `bin/qmail-queue` under the root
    #[structopt(long, parse(from_os_str))]
    queue_program: Option<PathBuf>,

    /// The program to run instead of `bin/qmail-remote` under the root
    #[structopt(long, parse(from_os_str))]
    remote_program: Option<PathBuf>,

    /// Send to this QMQP server instead of the first one listed in the
    /// server list
    #[structopt(long)]
    qmqp_host: Option<String>,

    /// The default QMQP port [default: 628]
    #[structopt(long)]
    qmqp_port: Option<u16>,

    /// The QMQP server list [default: control/qmqpservers under the root]
    #[structopt(long, parse(from_os_str))]
    qmqp_servers: Option<PathBuf>,

    /// The character qmail puts between the sender and the recipient in
    /// VERP addresses [default: -]
    #[structopt(long)]
    verp_delimiter: Option<char>,

    /// Pass the return path through unchanged.
    #[structopt(long)]
    no_verp: bool,

    /// Run qmail programs in the current directory instead of the root.
    #[structopt(long)]
    no_chdir: bool,

    /// Give up on a submission after this many seconds; 0 waits forever
    /// [default: 1200]
    #[structopt(long)]
    timeout: Option<u64>,

    /// Give up connecting to a QMQP server after this many seconds; 0 waits
    /// forever [default: 10]
    #[structopt(long)]
    connect_timeout: Option<u64>,
}

impl GlobalOptions {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            root: self.root.clone(),
            queue_program: self.queue_program.clone(),
            remote_program: self.remote_program.clone(),
            qmqp_host: self.qmqp_host.clone(),
            qmqp_port: self.qmqp_port,
            qmqp_servers: self.qmqp_servers.clone(),
            verp_delimiter: self.verp_delimiter,
            no_verp: self.no_verp,
            no_chdir: self.no_chdir,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

#[derive(StructOpt)]
enum MethodSubcommand {
    /// Place the message into the local queue with `qmail-queue`.
    Queue(SubmitOptions),
    /// Send the message to a QMQP server.
    ///
    /// The server is `--qmqp-host` if given, otherwise the first entry of
    /// the QMQP server list. Entries may be `host` or `host:port`.
    Qmqp(SubmitOptions),
    /// Deliver the message directly with `qmail-remote`, bypassing the
    /// queue.
    ///
    /// Each recipient is delivered separately, to the host named by the
    /// domain part of its address. The exit status reflects the worst
    /// outcome among the recipients.
    Remote(SubmitOptions),
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let config_path = match cmd.global.config {
        Some(ref path) if !path.is_file() => {
            die!(EX_CONFIG, "'{}' is not a file", path.display())
        },
        Some(ref path) => Some(path.clone()),
        None => ["/etc/qsubmit.toml", "/usr/local/etc/qsubmit.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.is_file()),
    };

    let config = match SubmissionConfig::load(
        config_path.as_deref(),
        &cmd.global.overrides(),
    ) {
        Ok(config) => config,
        Err(e) => die!(Sysexit::from(&e), "{}", e),
    };

    init_logging(config_path.as_deref());

    let (method, options) = match cmd.method {
        MethodSubcommand::Queue(options) => (Method::Queue, options),
        MethodSubcommand::Qmqp(options) => (Method::Qmqp, options),
        MethodSubcommand::Remote(options) => (Method::Remote, options),
    };

    let mut target = Target::new(method, config);
    if let Err(exit) =
        submit::run_submission(options, io::stdin().lock(), &mut target)
    {
        exit.exit();
    }
}

fn init_logging(config_path: Option<&Path>) {
    if io::stderr().is_terminal() {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // log4rs-syslog has not been updated in a long time, so it is log4rs
    // *or* syslog.
    let log_config_file = config_path
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("/etc"))
        .join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::config::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: std::process::id(),
        };

        match syslog::unix(formatter) {
            Ok(logger) => {
                if log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
                    logger,
                )))
                .is_ok()
                {
                    log::set_max_level(log::LevelFilter::Info);
                }
            },
            Err(e) => eprintln!("Failed to connect to syslog: {}", e),
        }
    }
}
