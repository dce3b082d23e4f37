//-
// Copyright (c) 2020, The E3Mail developers
//
// This file is part of E3Mail.
//
// E3Mail is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// E3Mail is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// E3Mail. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::{AccountConfig, SystemConfig};

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// The directory containing `e3mail.toml` etc
    /// [default: /etc/e3mail or /usr/local/etc/e3mail]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,

    /// UUID or email address of the account to operate on. Can be omitted if
    /// only one account is configured.
    #[structopt(long, short)]
    account: Option<String>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Manage the account's key store.
    Key(KeySubcommand),
    /// Encrypt or decrypt a single message file with the account's key.
    Smime(SmimeSubcommand),
    /// Inspect the account's queue of remote operations.
    Pending(PendingSubcommand),
    Verify(VerifySubcommand),
}

#[derive(StructOpt)]
pub(super) enum KeySubcommand {
    /// Generate a new key and save it in the key store.
    ///
    /// This does not touch the mail server. Clients normally generate or
    /// recover the key themselves on first use; this exists for setting up
    /// an account offline. Use --backup to also produce the key backup
    /// message, which can then be placed in the backup folder by hand.
    Generate {
        /// Replace a key that is already in the store.
        #[structopt(long)]
        replace: bool,
        /// Write the key backup message to this file.
        #[structopt(long, parse(from_os_str))]
        backup: Option<PathBuf>,
    },
    /// Show the keys in the store and the digest of the account's key.
    Show,
    /// Show the verification phrases for the account's key.
    Phrases {
        /// Instead of the phrases, show a challenge: the phrases hidden
        /// among this many decoys.
        #[structopt(long)]
        challenge: Option<usize>,
    },
    /// Write the account's key to a file.
    Export {
        /// Only export the public key, in PEM format. Without this, the
        /// whole key is exported as PKCS#12 protected by the key password.
        #[structopt(long)]
        public: bool,
        #[structopt(parse(from_os_str))]
        output: PathBuf,
    },
}

#[derive(StructOpt)]
pub(super) enum SmimeSubcommand {
    Encrypt(MessageFiles),
    Decrypt(MessageFiles),
}

#[derive(StructOpt)]
pub(super) struct MessageFiles {
    /// The message to read. "-" reads from standard input.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) input: PathBuf,
    /// Where to write the result [default: standard output]
    #[structopt(long, short, parse(from_os_str))]
    pub(super) output: Option<PathBuf>,
}

#[derive(StructOpt)]
pub(super) enum PendingSubcommand {
    /// List the queued operations in the order they will be replayed.
    List,
}

/// Check phrases read out by another device against the account's key.
///
/// Exits with status 0 if every phrase matches, in order. Case and spacing
/// do not matter.
#[derive(StructOpt)]
pub(super) struct VerifySubcommand {
    /// The words read out by the other device.
    #[structopt(required = true)]
    pub(super) words: Vec<String>,
}

/// Everything a subcommand needs about its environment.
pub(super) struct Context {
    pub(super) config: SystemConfig,
    pub(super) account: AccountConfig,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
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
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let root = options.root.unwrap_or_else(|| {
        if Path::new("/etc/e3mail/e3mail.toml").is_file() {
            "/etc/e3mail".to_owned().into()
        } else if Path::new("/usr/local/etc/e3mail/e3mail.toml").is_file() {
            "/usr/local/etc/e3mail".to_owned().into()
        } else {
            die!(
                EX_CONFIG,
                "Neither /etc/e3mail nor /usr/local/etc/e3mail looks like\n\
                 the E3Mail root; use --root=/path/to/e3mail if your\n\
                 configuration is elsewhere."
            )
        }
    });

    let config = load_config(&root);
    init_logging(&root);

    let account = match options.account {
        Some(ref name) => match config.account(name) {
            Some(account) => account.clone(),
            None => die!(EX_NOUSER, "No account '{}' is configured", name),
        },
        None if 1 == config.accounts.len() => config.accounts[0].clone(),
        None if config.accounts.is_empty() => {
            die!(EX_CONFIG, "No accounts are configured")
        }
        None => die!(
            EX_USAGE,
            "Several accounts are configured; pick one with --account"
        ),
    };

    let cx = Context { config, account };

    match options.command {
        Command::Key(cmd) => super::commands::key(cx, cmd),
        Command::Smime(cmd) => super::commands::smime(cx, cmd),
        Command::Pending(PendingSubcommand::List) => {
            super::commands::pending_list(cx)
        }
        Command::Verify(cmd) => super::commands::verify(cx, cmd),
    }
}

fn load_config(root: &Path) -> SystemConfig {
    let system_config_path = root.join("e3mail.toml");
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&system_config_path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        die!(
            EX_CONFIG,
            "Error reading '{}': {}",
            system_config_path.display(),
            e
        );
    }

    match toml::from_slice(&system_config_toml) {
        Ok(config) => config,
        Err(e) => die!(
            EX_CONFIG,
            "Error in config file at '{}': {}",
            system_config_path.display(),
            e
        ),
    }
}

fn init_logging(root: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_console_log(log::LevelFilter::Info);
        return;
    }

    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
        return;
    }

    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_MAIL,
        hostname: None,
        process: env!("CARGO_PKG_NAME").to_owned(),
        pid: nix::unistd::getpid().as_raw(),
    };

    match syslog::unix(formatter) {
        Ok(logger) => {
            if log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .is_ok()
            {
                log::set_max_level(log::LevelFilter::Info);
            }
        }
        Err(e) => die!(EX_OSERR, "Failed to connect to syslog: {}", e),
    }
}
