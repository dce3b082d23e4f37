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
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rand::rngs::OsRng;
use secstr::SecStr;

use super::main::*;
use crate::account::key_store::KeyStore;
use crate::account::model::Account;
use crate::crypt::key_material::KeyMaterial;
use crate::crypt::smime::{OpensslCms, SmimeBackend};
use crate::crypt::transform::{CryptoTransform, IdentityContext};
use crate::crypt::{keygen, lifecycle, verification};
use crate::mime::announcement::beautify_hex;
use crate::mime::message::Message;
use crate::pending::log::CommandLog;
use crate::support::error::Error;
use crate::support::file_ops;
use crate::support::log_prefix::LogPrefix;
use crate::support::sysexits::*;

const PASSWORD_ENV: &str = "E3MAIL_KEY_PASSWORD";

fn fail(what: &str, e: Error) -> ! {
    die!(Sysexit::from(&e), "{}: {}", what, e)
}

fn key_password() -> SecStr {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return SecStr::from(password);
    }

    match rpassword::prompt_password_stderr("Key password: ") {
        Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
        Ok(p) if p.is_empty() => die!(EX_NOINPUT, "No password given"),
        Ok(p) => SecStr::from(p),
    }
}

fn log_prefix(cx: &Context) -> LogPrefix {
    let log_prefix = LogPrefix::new("cli".to_owned());
    log_prefix.set_account(cx.account.email.clone());
    log_prefix
}

/// Open and load the account's key store.
fn key_store(cx: &Context, account: &Account) -> KeyStore {
    let mut store = KeyStore::open(
        log_prefix(cx),
        &cx.config.storage.data_dir,
        cx.config.storage.tmp_dir(),
        &account.uuid,
    )
    .unwrap_or_else(|e| fail("Failed to open key store", e));
    store
        .load(&account.e3.key_password)
        .unwrap_or_else(|e| fail("Failed to load key store", e));
    store
}

fn account_key(cx: &Context) -> (Account, Arc<KeyMaterial>) {
    let account = cx.account.to_account(key_password());
    let mut store = key_store(cx, &account);
    match store.get_entry(&account.e3.key_name, &account.e3.key_password) {
        Ok(key) => (account, key),
        Err(Error::NamedKeyNotFound) => die!(
            EX_NOUSER,
            "There is no key named '{}' yet; run `e3mail key generate`",
            account.e3.key_name
        ),
        Err(e) => fail("Failed to open key", e),
    }
}

/// Write a file readable only by the owner, replacing any existing file.
fn write_private(path: &Path, data: &[u8]) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if let Err(e) = file_ops::spit(dir, path, true, 0o600, data) {
        die!(EX_CANTCREAT, "Failed to write '{}': {}", path.display(), e);
    }
}

pub(super) fn key(cx: Context, cmd: KeySubcommand) {
    match cmd {
        KeySubcommand::Generate { replace, backup } => {
            key_generate(cx, replace, backup.as_deref())
        }

        KeySubcommand::Show => {
            let account = cx.account.to_account(key_password());
            let mut store = key_store(&cx, &account);
            let aliases =
                store.aliases().map(str::to_owned).collect::<Vec<_>>();
            if aliases.is_empty() {
                println!("The key store is empty.");
                return;
            }

            for alias in &aliases {
                let marker = if *alias == account.e3.key_name {
                    " (account key)"
                } else {
                    ""
                };
                println!("{}{}", alias, marker);
            }

            if let Ok(key) =
                store.get_entry(&account.e3.key_name, &account.e3.key_password)
            {
                let fingerprint = key
                    .certificate_fingerprint()
                    .unwrap_or_else(|e| fail("Failed to hash certificate", e));
                println!("\nDigest:      {}", key.digest());
                println!("Fingerprint: {}", beautify_hex(&fingerprint));
            }
        }

        KeySubcommand::Phrases { challenge } => {
            let (_, key) = account_key(&cx);
            let phrases = verification::phrases(&key.digest_bytes());
            match challenge {
                None => {
                    for phrase in phrases {
                        println!("{}", phrase);
                    }
                }
                Some(decoys) => {
                    let choices = verification::challenge(
                        &phrases.join(" "),
                        decoys,
                        &mut OsRng,
                    );
                    for (ix, choice) in choices.iter().enumerate() {
                        println!("{:2}. {}", ix + 1, choice);
                    }
                }
            }
        }

        KeySubcommand::Export { public, output } => {
            let (_, key) = account_key(&cx);
            let data = if public {
                key.public_key_pem()
            } else {
                key.to_pkcs12()
            }
            .unwrap_or_else(|e| fail("Failed to export key", e));
            write_private(&output, &data);
        }
    }
}

fn key_generate(cx: Context, replace: bool, backup: Option<&Path>) {
    let account = cx.account.to_account(key_password());
    let mut store = key_store(&cx, &account);

    if store.contains(&account.e3.key_name) && !replace {
        die!(
            EX_CANTCREAT,
            "'{}' already has a key; pass --replace to overwrite it",
            account.e3.key_name
        );
    }

    let key = keygen::generate(
        account.e3.key_name.clone(),
        &account.email,
        account.e3.key_password.clone(),
        keygen::RSA_BITS,
    )
    .map(Arc::new)
    .unwrap_or_else(|e| fail("Failed to generate key", e));

    store
        .set_key_entry(Arc::clone(&key))
        .and_then(|_| store.store(&account.e3.key_password))
        .unwrap_or_else(|e| fail("Failed to save key store", e));

    if let Some(backup) = backup {
        let message =
            lifecycle::backup_message(&account.email, &key, account.e3.mode)
                .unwrap_or_else(|e| fail("Failed to build backup message", e));
        write_private(backup, &message.to_bytes());
    }

    println!("Generated key '{}'", account.e3.key_name);
    println!("Digest: {}", key.digest());
}

fn read_message(input: &Path) -> Message {
    let mut data = Vec::new();
    let result = if Path::new("-") == input {
        io::stdin().read_to_end(&mut data)
    } else {
        fs::File::open(input).and_then(|mut f| f.read_to_end(&mut data))
    };

    if let Err(e) = result {
        die!(EX_NOINPUT, "Failed to read '{}': {}", input.display(), e);
    }

    Message::parse(&data).unwrap_or_else(|e| fail("Failed to parse message", e))
}

fn write_message(output: Option<&Path>, message: &Message) {
    let data = message.to_bytes();
    let result = match output {
        Some(path) => fs::write(path, &data),
        None => io::stdout().write_all(&data),
    };

    if let Err(e) = result {
        die!(EX_IOERR, "Failed to write message: {}", e);
    }
}

pub(super) fn smime(cx: Context, cmd: SmimeSubcommand) {
    let (account, key) = account_key(&cx);
    let backend = SmimeBackend::new(
        key,
        Box::new(OpensslCms),
        cx.config.storage.tmp_dir(),
        account.email.clone(),
    );

    match cmd {
        SmimeSubcommand::Encrypt(files) => {
            let message = read_message(&files.input);
            let encrypted = backend
                .encrypt(&message, &[account.email.clone()])
                .unwrap_or_else(|e| fail("Failed to encrypt", e));
            write_message(files.output.as_deref(), &encrypted);
        }
        SmimeSubcommand::Decrypt(files) => {
            let message = read_message(&files.input);
            let decrypted = backend
                .decrypt(&message, &IdentityContext::for_message(&message))
                .unwrap_or_else(|e| fail("Failed to decrypt", e));
            write_message(files.output.as_deref(), &decrypted);
        }
    }
}

pub(super) fn pending_list(cx: Context) {
    let log = CommandLog::open(
        log_prefix(&cx),
        &cx.config.storage.data_dir,
        &cx.config.storage.tmp_dir(),
        &cx.account.uuid,
    )
    .unwrap_or_else(|e| fail("Failed to open pending log", e));

    if log.is_empty() {
        println!("Nothing is waiting to be sent to the server.");
        return;
    }

    for entry in log.entries() {
        println!("{:6} {}", entry.id, entry.command);
    }
}

pub(super) fn verify(cx: Context, cmd: VerifySubcommand) {
    let (_, key) = account_key(&cx);
    if verification::verify(&cmd.words.join(" "), &key.digest_bytes()) {
        println!("The phrases match. The other device has the same key.");
    } else {
        die!(
            EX_DATAERR,
            "The phrases do NOT match. Do not trust the other device's key."
        );
    }
}
