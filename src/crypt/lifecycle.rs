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

//! Establishing the account's E3 key.
//!
//! An account goes from having no local key to having one exactly once, by
//! one of two routes. A key that some other device already published to the
//! backup folder is always preferred; only if none can be recovered is a new
//! one generated and published.

use std::sync::Arc;

use chrono::prelude::*;
use log::{info, warn};
use rand::{rngs::OsRng, Rng};

use super::key_material::KeyMaterial;
use super::keygen;
use crate::account::key_store::KeyStore;
use crate::account::model::{E3Mode, Flag};
use crate::account::session::AccountSession;
use crate::mime::header::{self, E3_DIGEST, E3_NAME};
use crate::mime::message::{encode_base64_wrapped, Body, Headers, Message, Part};
use crate::pending::command::PendingCommand;
use crate::support::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The key store already held the account's key.
    Existing,
    /// The key was recovered from the remote backup folder.
    Recovered,
    /// A new key was generated and published to the backup folder.
    Generated,
}

/// Make sure the account has a key, returning it and how it was obtained.
///
/// `bits` is the RSA size used if a key must be generated.
pub fn setup(
    session: &mut AccountSession,
    key_store: &mut KeyStore,
    bits: u32,
) -> Result<(SetupOutcome, Arc<KeyMaterial>), Error> {
    let key_name = session.account.e3.key_name.clone();
    let password = session.account.e3.key_password.clone();

    key_store.load(&password)?;
    if key_store.contains(&key_name) {
        let key = key_store.get_entry(&key_name, &password)?;
        return Ok((SetupOutcome::Existing, key));
    }

    let recovered = match recover(session) {
        Ok(recovered) => recovered,
        Err(e) => {
            warn!("{} Key recovery failed: {}", session.log_prefix, e);
            None
        }
    };

    let (outcome, key) = match recovered {
        Some(key) => {
            info!(
                "{} Recovered key '{}' from {}",
                session.log_prefix, key_name, session.account.e3.backup_folder
            );
            (SetupOutcome::Recovered, key)
        }
        None => {
            info!(
                "{} Generating new {}-bit key '{}'",
                session.log_prefix, bits, key_name
            );
            let key = keygen::generate(
                key_name,
                &session.account.email,
                password.clone(),
                bits,
            )?;
            publish(session, &key)?;
            (SetupOutcome::Generated, key)
        }
    };

    let key = Arc::new(key);
    key_store.set_key_entry(Arc::clone(&key))?;
    key_store.store(&password)?;
    Ok((outcome, key))
}

/// Create the backup folder on both sides if neither has it yet.
///
/// Returns whether the folder exists remotely.
fn ensure_backup_folder(session: &mut AccountSession) -> Result<bool, Error> {
    let folder = session.account.e3.backup_folder.clone();
    let remote_exists = session.remote.folder_exists(&folder)?;

    if !session.local.folder_exists(&folder) {
        session.local.create_folder(&folder)?;
        if !remote_exists {
            session.remote.create_folder(&folder)?;
        }
    }

    Ok(remote_exists)
}

fn recover(
    session: &mut AccountSession,
) -> Result<Option<KeyMaterial>, Error> {
    if !ensure_backup_folder(session)? {
        return Ok(None);
    }

    let folder = session.account.e3.backup_folder.clone();
    let key_name = session.account.e3.key_name.clone();
    let password = session.account.e3.key_password.clone();

    for uid in session.remote.search_flagged(&folder, &Flag::E3Key)? {
        let message = match session.remote.fetch(&folder, &uid)? {
            Some(m) => m,
            None => continue,
        };

        if !message.body.is_multipart() {
            continue;
        }

        for part in message.body.parts() {
            let mime_type = part.headers.mime_type();
            if !header::is_key_attachment_type(&mime_type)
                || !mime_type.contains("pkcs12")
            {
                continue;
            }

            let der = match part.decoded_body() {
                Ok(der) => der,
                Err(e) => {
                    warn!(
                        "{} Bad key attachment in {}/{}: {}",
                        session.log_prefix, folder, uid, e
                    );
                    continue;
                }
            };

            match KeyMaterial::from_pkcs12(
                key_name.clone(),
                &der,
                password.clone(),
            ) {
                Ok(key) => return Ok(Some(key)),
                Err(e) => warn!(
                    "{} Cannot open key backup {}/{}: {}",
                    session.log_prefix, folder, uid, e
                ),
            }
        }
    }

    Ok(None)
}

/// Publish `key` to the backup folder through the pending log.
fn publish(
    session: &mut AccountSession,
    key: &KeyMaterial,
) -> Result<(), Error> {
    let folder = session.account.e3.backup_folder.clone();
    let message = backup_message(
        &session.account.email,
        key,
        session.account.e3.mode,
    )?;

    if !session.local.folder_exists(&folder) {
        session.local.create_folder(&folder)?;
    }
    let uid = session.local.store_message(&folder, message)?;
    session.enqueue(PendingCommand::append(&folder, &uid))?;

    if let Err(e) = session.flush() {
        warn!(
            "{} Key backup not uploaded yet, will retry: {}",
            session.log_prefix, e
        );
    }

    Ok(())
}

/// Build the message carrying the key backup.
///
/// Standalone devices publish the whole key, protected by the key password.
/// Passive devices only publish the public key.
pub fn backup_message(
    email: &str,
    key: &KeyMaterial,
    mode: E3Mode,
) -> Result<Message, Error> {
    let now = Utc::now();
    let domain = email.rsplit('@').next().unwrap_or("localhost");

    let mut headers = Headers::new();
    headers.set("From", email);
    headers.set("To", email);
    headers.set("Subject", format!("E3 key backup: {}", key.alias()));
    headers.set("Date", now.to_rfc2822());
    headers.set(
        "Message-ID",
        format!("<e3key.{:016x}@{}>", OsRng.gen::<u64>(), domain),
    );
    headers.set("MIME-Version", "1.0");
    headers.set(E3_NAME, key.alias());
    headers.set(E3_DIGEST, key.digest());

    let text = format!(
        "This message holds a backup of the E3 key \"{}\".\r\n\
         Key digest: {}\r\n",
        key.alias(),
        key.digest()
    );

    let (content_type, file_name, data) = match mode {
        E3Mode::Standalone => {
            (header::CT_PKCS12, format!("{}.p12", key.alias()), key.to_pkcs12()?)
        }
        E3Mode::Passive => {
            (header::CT_PEM, format!("{}.pem", key.alias()), key.public_key_pem()?)
        }
    };

    let mut attachment_headers = Headers::new();
    attachment_headers.set(
        "Content-Type",
        format!("{}; name=\"{}\"", content_type, file_name),
    );
    attachment_headers.set(
        "Content-Disposition",
        format!("attachment; filename=\"{}\"", file_name),
    );
    attachment_headers.set("Content-Transfer-Encoding", "base64");

    let mut message = Message::new(headers, Body::Single(Vec::new()));
    message.set_multipart(
        "mixed",
        vec![
            Part::leaf("text/plain; charset=utf-8", text),
            Part::new(
                attachment_headers,
                Body::Single(encode_base64_wrapped(&data)),
            ),
        ],
    );
    message.internal_date = now;
    message.set_flag(Flag::E3Key, true);
    message.set_flag(Flag::Seen, true);
    Ok(message)
}
