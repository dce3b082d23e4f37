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

use std::fmt;
use std::str::FromStr;

use secstr::SecStr;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Prefix of UIDs the local cache assigns to messages which have not yet been
/// appended to the remote store.
pub const LOCAL_UID_PREFIX: &str = "local-";

pub fn is_local_uid(uid: &str) -> bool {
    uid.is_empty() || uid.starts_with(LOCAL_UID_PREFIX)
}

/// A mail account E3 operates on.
#[derive(Clone, Debug)]
pub struct Account {
    /// Stable identifier; names per-account files.
    pub uuid: String,
    pub email: String,
    pub trash_folder: String,
    pub expunge_policy: ExpungePolicy,
    pub e3: E3Config,
}

/// Controls whether the remote store is expunged as part of replaying
/// commands which set `\Deleted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpungePolicy {
    Immediately,
    Manually,
}

impl Default for ExpungePolicy {
    fn default() -> Self {
        ExpungePolicy::Manually
    }
}

/// How the account obtains its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum E3Mode {
    /// This device generates and owns the key, and publishes the full key
    /// (protected by the key password) to the backup folder.
    Standalone,
    /// This device expects to recover an existing key, and only ever
    /// publishes the public half of a key it generates.
    Passive,
}

/// The per-account E3 configuration, set once during setup.
#[derive(Clone, Debug)]
pub struct E3Config {
    pub key_name: String,
    pub key_password: SecStr,
    pub backup_folder: String,
    pub mode: E3Mode,
    pub encryption_enabled: bool,
    pub empty_trash_on_encrypt: bool,
    pub empty_trash_on_decrypt: bool,
}

impl E3Config {
    /// Build the configuration.
    ///
    /// If `key_name` is `None`, a name is derived from `email`. Passive mode
    /// never encrypts, regardless of `encryption_enabled`.
    pub fn new(
        key_name: Option<String>,
        email: &str,
        key_password: SecStr,
        backup_folder: String,
        mode: E3Mode,
        encryption_enabled: bool,
    ) -> Self {
        E3Config {
            key_name: key_name.unwrap_or_else(|| default_key_name(email)),
            key_password,
            backup_folder,
            mode,
            encryption_enabled: encryption_enabled
                && E3Mode::Passive != mode,
            empty_trash_on_encrypt: true,
            empty_trash_on_decrypt: false,
        }
    }

    /// Whether `empty_trash` should follow a replacement in the given
    /// direction.
    pub fn empty_trash_after(&self, encrypting: bool) -> bool {
        if encrypting {
            self.empty_trash_on_encrypt
        } else {
            self.empty_trash_on_decrypt
        }
    }
}

pub fn default_key_name(email: &str) -> String {
    let mut name = format!("e3-{}", email.trim());
    name.retain(|c| !c.is_control() && c != '/' && c != '\\');
    name
}

/// Message flags.
///
/// Besides the standard IMAP system flags, E3 tracks its own state with a
/// handful of keywords.
#[derive(
    Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize,
)]
pub enum Flag {
    Answered,
    Deleted,
    Flagged,
    Seen,
    /// The message is E3-encrypted.
    E3,
    /// The message has already been processed by E3 and is due for removal.
    E3Done,
    /// The message carries a key backup.
    E3Key,
    /// An append of this message has been started but not confirmed. Never
    /// leaves the local cache.
    RemoteCopyStarted,
    Keyword(String),
}

impl Flag {
    /// Whether the flag only has meaning in the local cache.
    pub fn is_local_only(&self) -> bool {
        matches!(*self, Flag::RemoteCopyStarted)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
            Flag::E3 => write!(f, "$E3"),
            Flag::E3Done => write!(f, "$E3Done"),
            Flag::E3Key => write!(f, "$E3Key"),
            Flag::RemoteCopyStarted => write!(f, "$E3RemoteCopyStarted"),
            Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "\\answered" => Ok(Flag::Answered),
            "\\deleted" => Ok(Flag::Deleted),
            "\\flagged" => Ok(Flag::Flagged),
            "\\seen" => Ok(Flag::Seen),
            "$e3" => Ok(Flag::E3),
            "$e3done" => Ok(Flag::E3Done),
            "$e3key" => Ok(Flag::E3Key),
            "$e3remotecopystarted" => Ok(Flag::RemoteCopyStarted),
            _ if s.starts_with('\\')
                || s.is_empty()
                || !s.as_bytes().iter().copied().all(is_atom_char) =>
            {
                Err(Error::UnsafeName)
            }
            _ => Ok(Flag::Keyword(s.to_owned())),
        }
    }
}

fn is_atom_char(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}
