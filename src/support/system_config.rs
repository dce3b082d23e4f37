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

use std::path::PathBuf;
use std::time::Duration;

use secstr::SecStr;
use serde::{Deserialize, Serialize};

use crate::account::model::{Account, E3Config, E3Mode, ExpungePolicy};

/// The system-wide configuration for E3Mail.
///
/// This is stored in a file named `e3mail.toml` under the configuration root,
/// which is typically `/etc/e3mail` or `/usr/local/etc/e3mail`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Where key stores and pending command logs live.
    pub storage: StorageConfig,

    /// Tuning for device verification.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Tuning for the background action scheduler.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// The accounts E3 is enabled for.
    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    /// The directory holding per-account state.
    ///
    /// Each account gets a PKCS#12 key store file named after its UUID and a
    /// pending command log. A `tmp` subdirectory is used to stage atomic
    /// writes, so this must be on a file system that supports rename.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// How old, in seconds, a key announcement from another device may be
    /// before it is considered stale and ignored.
    pub freshness_secs: u64,

    /// How far in the future, in seconds, an announcement timestamp may lie
    /// before it is rejected. Covers clock differences between devices.
    pub clock_skew_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        VerificationConfig {
            freshness_secs: 120,
            clock_skew_secs: 60,
        }
    }
}

impl VerificationConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay, in seconds, before an action that failed because its account
    /// was unavailable is put back on the queue.
    pub retry_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            retry_delay_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// One `[[account]]` table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Stable identifier of the account. Names the key store file, so it
    /// must be a "safe name".
    pub uuid: String,
    /// The account's own address. Used as the certificate subject and for
    /// messages to self.
    pub email: String,
    /// Name of the trash folder on the remote store.
    #[serde(default = "default_trash_folder")]
    pub trash_folder: String,
    /// Whether deletions are expunged as soon as they are replayed.
    #[serde(default)]
    pub expunge_policy: ExpungePolicy,
    pub e3: E3AccountConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct E3AccountConfig {
    /// Alias of the key inside the key store. Defaults to one derived from
    /// the email address.
    #[serde(default)]
    pub key_name: Option<String>,
    /// Folder holding the key backup message.
    #[serde(default = "default_backup_folder")]
    pub backup_folder: String,
    pub mode: E3Mode,
    /// Whether messages are encrypted as they are downloaded. Always off in
    /// passive mode.
    #[serde(default = "default_true")]
    pub encryption_enabled: bool,
    /// Whether to empty the trash after replacing a message with its
    /// encrypted form.
    #[serde(default = "default_true")]
    pub empty_trash_on_encrypt: bool,
    /// Whether to empty the trash after replacing a message with its
    /// decrypted form.
    #[serde(default)]
    pub empty_trash_on_decrypt: bool,
}

fn default_trash_folder() -> String {
    "Trash".to_owned()
}

fn default_backup_folder() -> String {
    "E3 Key Backup".to_owned()
}

fn default_true() -> bool {
    true
}

impl AccountConfig {
    /// Build the runtime account, supplying the key password which is never
    /// kept in the configuration file.
    pub fn to_account(&self, key_password: SecStr) -> Account {
        let mut e3 = E3Config::new(
            self.e3.key_name.clone(),
            &self.email,
            key_password,
            self.e3.backup_folder.clone(),
            self.e3.mode,
            self.e3.encryption_enabled,
        );
        e3.empty_trash_on_encrypt = self.e3.empty_trash_on_encrypt;
        e3.empty_trash_on_decrypt = self.e3.empty_trash_on_decrypt;

        Account {
            uuid: self.uuid.clone(),
            email: self.email.clone(),
            trash_folder: self.trash_folder.clone(),
            expunge_policy: self.expunge_policy,
            e3,
        }
    }
}

impl SystemConfig {
    pub fn account(&self, uuid_or_email: &str) -> Option<&AccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.uuid == uuid_or_email || a.email == uuid_or_email)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_config() {
        let config: SystemConfig = toml::from_str(
            r#"
[storage]
data_dir = "/var/lib/e3mail"

[verification]
freshness_secs = 300

[[account]]
uuid = "acct-1"
email = "alice@example.com"
expunge_policy = "immediately"

[account.e3]
mode = "standalone"

[[account]]
uuid = "acct-2"
email = "bob@example.com"
trash_folder = "Deleted Items"

[account.e3]
mode = "passive"
key_name = "bobs-key"
empty_trash_on_decrypt = true
"#,
        )
        .unwrap();

        assert_eq!(PathBuf::from("/var/lib/e3mail/tmp"), config.storage.tmp_dir());
        assert_eq!(Duration::from_secs(300), config.verification.freshness());
        assert_eq!(Duration::from_secs(60), config.verification.clock_skew());
        assert_eq!(Duration::from_secs(30), config.scheduler.retry_delay());
        assert_eq!(2, config.accounts.len());

        let alice = config
            .account("alice@example.com")
            .unwrap()
            .to_account(SecStr::from("hunter2"));
        assert_eq!("acct-1", alice.uuid);
        assert_eq!("Trash", alice.trash_folder);
        assert_eq!(ExpungePolicy::Immediately, alice.expunge_policy);
        assert_eq!("e3-alice@example.com", alice.e3.key_name);
        assert_eq!("E3 Key Backup", alice.e3.backup_folder);
        assert!(alice.e3.encryption_enabled);
        assert!(alice.e3.empty_trash_on_encrypt);
        assert!(!alice.e3.empty_trash_on_decrypt);

        let bob = config.account("acct-2").unwrap().to_account(SecStr::from("x"));
        assert_eq!("Deleted Items", bob.trash_folder);
        assert_eq!(ExpungePolicy::Manually, bob.expunge_policy);
        assert_eq!("bobs-key", bob.e3.key_name);
        assert_eq!(E3Mode::Passive, bob.e3.mode);
        // Passive mode never encrypts, whatever the file says
        assert!(!bob.e3.encryption_enabled);
        assert!(bob.e3.empty_trash_on_decrypt);

        assert!(config.account("carol@example.com").is_none());
    }
}
