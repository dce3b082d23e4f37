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

use std::sync::Arc;

use log::info;

use super::model::Account;
use crate::pending::command::PendingCommand;
use crate::pending::log::CommandLog;
use crate::pending::replay::{self, FlushReport};
use crate::store::{LocalStore, MessageListener, RemoteStore};
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// Everything E3 needs to operate on one account.
///
/// Replay requires `&mut`, so at most one flush can run per session at a
/// time. Sessions shared between threads live behind a `Mutex`.
pub struct AccountSession {
    pub account: Account,
    pub local: Box<dyn LocalStore>,
    pub remote: Box<dyn RemoteStore>,
    pub pending: CommandLog,
    pub log_prefix: LogPrefix,
    listeners: Vec<Arc<dyn MessageListener>>,
    uid_changes: Vec<UidChange>,
}

/// A UID change observed during the most recent flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UidChange {
    pub folder: String,
    pub old_uid: String,
    pub new_uid: String,
}

impl AccountSession {
    pub fn new(
        account: Account,
        local: Box<dyn LocalStore>,
        remote: Box<dyn RemoteStore>,
        pending: CommandLog,
        log_prefix: LogPrefix,
    ) -> Self {
        log_prefix.set_account(account.email.clone());
        AccountSession {
            account,
            local,
            remote,
            pending,
            log_prefix,
            listeners: Vec::new(),
            uid_changes: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.listeners.push(listener);
    }

    /// Durably queue `command` for the next flush.
    pub fn enqueue(&mut self, command: PendingCommand) -> Result<(), Error> {
        info!("{} Queued {}", self.log_prefix, command);
        self.pending.enqueue(command).map(|_| ())
    }

    /// Durably queue `commands` as a unit: all of them or none.
    pub fn enqueue_all(
        &mut self,
        commands: Vec<PendingCommand>,
    ) -> Result<(), Error> {
        self.pending.enqueue_all(commands.clone())?;
        for command in &commands {
            info!("{} Queued {}", self.log_prefix, command);
        }
        Ok(())
    }

    /// Replay the pending command log against the remote store.
    pub fn flush(&mut self) -> Result<FlushReport, Error> {
        self.uid_changes.clear();
        replay::flush(self)
    }

    pub fn notify_uid_changed(
        &mut self,
        folder: &str,
        old_uid: &str,
        new_uid: &str,
    ) {
        for listener in &self.listeners {
            listener.message_uid_changed(
                &self.account.uuid,
                folder,
                old_uid,
                new_uid,
            );
        }

        self.uid_changes.push(UidChange {
            folder: folder.to_owned(),
            old_uid: old_uid.to_owned(),
            new_uid: new_uid.to_owned(),
        });
    }

    /// Follow `uid` in `folder` through the UID changes of the last flush.
    pub fn current_uid(&self, folder: &str, uid: &str) -> String {
        self.uid_changes
            .iter()
            .fold(uid.to_owned(), |uid, change| {
                if change.folder == folder && change.old_uid == uid {
                    change.new_uid.clone()
                } else {
                    uid
                }
            })
    }
}

#[cfg(test)]
pub mod testing {
    use std::path::Path;

    use secstr::SecStr;

    use super::*;
    use crate::account::model::{E3Config, E3Mode, ExpungePolicy};
    use crate::store::memory::{MemoryLocal, MemoryRemote};

    pub fn test_account(mode: E3Mode) -> Account {
        Account {
            uuid: "acct".to_owned(),
            email: "alice@example.com".to_owned(),
            trash_folder: "Trash".to_owned(),
            expunge_policy: ExpungePolicy::Immediately,
            e3: E3Config::new(
                None,
                "alice@example.com",
                SecStr::from("hunter2"),
                "E3 Key Backup".to_owned(),
                mode,
                true,
            ),
        }
    }

    /// A session over in-memory stores, with the pending log under `root`.
    ///
    /// The returned stores share state with the ones the session owns.
    pub fn test_session(
        root: &Path,
        account: Account,
    ) -> (AccountSession, MemoryLocal, MemoryRemote) {
        crate::init_test_log();

        let local = MemoryLocal::new();
        let remote = MemoryRemote::new();
        remote.add_folder("INBOX");
        remote.add_folder(&account.trash_folder);

        let log_prefix = LogPrefix::new("test".to_owned());
        let pending = CommandLog::open(
            log_prefix.clone(),
            root,
            &root.join("tmp"),
            &account.uuid,
        )
        .unwrap();
        let session = AccountSession::new(
            account,
            Box::new(local.clone()),
            Box::new(remote.clone()),
            pending,
            log_prefix,
        );
        (session, local, remote)
    }
}
