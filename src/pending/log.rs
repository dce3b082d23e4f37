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

//! The durable per-account pending command log.
//!
//! The log is a single CBOR file, `<account>.pending`, rewritten atomically
//! after every change. It is small (commands, not message content), so
//! rewriting the whole thing is cheap, and it means a crash leaves either the
//! old or the new log, never a mix.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::command::PendingCommand;
use crate::support::{
    error::Error,
    file_ops::{self, IgnoreKinds},
    log_prefix::LogPrefix,
    safe_name::is_safe_name,
};

const MAX_LOG_FILE_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogEntry {
    /// Monotonic identifier, unique within one account's log.
    pub id: u64,
    pub command: PendingCommand,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct LogFile {
    next_id: u64,
    entries: Vec<LogEntry>,
}

pub struct CommandLog {
    log_prefix: LogPrefix,
    path: PathBuf,
    tmp: PathBuf,
    file: LogFile,
}

impl CommandLog {
    /// Open the log for `account_uuid`, loading whatever was left over from
    /// a previous run.
    pub fn open(
        log_prefix: LogPrefix,
        data_dir: &Path,
        tmp: &Path,
        account_uuid: &str,
    ) -> Result<Self, Error> {
        if !is_safe_name(account_uuid) {
            return Err(Error::UnsafeName);
        }

        for dir in &[data_dir, tmp] {
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(dir)
                .ignore_already_exists()?;
        }

        let path = data_dir.join(format!("{}.pending", account_uuid));
        let data =
            file_ops::slurp(&path, MAX_LOG_FILE_SIZE).ignore_not_found()?;
        let file = if data.is_empty() {
            LogFile::default()
        } else {
            serde_cbor::from_slice(&data)?
        };

        if !file.entries.is_empty() {
            info!(
                "{} Resuming with {} pending command(s)",
                log_prefix,
                file.entries.len()
            );
        }

        Ok(CommandLog {
            log_prefix,
            path,
            tmp: tmp.to_owned(),
            file,
        })
    }

    /// Durably append `command`, returning its id.
    ///
    /// If the log cannot be written, the command is not queued.
    pub fn enqueue(&mut self, command: PendingCommand) -> Result<u64, Error> {
        let id = self.file.next_id;
        self.enqueue_all(vec![command])?;
        Ok(id)
    }

    /// Durably append all of `commands`, in order, with a single write.
    ///
    /// Either every command is queued or, if the log cannot be written, none
    /// of them are.
    pub fn enqueue_all(
        &mut self,
        commands: Vec<PendingCommand>,
    ) -> Result<(), Error> {
        let old_len = self.file.entries.len();
        let old_next_id = self.file.next_id;

        for command in commands {
            let id = self.file.next_id;
            self.file.next_id += 1;
            self.file.entries.push(LogEntry { id, command });
        }

        if let Err(e) = self.persist() {
            self.file.entries.truncate(old_len);
            self.file.next_id = old_next_id;
            warn!("{} Failed to queue commands: {}", self.log_prefix, e);
            return Err(e);
        }

        Ok(())
    }

    /// The oldest command in the log.
    pub fn front(&self) -> Option<&LogEntry> {
        self.file.entries.first()
    }

    /// Durably remove the command with the given id.
    ///
    /// Removing an id that is not present is a no-op.
    pub fn remove(&mut self, id: u64) -> Result<(), Error> {
        let ix = match self.file.entries.iter().position(|e| e.id == id) {
            Some(ix) => ix,
            None => return Ok(()),
        };

        let removed = self.file.entries.remove(ix);
        if let Err(e) = self.persist() {
            self.file.entries.insert(ix, removed);
            return Err(e);
        }

        Ok(())
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.file.entries
    }

    pub fn len(&self) -> usize {
        self.file.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.entries.is_empty()
    }

    fn persist(&self) -> Result<(), Error> {
        let data = serde_cbor::to_vec(&self.file)?;
        file_ops::spit(&self.tmp, &self.path, true, 0o600, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::model::Flag;

    fn open(root: &Path) -> CommandLog {
        CommandLog::open(
            LogPrefix::new("test".to_owned()),
            root,
            &root.join("tmp"),
            "acct",
        )
        .unwrap()
    }

    #[test]
    fn survives_reopen() {
        let root = tempfile::tempdir().unwrap();

        {
            let mut log = open(root.path());
            assert!(log.is_empty());
            log.enqueue(PendingCommand::append("INBOX", "local-1")).unwrap();
            let id = log
                .enqueue(PendingCommand::set_flag(
                    "INBOX",
                    Flag::Seen,
                    true,
                    vec!["1".to_owned()],
                ))
                .unwrap();
            log.enqueue(PendingCommand::EmptyTrash).unwrap();
            log.remove(id).unwrap();
        }

        let mut log = open(root.path());
        assert_eq!(2, log.len());
        assert_eq!(
            PendingCommand::append("INBOX", "local-1"),
            log.front().unwrap().command
        );
        assert_eq!(PendingCommand::EmptyTrash, log.entries()[1].command);

        // Ids keep increasing across reopen
        let id = log.enqueue(PendingCommand::EmptyTrash).unwrap();
        assert_eq!(3, id);

        let front = log.front().unwrap().id;
        log.remove(front).unwrap();
        log.remove(front).unwrap();
        assert_eq!(2, log.len());
    }

    #[test]
    fn rejects_unsafe_account() {
        let root = tempfile::tempdir().unwrap();
        assert_matches!(
            Err(Error::UnsafeName),
            CommandLog::open(
                LogPrefix::new("test".to_owned()),
                root.path(),
                &root.path().join("tmp"),
                "../escape",
            )
            .map(|_| ())
        );
    }

    #[test]
    fn failed_write_leaves_log_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let mut log = open(root.path());
        log.enqueue(PendingCommand::EmptyTrash).unwrap();

        // Break the staging directory
        fs::remove_dir_all(root.path().join("tmp")).unwrap();
        assert!(log.enqueue(PendingCommand::EmptyTrash).is_err());
        assert_eq!(1, log.len());
        let front = log.front().unwrap().id;
        assert!(log.remove(front).is_err());
        assert_eq!(1, log.len());
    }

    #[test]
    fn batch_is_queued_whole_or_not_at_all() {
        let root = tempfile::tempdir().unwrap();
        let mut log = open(root.path());
        log.enqueue(PendingCommand::EmptyTrash).unwrap();

        fs::remove_dir_all(root.path().join("tmp")).unwrap();
        assert!(log
            .enqueue_all(vec![
                PendingCommand::set_flag(
                    "INBOX",
                    Flag::Deleted,
                    true,
                    vec!["1".to_owned()],
                ),
                PendingCommand::append("INBOX", "local-1"),
            ])
            .is_err());
        assert_eq!(1, log.len());

        fs::create_dir(root.path().join("tmp")).unwrap();
        log.enqueue_all(vec![
            PendingCommand::set_flag(
                "INBOX",
                Flag::Deleted,
                true,
                vec!["1".to_owned()],
            ),
            PendingCommand::append("INBOX", "local-1"),
        ])
        .unwrap();

        let log = open(root.path());
        assert_eq!(
            vec![0, 1, 2],
            log.entries().iter().map(|e| e.id).collect::<Vec<_>>()
        );
        assert_eq!(
            PendingCommand::append("INBOX", "local-1"),
            log.entries()[2].command
        );
    }
}
