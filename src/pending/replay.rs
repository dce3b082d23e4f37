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

//! Replay of the pending command log against the remote store.
//!
//! Commands run strictly in the order they were queued. A command is only
//! removed once it has either succeeded or failed in a way which can never
//! succeed; a transient failure stops the flush with that command still at
//! the front of the log.
//!
//! Every command tolerates being run again after a crash between execution
//! and removal. Conditions which make a command pointless (a folder that
//! went away, a flag the server does not support, a message that is only
//! known locally) count as success.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};

use super::command::PendingCommand;
use crate::account::model::{is_local_uid, ExpungePolicy, Flag};
use crate::account::session::AccountSession;
use crate::store::OpenMode;
use crate::support::error::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Commands which ran to completion, including vacuous successes.
    pub executed: usize,
    /// Commands dropped after a permanent failure.
    pub dropped: usize,
}

/// Replay every queued command in order.
///
/// On a transient failure, returns that error with the failing command and
/// everything after it left in the log.
pub fn flush(session: &mut AccountSession) -> Result<FlushReport, Error> {
    let mut report = FlushReport::default();

    while let Some(entry) = session.pending.front().cloned() {
        match execute(session, &entry.command) {
            Ok(()) => {
                info!("{} Replayed {}", session.log_prefix, entry.command);
                report.executed += 1;
            }
            Err(e) if e.is_permanent_failure() => {
                warn!(
                    "{} Dropping {} after permanent failure: {}",
                    session.log_prefix, entry.command, e
                );
                report.dropped += 1;
            }
            Err(e) => {
                info!(
                    "{} Replay of {} stopped, will retry: {}",
                    session.log_prefix, entry.command, e
                );
                return Err(e);
            }
        }

        session.pending.remove(entry.id)?;
    }

    Ok(report)
}

fn execute(
    session: &mut AccountSession,
    command: &PendingCommand,
) -> Result<(), Error> {
    match *command {
        PendingCommand::Append { ref folder, ref uid } => {
            append(session, folder, uid)
        }
        PendingCommand::MoveOrCopy {
            ref src_folder,
            ref dst_folder,
            is_copy,
            ref uids,
            ref uid_remap,
        } => move_or_copy(
            session,
            src_folder,
            dst_folder,
            is_copy,
            uids,
            uid_remap.as_ref(),
        ),
        PendingCommand::SetFlag {
            ref folder,
            ref flag,
            state,
            ref uids,
        } => set_flag(session, folder, flag, state, uids),
        PendingCommand::EmptyTrash => empty_trash(session),
        PendingCommand::Expunge { ref folder } => expunge(session, folder),
        PendingCommand::MarkAllRead { ref folder } => {
            mark_all_read(session, folder)
        }
    }
}

fn expunge_immediately(session: &AccountSession) -> bool {
    ExpungePolicy::Immediately == session.account.expunge_policy
}

/// Whether `folder` exists remotely and can be opened read-write.
fn writable(session: &mut AccountSession, folder: &str) -> Result<bool, Error> {
    Ok(session.remote.folder_exists(folder)?
        && OpenMode::ReadWrite == session.remote.open(folder)?)
}

fn remote_uids(uids: &[String]) -> Vec<String> {
    uids.iter().filter(|u| !is_local_uid(u)).cloned().collect()
}

fn move_or_copy(
    session: &mut AccountSession,
    src_folder: &str,
    dst_folder: &str,
    is_copy: bool,
    uids: &[String],
    uid_remap: Option<&BTreeMap<String, String>>,
) -> Result<(), Error> {
    let uids = match uid_remap {
        Some(remap) => remote_uids(&remap.keys().cloned().collect::<Vec<_>>()),
        None => remote_uids(uids),
    };
    if uids.is_empty() {
        return Ok(());
    }

    if !session.remote.folder_exists(src_folder)? {
        return Err(Error::RemotePermanent(format!(
            "Source folder {} does not exist",
            src_folder
        )));
    }
    if OpenMode::ReadWrite != session.remote.open(src_folder)? {
        return Err(Error::RemotePermanent(format!(
            "Source folder {} is read-only",
            src_folder
        )));
    }

    let trash = session.account.trash_folder.clone();
    let new_uids = if !is_copy && trash == dst_folder {
        session.remote.delete_messages(src_folder, &uids, &trash)?;
        HashMap::new()
    } else if is_copy {
        session.remote.copy_messages(src_folder, dst_folder, &uids)?
    } else {
        session.remote.move_messages(src_folder, dst_folder, &uids)?
    };

    if !is_copy && expunge_immediately(session) {
        session.remote.expunge(src_folder)?;
    }

    if let Some(remap) = uid_remap {
        for (src_uid, local_uid) in remap {
            if let Some(new_uid) = new_uids.get(src_uid) {
                adopt_uid(session, dst_folder, local_uid, new_uid)?;
            }
        }
    }

    Ok(())
}

fn set_flag(
    session: &mut AccountSession,
    folder: &str,
    flag: &Flag,
    state: bool,
    uids: &[String],
) -> Result<(), Error> {
    let uids = remote_uids(uids);
    if uids.is_empty()
        || !session.remote.folder_exists(folder)?
        || !session.remote.supports_flag(folder, flag)?
        || OpenMode::ReadWrite != session.remote.open(folder)?
    {
        return Ok(());
    }

    session.remote.set_flags(folder, &uids, flag, state)?;

    if Flag::Deleted == *flag && state && expunge_immediately(session) {
        session.remote.expunge(folder)?;
    }

    Ok(())
}

fn empty_trash(session: &mut AccountSession) -> Result<(), Error> {
    let trash = session.account.trash_folder.clone();
    if !writable(session, &trash)? {
        return Ok(());
    }

    session.remote.set_flag_on_all(&trash, &Flag::Deleted, true)?;
    if expunge_immediately(session) {
        session.remote.expunge(&trash)?;
    }

    Ok(())
}

fn expunge(session: &mut AccountSession, folder: &str) -> Result<(), Error> {
    if writable(session, folder)? {
        session.remote.expunge(folder)?;
    }

    Ok(())
}

fn mark_all_read(
    session: &mut AccountSession,
    folder: &str,
) -> Result<(), Error> {
    session.local.set_flag_on_all(folder, &Flag::Seen, true)?;

    if !session.remote.folder_exists(folder)?
        || !session.remote.supports_flag(folder, &Flag::Seen)?
        || OpenMode::ReadWrite != session.remote.open(folder)?
    {
        return Ok(());
    }

    session.remote.set_flag_on_all(folder, &Flag::Seen, true)
}

fn append(
    session: &mut AccountSession,
    folder: &str,
    uid: &str,
) -> Result<(), Error> {
    let mut message = match session.local.get_message(folder, uid)? {
        Some(m) => m,
        None => return Ok(()),
    };

    if !session.remote.folder_exists(folder)?
        && !session.remote.create_folder(folder)?
    {
        warn!(
            "{} Could not create remote folder {}, dropping append",
            session.log_prefix, folder
        );
        return Ok(());
    }
    if OpenMode::ReadWrite != session.remote.open(folder)? {
        return Ok(());
    }

    let remote_info = if is_local_uid(uid) {
        None
    } else {
        session.remote.message_info(folder, uid)?
    };

    let copy_started = message.has_flag(&Flag::RemoteCopyStarted);
    message.set_flag(Flag::RemoteCopyStarted, false);

    // A remote copy under the same UID is an older version of the message,
    // to be deleted once the new one is on the server.
    let outdated_uid = match remote_info {
        None => None,
        Some(info) => {
            if info.internal_date > message.internal_date {
                info!(
                    "{} Remote copy of {}/{} is newer, discarding local copy",
                    session.log_prefix, folder, uid
                );
                session.local.destroy_message(folder, uid)?;
                return Ok(());
            }
            Some(info.uid)
        }
    };

    // A previous attempt may have reached the server before we lost track of
    // it.
    let existing = if copy_started {
        find_by_message_id(session, folder, &message, outdated_uid.as_deref())?
    } else {
        None
    };

    match existing {
        Some(remote_uid) => {
            info!(
                "{} Adopting existing remote copy {}/{}",
                session.log_prefix, folder, remote_uid
            );
            adopt_uid(session, folder, uid, &remote_uid)?;
        }
        None => {
            session.local.set_flag(
                folder,
                uid,
                &Flag::RemoteCopyStarted,
                true,
            )?;
            upload(session, folder, uid, &message, outdated_uid.as_deref())?;
        }
    }

    if let Some(outdated_uid) = outdated_uid {
        session.remote.set_flags(
            folder,
            &[outdated_uid],
            &Flag::Deleted,
            true,
        )?;
        if expunge_immediately(session) {
            session.remote.expunge(folder)?;
        }
    }

    Ok(())
}

/// Append `message` and move the local copy at `local_uid` to whatever UID
/// the server gave it.
fn upload(
    session: &mut AccountSession,
    folder: &str,
    local_uid: &str,
    message: &crate::mime::message::Message,
    outdated_uid: Option<&str>,
) -> Result<(), Error> {
    let new_uid = match session.remote.append(folder, message)? {
        Some(uid) => Some(uid),
        None => find_by_message_id(session, folder, message, outdated_uid)?,
    };

    match new_uid {
        Some(new_uid) => adopt_uid(session, folder, local_uid, &new_uid),
        None => {
            warn!(
                "{} Server did not report UID of appended {}/{}",
                session.log_prefix, folder, local_uid
            );
            Ok(())
        }
    }
}

/// The newest remote copy of `message` in `folder`, other than `except`.
fn find_by_message_id(
    session: &mut AccountSession,
    folder: &str,
    message: &crate::mime::message::Message,
    except: Option<&str>,
) -> Result<Option<String>, Error> {
    let message_id = match message.message_id() {
        Some(message_id) => message_id,
        None => return Ok(None),
    };

    Ok(session
        .remote
        .find_uids_by_message_id(folder, message_id)?
        .into_iter()
        .filter(|u| Some(u.as_str()) != except)
        .last())
}

fn adopt_uid(
    session: &mut AccountSession,
    folder: &str,
    old_uid: &str,
    new_uid: &str,
) -> Result<(), Error> {
    if old_uid != new_uid {
        session.local.change_uid(folder, old_uid, new_uid)?;
        session.notify_uid_changed(folder, old_uid, new_uid);
    }
    session
        .local
        .set_flag(folder, new_uid, &Flag::RemoteCopyStarted, false)
}
