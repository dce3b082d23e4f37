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

//! Replacing a single message with its transformed form.

use std::collections::BTreeMap;

use log::{info, warn};

use crate::account::model::Flag;
use crate::account::session::AccountSession;
use crate::crypt::transform::{CryptoTransform, Direction};
use crate::mime::message::Message;
use crate::pending::command::PendingCommand;
use crate::support::error::Error;

/// What `replace_message` did with a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Replacement {
    /// A transformed copy now stands in for the original.
    Replaced {
        original_uid: String,
        /// The UID of the copy: the server's if the append has been
        /// replayed, otherwise a local-only UID.
        new_uid: String,
        subject: String,
        /// Whether the pending log drained before returning.
        synced: bool,
    },
    /// The message was already in the target state.
    PassedThrough(Message),
}

impl Replacement {
    pub fn is_replaced(&self) -> bool {
        matches!(*self, Replacement::Replaced { .. })
    }
}

/// Replace `original`, stored locally in `folder`, with its transformation
/// in `direction`.
///
/// The commands for the remote side are queued in one durable write. If
/// that fails, the local changes are rolled back and nothing is queued.
///
/// A flush which stops on a transient remote error leaves the rest queued
/// and is not an error here, except when the account is unavailable, which
/// is returned so the caller can retry later.
pub fn replace_message(
    session: &mut AccountSession,
    transform: &dyn CryptoTransform,
    direction: Direction,
    folder: &str,
    original: &Message,
) -> Result<Replacement, Error> {
    let mut replacement =
        match transform.apply(direction, &session.account, original) {
            Ok(m) => m,
            Err(Error::UnsupportedInput(why)) => {
                info!(
                    "{} Not going to {} {}/{}: {}",
                    session.log_prefix, direction, folder, original.uid, why
                );
                return Ok(Replacement::PassedThrough(original.clone()));
            }
            Err(e) => return Err(e),
        };

    replacement.uid.clear();
    replacement.set_flag(Flag::E3, direction.is_encrypt());
    replacement.set_flag(Flag::RemoteCopyStarted, false);
    replacement.set_flag(Flag::Deleted, false);
    replacement.set_flag(Flag::E3Done, false);

    let new_uid = session.local.store_message(folder, replacement)?;

    let trash = session.account.trash_folder.clone();
    let in_trash = trash == folder;
    let empty_trash = !in_trash
        && session.account.e3.empty_trash_after(direction.is_encrypt());

    // The original stays in place until the commands are durably queued
    let mut trash_uid = None;
    let mut commands = Vec::new();
    if !in_trash {
        let uid_remap = if empty_trash {
            None
        } else {
            match keep_in_trash(session, original) {
                Ok(uid) => {
                    let mut remap = BTreeMap::new();
                    remap.insert(original.uid.clone(), uid.clone());
                    trash_uid = Some(uid);
                    Some(remap)
                }
                Err(e) => {
                    discard(session, folder, &new_uid);
                    return Err(e);
                }
            }
        };

        let uids = vec![original.uid.clone()];
        commands.push(PendingCommand::set_flag(
            folder,
            Flag::Deleted,
            true,
            uids.clone(),
        ));
        commands.push(PendingCommand::set_flag(
            folder,
            Flag::E3Done,
            true,
            uids.clone(),
        ));
        commands.push(PendingCommand::move_to(folder, &trash, uids, uid_remap));
    }

    commands.push(PendingCommand::append(folder, &new_uid));
    if empty_trash {
        commands.push(PendingCommand::EmptyTrash);
    }

    if let Err(e) = session.enqueue_all(commands) {
        discard(session, folder, &new_uid);
        if let Some(ref uid) = trash_uid {
            discard(session, &trash, uid);
        }
        return Err(e);
    }

    if !in_trash {
        if let Err(e) = session.local.destroy_message(folder, &original.uid) {
            warn!(
                "{} Failed to remove {}/{} from the local cache: {}",
                session.log_prefix, folder, original.uid, e
            );
        }
    }

    info!(
        "{} {} {}/{} -> {}",
        session.log_prefix, direction, folder, original.uid, new_uid
    );

    let synced = match session.flush() {
        Ok(_) => true,
        Err(Error::AccountUnavailable) => return Err(Error::AccountUnavailable),
        Err(e) => {
            warn!(
                "{} Remote update for {}/{} deferred: {}",
                session.log_prefix, folder, original.uid, e
            );
            false
        }
    };

    Ok(Replacement::Replaced {
        original_uid: original.uid.clone(),
        new_uid: session.current_uid(folder, &new_uid),
        subject: original.subject().to_owned(),
        synced,
    })
}

/// Put a copy of `original` into the local trash, marked as deleted and
/// done, returning its local UID.
///
/// Once the move is replayed, the command's remap lets this copy pick up the
/// server's UID.
fn keep_in_trash(
    session: &mut AccountSession,
    original: &Message,
) -> Result<String, Error> {
    let trash = session.account.trash_folder.clone();
    if !session.local.folder_exists(&trash) {
        session.local.create_folder(&trash)?;
    }

    let mut copy = original.clone();
    copy.uid.clear();
    copy.set_flag(Flag::Deleted, true);
    copy.set_flag(Flag::E3Done, true);
    session.local.store_message(&trash, copy)
}

/// Remove a message stored by an abandoned replacement.
fn discard(session: &mut AccountSession, folder: &str, uid: &str) {
    if let Err(e) = session.local.destroy_message(folder, uid) {
        warn!(
            "{} Failed to discard {}/{}: {}",
            session.log_prefix, folder, uid, e
        );
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::super::testing::{FailingTransform, MarkerTransform};
    use super::*;
    use crate::account::model::{E3Mode, ExpungePolicy};
    use crate::account::session::testing::*;
    use crate::mime::header::{is_e3_encrypted, E3_ENCRYPTED};
    use crate::store::memory::*;
    use crate::store::LocalStore;

    fn seeded(
        root: &std::path::Path,
        policy: ExpungePolicy,
        folder: &str,
    ) -> (AccountSession, MemoryLocal, MemoryRemote, Message) {
        let mut account = test_account(E3Mode::Standalone);
        account.expunge_policy = policy;
        let (mut session, local, remote) = test_session(root, account);

        let mut message = sample_message("Test", "<test@example.com>");
        message.uid = remote.inject(folder, message.clone());
        session.local.store_message(folder, message.clone()).unwrap();
        (session, local, remote, message)
    }

    #[test]
    fn encrypt_replaces_and_syncs() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, local, remote, original) =
            seeded(root.path(), ExpungePolicy::Manually, "INBOX");
        let listener = Arc::new(RecordingListener::default());
        session.add_listener(listener.clone());

        let result = replace_message(
            &mut session,
            &MarkerTransform,
            Direction::Encrypt,
            "INBOX",
            &original,
        )
        .unwrap();

        assert_eq!(
            Replacement::Replaced {
                original_uid: "100".to_owned(),
                new_uid: "101".to_owned(),
                subject: "Test".to_owned(),
                synced: true,
            },
            result
        );
        assert_eq!(
            vec![
                "set_flags INBOX [\"100\"] \\Deleted true",
                "set_flags INBOX [\"100\"] $E3Done true",
                "delete INBOX [\"100\"]",
                "append INBOX Test",
                "set_flag_on_all Trash \\Deleted true",
            ],
            remote.ops()
        );
        assert!(session.pending.is_empty());

        let inbox = local.messages("INBOX");
        assert_eq!(1, inbox.len());
        assert_eq!("101", inbox[0].uid);
        assert!(inbox[0].has_flag(&Flag::E3));
        assert!(!inbox[0].has_flag(&Flag::RemoteCopyStarted));
        assert!(is_e3_encrypted(&inbox[0]));
        // Emptying the trash follows, so the original is not kept locally
        assert!(local.messages("Trash").is_empty());

        let remote_inbox = remote.messages("INBOX");
        assert_eq!(1, remote_inbox.len());
        assert!(remote_inbox[0].has_flag(&Flag::E3));
        let remote_trash = remote.messages("Trash");
        assert_eq!(1, remote_trash.len());
        assert!(remote_trash[0].has_flag(&Flag::Deleted));
        assert!(remote_trash[0].has_flag(&Flag::E3Done));

        assert_eq!(
            vec![(
                "INBOX".to_owned(),
                "local-1".to_owned(),
                "101".to_owned()
            )],
            *listener.changes.lock().unwrap()
        );
    }

    #[test]
    fn decrypt_keeps_original_in_trash() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, local, remote, _) =
            seeded(root.path(), ExpungePolicy::Manually, "INBOX");
        let mut encrypted = MarkerTransform
            .encrypt(&sample_message("Secret", "<s@example.com>"), &[])
            .unwrap();
        encrypted.uid = remote.inject("INBOX", encrypted.clone());
        session
            .local
            .store_message("INBOX", encrypted.clone())
            .unwrap();

        let result = replace_message(
            &mut session,
            &MarkerTransform,
            Direction::Decrypt,
            "INBOX",
            &encrypted,
        )
        .unwrap();
        assert!(result.is_replaced());
        assert!(!remote.ops().iter().any(|op| op.contains("set_flag_on_all")));

        let trash = local.messages("Trash");
        assert_eq!(1, trash.len());
        assert_eq!("Secret", trash[0].subject());
        assert!(trash[0].has_flag(&Flag::Deleted));
        assert!(trash[0].has_flag(&Flag::E3Done));

        let decrypted = local
            .messages("INBOX")
            .into_iter()
            .find(|m| "Secret" == m.subject())
            .unwrap();
        assert!(!decrypted.has_flag(&Flag::E3));
        assert!(!decrypted.headers.contains(E3_ENCRYPTED));
    }

    #[test]
    fn already_encrypted_passes_through() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, local, remote, _) =
            seeded(root.path(), ExpungePolicy::Manually, "INBOX");
        let encrypted = MarkerTransform
            .encrypt(&sample_message("Done", "<d@example.com>"), &[])
            .unwrap();

        let result = replace_message(
            &mut session,
            &MarkerTransform,
            Direction::Encrypt,
            "INBOX",
            &encrypted,
        )
        .unwrap();
        assert_eq!(Replacement::PassedThrough(encrypted), result);
        assert!(remote.ops().is_empty());
        assert!(session.pending.is_empty());
        assert_eq!(1, local.messages("INBOX").len());
    }

    #[test]
    fn crypto_failure_enqueues_nothing() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, local, remote, original) =
            seeded(root.path(), ExpungePolicy::Manually, "INBOX");
        assert_matches!(
            Err(Error::CryptoProvider { .. }),
            replace_message(
                &mut session,
                &FailingTransform,
                Direction::Encrypt,
                "INBOX",
                &original,
            )
        );
        assert!(remote.ops().is_empty());
        assert!(session.pending.is_empty());
        assert_eq!(vec![original], local.messages("INBOX"));
    }

    #[test]
    fn message_in_trash_is_not_moved() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, _, remote, original) =
            seeded(root.path(), ExpungePolicy::Manually, "Trash");

        replace_message(
            &mut session,
            &MarkerTransform,
            Direction::Encrypt,
            "Trash",
            &original,
        )
        .unwrap();
        assert_eq!(vec!["append Trash Test"], remote.ops());
    }

    #[test]
    fn transient_failure_defers_remote_update() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, local, remote, original) =
            seeded(root.path(), ExpungePolicy::Immediately, "INBOX");
        remote.fail_next("append", Failure::Transient);

        let result = replace_message(
            &mut session,
            &MarkerTransform,
            Direction::Encrypt,
            "INBOX",
            &original,
        )
        .unwrap();
        assert_matches!(Replacement::Replaced { synced: false, .. }, result);
        // The append and the empty-trash are still to do
        assert_eq!(2, session.pending.len());
        assert!(local.messages("INBOX")[0].uid.starts_with("local-"));

        session.flush().unwrap();
        assert!(session.pending.is_empty());
        assert!(!local.messages("INBOX")[0].uid.starts_with("local-"));
    }

    #[test]
    fn unavailable_account_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, _, remote, original) =
            seeded(root.path(), ExpungePolicy::Manually, "INBOX");
        remote.fail_next("set_flags", Failure::Unavailable);

        assert_matches!(
            Err(Error::AccountUnavailable),
            replace_message(
                &mut session,
                &MarkerTransform,
                Direction::Encrypt,
                "INBOX",
                &original,
            )
        );
        assert_eq!(5, session.pending.len());
    }

    #[test]
    fn failed_queue_write_rolls_back() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, local, remote, original) =
            seeded(root.path(), ExpungePolicy::Immediately, "INBOX");
        let mut encrypted = MarkerTransform
            .encrypt(&sample_message("Secret", "<s@example.com>"), &[])
            .unwrap();
        encrypted.uid = remote.inject("INBOX", encrypted.clone());
        session
            .local
            .store_message("INBOX", encrypted.clone())
            .unwrap();

        // The log can no longer stage its rewrite
        std::fs::remove_dir_all(root.path().join("tmp")).unwrap();

        assert_matches!(
            Err(Error::Io(..)),
            replace_message(
                &mut session,
                &MarkerTransform,
                Direction::Encrypt,
                "INBOX",
                &original,
            )
        );
        // Decrypting keeps a copy in the trash, which must be undone too
        assert_matches!(
            Err(Error::Io(..)),
            replace_message(
                &mut session,
                &MarkerTransform,
                Direction::Decrypt,
                "INBOX",
                &encrypted,
            )
        );

        assert!(session.pending.is_empty());
        assert_eq!(vec![original, encrypted], local.messages("INBOX"));
        assert!(local.messages("Trash").is_empty());

        session.flush().unwrap();
        assert!(remote.ops().is_empty());
        assert_eq!(2, remote.messages("INBOX").len());
    }
}
