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

//! Encryption of messages as they are downloaded.

use std::sync::{Arc, Mutex};

use log::{error, info};

use super::replace::{replace_message, Replacement};
use crate::account::model::Flag;
use crate::account::session::AccountSession;
use crate::crypt::transform::{CryptoTransform, Direction};
use crate::mime::announcement::is_key_announcement;
use crate::mime::message::Message;
use crate::support::error::Error;

/// Receives each message once the client has retrieved it into the local
/// cache.
pub trait RetrievalListener: Send + Sync {
    fn message_retrieved(
        &self,
        folder: &str,
        message: &Message,
    ) -> Result<(), Error>;
}

/// A `RetrievalListener` which encrypts each retrieved message before
/// anything downstream gets to see it.
///
/// Key backups, key announcements and messages already encrypted are handed
/// on unchanged, as is everything when the account has encryption turned
/// off. If the transform fails the message is not handed on at all; it
/// stays in the cache in plaintext for a later bulk pass.
pub struct IncomingEncryptor {
    session: Arc<Mutex<AccountSession>>,
    transform: Arc<dyn CryptoTransform>,
    downstream: Arc<dyn RetrievalListener>,
}

impl IncomingEncryptor {
    pub fn new(
        session: Arc<Mutex<AccountSession>>,
        transform: Arc<dyn CryptoTransform>,
        downstream: Arc<dyn RetrievalListener>,
    ) -> Self {
        IncomingEncryptor {
            session,
            transform,
            downstream,
        }
    }

    fn encrypt(
        &self,
        folder: &str,
        message: &Message,
    ) -> Result<Option<Message>, Error> {
        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !session.account.e3.encryption_enabled
            || session.account.e3.backup_folder == folder
            || message.has_flag(&Flag::E3Key)
            || is_key_announcement(message)
        {
            return Ok(Some(message.clone()));
        }

        match replace_message(
            &mut session,
            &*self.transform,
            Direction::Encrypt,
            folder,
            message,
        ) {
            Ok(Replacement::PassedThrough(message)) => Ok(Some(message)),
            Ok(Replacement::Replaced { new_uid, .. }) => {
                info!(
                    "{} Encrypted incoming {}/{}",
                    session.log_prefix, folder, new_uid
                );
                session.local.get_message(folder, &new_uid)
            }
            Err(e) => {
                error!(
                    "{} Failed to encrypt incoming {}/{}: {}",
                    session.log_prefix, folder, message.uid, e
                );
                Err(e)
            }
        }
    }
}

impl RetrievalListener for IncomingEncryptor {
    fn message_retrieved(
        &self,
        folder: &str,
        message: &Message,
    ) -> Result<(), Error> {
        // The session lock is released before calling downstream
        match self.encrypt(folder, message)? {
            Some(message) => self.downstream.message_retrieved(folder, &message),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::testing::{FailingTransform, MarkerTransform};
    use super::*;
    use crate::account::model::{E3Mode, ExpungePolicy};
    use crate::account::session::testing::*;
    use crate::mime::header::is_e3_encrypted;
    use crate::store::memory::*;
    use crate::store::LocalStore;

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<Message>>,
    }

    impl RetrievalListener for Collector {
        fn message_retrieved(
            &self,
            _folder: &str,
            message: &Message,
        ) -> Result<(), Error> {
            self.seen.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn fixture(
        root: &std::path::Path,
        mode: E3Mode,
        transform: Arc<dyn CryptoTransform>,
    ) -> (IncomingEncryptor, Arc<Collector>, MemoryRemote, MemoryLocal, Message)
    {
        let mut account = test_account(mode);
        account.expunge_policy = ExpungePolicy::Manually;
        let (mut session, local, remote) = test_session(root, account);

        let mut message = sample_message("Hello", "<hello@example.com>");
        message.uid = remote.inject("INBOX", message.clone());
        session.local.store_message("INBOX", message.clone()).unwrap();

        let collector = Arc::new(Collector::default());
        let encryptor = IncomingEncryptor::new(
            Arc::new(Mutex::new(session)),
            transform,
            collector.clone(),
        );
        (encryptor, collector, remote, local, message)
    }

    #[test]
    fn downstream_only_sees_ciphertext() {
        let root = tempfile::tempdir().unwrap();
        let (encryptor, collector, remote, local, message) = fixture(
            root.path(),
            E3Mode::Standalone,
            Arc::new(MarkerTransform),
        );

        encryptor.message_retrieved("INBOX", &message).unwrap();

        let seen = collector.seen.lock().unwrap();
        assert_eq!(1, seen.len());
        assert!(is_e3_encrypted(&seen[0]));
        assert!(seen[0].has_flag(&Flag::E3));
        assert_eq!("101", seen[0].uid);

        assert_eq!(vec![seen[0].clone()], local.messages("INBOX"));
        assert_eq!(1, remote.messages("INBOX").len());
    }

    #[test]
    fn passive_account_passes_plaintext() {
        let root = tempfile::tempdir().unwrap();
        let (encryptor, collector, remote, _, message) = fixture(
            root.path(),
            E3Mode::Passive,
            Arc::new(MarkerTransform),
        );

        encryptor.message_retrieved("INBOX", &message).unwrap();
        assert_eq!(vec![message], *collector.seen.lock().unwrap());
        assert!(remote.ops().is_empty());
    }

    #[test]
    fn key_backups_are_not_encrypted() {
        let root = tempfile::tempdir().unwrap();
        let (encryptor, collector, remote, _, mut message) = fixture(
            root.path(),
            E3Mode::Standalone,
            Arc::new(MarkerTransform),
        );
        message.set_flag(Flag::E3Key, true);

        encryptor.message_retrieved("INBOX", &message).unwrap();
        assert_eq!(vec![message], *collector.seen.lock().unwrap());
        assert!(remote.ops().is_empty());
    }

    #[test]
    fn failed_transform_hides_message() {
        let root = tempfile::tempdir().unwrap();
        let (encryptor, collector, _, local, message) = fixture(
            root.path(),
            E3Mode::Standalone,
            Arc::new(FailingTransform),
        );

        assert_matches!(
            Err(Error::CryptoProvider { .. }),
            encryptor.message_retrieved("INBOX", &message)
        );
        assert!(collector.seen.lock().unwrap().is_empty());
        assert_eq!(vec![message], local.messages("INBOX"));
    }
}
