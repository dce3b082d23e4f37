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

//! The mail stores E3 drives.
//!
//! Talking IMAP and managing the on-device message cache are the host
//! client's business. E3 only sees them through these traits.

use std::collections::HashMap;

use chrono::prelude::*;

use crate::account::model::Flag;
use crate::mime::message::Message;
use crate::support::error::Error;

#[cfg(test)]
pub mod memory;

/// The mode a remote folder could be opened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

/// What the remote store reports about a message without fetching it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessageInfo {
    pub uid: String,
    pub internal_date: DateTime<Utc>,
}

/// The server side of an account.
///
/// Errors must be classified by the implementation: `RemotePermanent` for
/// rejections which will never succeed, `RemoteTransient` or `Io` for
/// anything worth retrying.
pub trait RemoteStore: Send {
    fn folder_exists(&mut self, folder: &str) -> Result<bool, Error>;

    /// Create `folder`. Returns whether it was created.
    fn create_folder(&mut self, folder: &str) -> Result<bool, Error>;

    /// Open `folder` read-write if possible.
    fn open(&mut self, folder: &str) -> Result<OpenMode, Error>;

    /// Whether `flag` can be stored on messages in `folder`.
    fn supports_flag(&mut self, folder: &str, flag: &Flag)
        -> Result<bool, Error>;

    fn message_info(
        &mut self,
        folder: &str,
        uid: &str,
    ) -> Result<Option<RemoteMessageInfo>, Error>;

    /// UIDs of every message in `folder` with the given `Message-ID`, in
    /// ascending order.
    fn find_uids_by_message_id(
        &mut self,
        folder: &str,
        message_id: &str,
    ) -> Result<Vec<String>, Error>;

    fn fetch(
        &mut self,
        folder: &str,
        uid: &str,
    ) -> Result<Option<Message>, Error>;

    /// UIDs of messages in `folder` carrying `flag`.
    fn search_flagged(
        &mut self,
        folder: &str,
        flag: &Flag,
    ) -> Result<Vec<String>, Error>;

    /// Append `message`, returning the UID the server assigned if it
    /// reported one.
    fn append(
        &mut self,
        folder: &str,
        message: &Message,
    ) -> Result<Option<String>, Error>;

    /// Copy messages, returning a map from source UID to new UID for those
    /// the server reported.
    fn copy_messages(
        &mut self,
        src: &str,
        dst: &str,
        uids: &[String],
    ) -> Result<HashMap<String, String>, Error>;

    fn move_messages(
        &mut self,
        src: &str,
        dst: &str,
        uids: &[String],
    ) -> Result<HashMap<String, String>, Error>;

    /// Delete messages the way the server prefers, which usually means moving
    /// them into `trash`.
    fn delete_messages(
        &mut self,
        folder: &str,
        uids: &[String],
        trash: &str,
    ) -> Result<(), Error>;

    fn set_flags(
        &mut self,
        folder: &str,
        uids: &[String],
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error>;

    fn set_flag_on_all(
        &mut self,
        folder: &str,
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error>;

    fn expunge(&mut self, folder: &str) -> Result<(), Error>;
}

/// The on-device message cache.
pub trait LocalStore: Send {
    fn folder_exists(&self, folder: &str) -> bool;

    fn create_folder(&mut self, folder: &str) -> Result<(), Error>;

    fn get_message(
        &self,
        folder: &str,
        uid: &str,
    ) -> Result<Option<Message>, Error>;

    /// UIDs of all messages in `folder`, oldest first.
    fn list_uids(&self, folder: &str) -> Result<Vec<String>, Error>;

    /// Store `message`, replacing any message with the same UID.
    ///
    /// A message with an empty UID is assigned a new local-only UID. Returns
    /// the UID the message is stored under.
    fn store_message(
        &mut self,
        folder: &str,
        message: Message,
    ) -> Result<String, Error>;

    fn change_uid(
        &mut self,
        folder: &str,
        old_uid: &str,
        new_uid: &str,
    ) -> Result<(), Error>;

    fn set_flag(
        &mut self,
        folder: &str,
        uid: &str,
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error>;

    fn set_flag_on_all(
        &mut self,
        folder: &str,
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error>;

    fn destroy_message(&mut self, folder: &str, uid: &str)
        -> Result<(), Error>;
}

/// Observer of changes other parts of the client need to reconcile.
pub trait MessageListener: Send + Sync {
    /// A message's UID changed, typically from a local-only UID to the one
    /// the server assigned.
    fn message_uid_changed(
        &self,
        account: &str,
        folder: &str,
        old_uid: &str,
        new_uid: &str,
    );
}
