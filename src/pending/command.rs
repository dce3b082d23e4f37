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

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::model::Flag;

/// A remote mutation waiting to be replayed against the server.
///
/// Every variant must be safe to execute again after a crash part-way
/// through, since removal from the log only happens after execution.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum PendingCommand {
    /// Upload the local message `uid` in `folder`.
    Append { folder: String, uid: String },
    /// Move or copy `uids` from `src_folder` to `dst_folder`.
    ///
    /// `uid_remap`, if present, maps each source UID to the local UID of the
    /// already-created local destination copy, so that local copy can adopt
    /// the UID the server assigns.
    MoveOrCopy {
        src_folder: String,
        dst_folder: String,
        is_copy: bool,
        uids: Vec<String>,
        uid_remap: Option<BTreeMap<String, String>>,
    },
    SetFlag {
        folder: String,
        flag: Flag,
        state: bool,
        uids: Vec<String>,
    },
    EmptyTrash,
    Expunge { folder: String },
    MarkAllRead { folder: String },
}

impl PendingCommand {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match *self {
            PendingCommand::Append { .. } => "append",
            PendingCommand::MoveOrCopy { is_copy: true, .. } => "copy",
            PendingCommand::MoveOrCopy { is_copy: false, .. } => "move",
            PendingCommand::SetFlag { .. } => "set_flag",
            PendingCommand::EmptyTrash => "empty_trash",
            PendingCommand::Expunge { .. } => "expunge",
            PendingCommand::MarkAllRead { .. } => "mark_all_read",
        }
    }

    pub fn set_flag(
        folder: &str,
        flag: Flag,
        state: bool,
        uids: Vec<String>,
    ) -> Self {
        PendingCommand::SetFlag {
            folder: folder.to_owned(),
            flag,
            state,
            uids,
        }
    }

    pub fn append(folder: &str, uid: &str) -> Self {
        PendingCommand::Append {
            folder: folder.to_owned(),
            uid: uid.to_owned(),
        }
    }

    pub fn move_to(
        src_folder: &str,
        dst_folder: &str,
        uids: Vec<String>,
        uid_remap: Option<BTreeMap<String, String>>,
    ) -> Self {
        PendingCommand::MoveOrCopy {
            src_folder: src_folder.to_owned(),
            dst_folder: dst_folder.to_owned(),
            is_copy: false,
            uids,
            uid_remap,
        }
    }
}

impl fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PendingCommand::Append {
                ref folder,
                ref uid,
            } => write!(f, "append {}/{}", folder, uid),
            PendingCommand::MoveOrCopy {
                ref src_folder,
                ref dst_folder,
                ref uids,
                ..
            } => write!(
                f,
                "{} {:?} {} -> {}",
                self.name(),
                uids,
                src_folder,
                dst_folder
            ),
            PendingCommand::SetFlag {
                ref folder,
                ref flag,
                state,
                ref uids,
            } => write!(
                f,
                "set_flag {} {}={} {:?}",
                folder, flag, state, uids
            ),
            PendingCommand::EmptyTrash => write!(f, "empty_trash"),
            PendingCommand::Expunge { ref folder } => {
                write!(f, "expunge {}", folder)
            }
            PendingCommand::MarkAllRead { ref folder } => {
                write!(f, "mark_all_read {}", folder)
            }
        }
    }
}
