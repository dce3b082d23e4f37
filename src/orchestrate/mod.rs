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

//! Replacing messages with their encrypted or decrypted forms while keeping
//! the remote store in step with the local cache.
//!
//! Each replacement is committed locally and queued on the account's
//! pending log before anything touches the server, then the log is flushed
//! so that one message's remote transition completes before the next
//! begins.

pub mod bulk;
pub mod incoming;
pub mod replace;

pub use self::replace::{replace_message, Replacement};
