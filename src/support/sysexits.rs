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

//! Constants from `sysexits.h`
//!
//! The CLI reports failures with these so that wrapper scripts can tell a
//! configuration mistake from a temporary outage.

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_NOUSER: Sysexit = Sysexit(67);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_OSERR: Sysexit = Sysexit(71);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}

impl From<&crate::support::error::Error> for Sysexit {
    fn from(e: &crate::support::error::Error) -> Self {
        use crate::support::error::Error;

        match *e {
            Error::UnsafeName => EX_USAGE,
            Error::NamedKeyNotFound => EX_NOUSER,
            Error::BadKeyStorePassword => EX_NOPERM,
            Error::BadKeyStore
            | Error::EmptyPkcs12
            | Error::MalformedMessage(..)
            | Error::UnsupportedInput(..)
            | Error::Cbor(..) => EX_DATAERR,
            Error::RemoteTransient(..)
            | Error::AccountUnavailable
            | Error::UserInteractionRequired(..) => EX_TEMPFAIL,
            Error::Io(..) => EX_IOERR,
            Error::CryptoProvider { .. }
            | Error::Cancelled
            | Error::CmsStatus(..)
            | Error::RemotePermanent(..)
            | Error::Ssl(..) => EX_SOFTWARE,
        }
    }
}
