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

use std::io;

use thiserror::Error;

use crate::crypt::transform::ResumeHandle;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe key alias or folder name")]
    UnsafeName,
    #[error("Key alias not found in key store")]
    NamedKeyNotFound,
    #[error("Key store password incorrect")]
    BadKeyStorePassword,
    #[error("Key store file malformed")]
    BadKeyStore,
    #[error("PKCS#12 container holds no usable key")]
    EmptyPkcs12,
    #[error("Malformed message: {0}")]
    MalformedMessage(&'static str),
    #[error("Unsupported input: {0}")]
    UnsupportedInput(&'static str),
    #[error("Crypto provider error {code}: {message}")]
    CryptoProvider { code: i32, message: String },
    #[error("Crypto provider requires user interaction")]
    UserInteractionRequired(ResumeHandle),
    #[error("Crypto operation cancelled")]
    Cancelled,
    #[error("Native CMS primitive failed with status {0}")]
    CmsStatus(i32),
    #[error("Remote store failure (transient): {0}")]
    RemoteTransient(String),
    #[error("Remote store rejected operation: {0}")]
    RemotePermanent(String),
    #[error("Account unavailable")]
    AccountUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
}

impl Error {
    /// Whether a failure while replaying a pending command means the command
    /// can never succeed, and so should be dropped rather than retried.
    ///
    /// Only I/O errors, transient remote errors and an unavailable account
    /// are worth retrying.
    pub fn is_permanent_failure(&self) -> bool {
        !matches!(
            *self,
            Error::Io(..)
                | Error::RemoteTransient(..)
                | Error::AccountUnavailable
        )
    }

    /// Whether this error belongs to the crypto transform taxonomy, as
    /// opposed to storage or remote failures.
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            *self,
            Error::UnsupportedInput(..)
                | Error::CryptoProvider { .. }
                | Error::UserInteractionRequired(..)
                | Error::Cancelled
                | Error::CmsStatus(..)
                | Error::Ssl(..)
        )
    }
}
