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

//! The common interface of the E3 crypto backends.

use std::fmt;

use crate::account::model::{Account, Flag};
use crate::mime::header::is_e3_encrypted;
use crate::mime::message::Message;
use crate::support::error::Error;

/// Which way a message is being transformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    pub fn is_encrypt(self) -> bool {
        Direction::Encrypt == self
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Direction::Encrypt => write!(f, "encrypt"),
            Direction::Decrypt => write!(f, "decrypt"),
        }
    }
}

/// Who is decrypting, and who is expected to have signed.
#[derive(Clone, Debug, Default)]
pub struct IdentityContext {
    /// The address the message claims to come from, for signature checks.
    pub sender: Option<String>,
    /// Whether the message was encrypted by this account, so the account's
    /// own key should be used to check the signature.
    pub own_message: bool,
}

impl IdentityContext {
    pub fn for_message(message: &Message) -> Self {
        IdentityContext {
            sender: message.headers.get("From").map(str::to_owned),
            own_message: message.has_flag(&Flag::E3),
        }
    }
}

/// Opaque token an external provider hands back when it needs the user to
/// do something before the operation can continue.
#[derive(Clone, PartialEq, Eq)]
pub struct ResumeHandle(pub Vec<u8>);

impl fmt::Debug for ResumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResumeHandle({} bytes)", self.0.len())
    }
}

/// The three ways a provider call can end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransformOutcome {
    Success(Vec<u8>),
    UserInteractionRequired(ResumeHandle),
    Error { code: i32, message: String },
}

impl TransformOutcome {
    /// Map a provider outcome onto the crate's error taxonomy.
    ///
    /// A request for user interaction becomes an error of its own kind; no
    /// E3 flow is able to resume such an operation.
    pub fn into_result(self) -> Result<Vec<u8>, Error> {
        match self {
            TransformOutcome::Success(data) => Ok(data),
            TransformOutcome::UserInteractionRequired(handle) => {
                Err(Error::UserInteractionRequired(handle))
            }
            TransformOutcome::Error { code, message } => {
                Err(Error::CryptoProvider { code, message })
            }
        }
    }
}

/// A backend able to encrypt and decrypt whole messages.
///
/// Both operations return a new message and leave the input untouched, so
/// they are safe to retry. Input already in the target state is rejected
/// with `Error::UnsupportedInput`.
pub trait CryptoTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn encrypt(
        &self,
        message: &Message,
        recipients: &[String],
    ) -> Result<Message, Error>;

    fn decrypt(
        &self,
        message: &Message,
        identity: &IdentityContext,
    ) -> Result<Message, Error>;

    /// Transform `message` in `direction` on behalf of `account`.
    ///
    /// Encryption is always to the account's own address, so the owner can
    /// read the archived copy later.
    fn apply(
        &self,
        direction: Direction,
        account: &Account,
        message: &Message,
    ) -> Result<Message, Error> {
        match direction {
            Direction::Encrypt => {
                self.encrypt(message, &[account.email.clone()])
            }
            Direction::Decrypt => {
                self.decrypt(message, &IdentityContext::for_message(message))
            }
        }
    }
}

/// Reject messages which already carry the E3 marker.
pub fn reject_if_encrypted(message: &Message) -> Result<(), Error> {
    if is_e3_encrypted(message) || message.has_flag(&Flag::E3) {
        Err(Error::UnsupportedInput("message is already E3-encrypted"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mime::header::E3_ENCRYPTED;
    use crate::mime::message::{Body, Headers};

    #[test]
    fn outcome_mapping() {
        assert_eq!(
            vec![1u8, 2],
            TransformOutcome::Success(vec![1, 2]).into_result().unwrap()
        );
        assert_matches!(
            Err(Error::UserInteractionRequired(ResumeHandle(..))),
            TransformOutcome::UserInteractionRequired(ResumeHandle(vec![9]))
                .into_result()
        );
        assert_matches!(
            Err(Error::CryptoProvider { code: 4, .. }),
            TransformOutcome::Error {
                code: 4,
                message: "no key".to_owned()
            }
            .into_result()
        );
    }

    #[test]
    fn encrypted_marker_detection() {
        let mut message = Message::new(Headers::new(), Body::Single(vec![]));
        assert!(reject_if_encrypted(&message).is_ok());

        message.set_flag(Flag::E3, true);
        assert_matches!(
            Err(Error::UnsupportedInput(..)),
            reject_if_encrypted(&message)
        );

        message.set_flag(Flag::E3, false);
        message.headers.set(E3_ENCRYPTED, "alice@example.com");
        assert_matches!(
            Err(Error::UnsupportedInput(..)),
            reject_if_encrypted(&message)
        );
    }

    #[test]
    fn identity_from_message() {
        let mut headers = Headers::new();
        headers.set("From", "bob@example.com");
        let mut message = Message::new(headers, Body::Single(vec![]));
        message.set_flag(Flag::E3, true);

        let identity = IdentityContext::for_message(&message);
        assert_eq!(Some("bob@example.com"), identity.sender.as_deref());
        assert!(identity.own_message);
    }
}
