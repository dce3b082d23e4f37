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

//! The PGP backend, driving an out-of-process signing/encryption service.
//!
//! The service runs requests asynchronously. Each request yields a
//! `PendingCall`, which the caller waits on with a timeout and which can be
//! cancelled from any thread through its `CancelHandle`. The service side
//! holds the matching `Completer` and reports exactly one outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};

use super::transform::{
    reject_if_encrypted, CryptoTransform, IdentityContext, TransformOutcome,
};
use crate::account::model::Flag;
use crate::mime::header::{
    CD_PGP_PAYLOAD, CT_PGP_ENCRYPTED, CT_PGP_PAYLOAD, E3_ENCRYPTED,
};
use crate::mime::message::{Body, Headers, Message, Part};
use crate::support::error::Error;

/// Provider error code for a call that did not finish in time.
pub const CODE_TIMEOUT: i32 = -1;
/// Provider error code for a service that dropped a call unanswered.
pub const CODE_ABANDONED: i32 = -2;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PgpOperation {
    SignAndEncrypt,
    DecryptVerify,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PgpRequest {
    pub operation: PgpOperation,
    /// Identities to encrypt to. Empty for decryption.
    pub recipients: Vec<String>,
    /// Identity whose key signs the output.
    pub sign_key: Option<String>,
    /// Identity expected to have signed the input.
    pub sender: Option<String>,
    pub armor: bool,
}

/// The out-of-process PGP service.
pub trait PgpService: Send + Sync {
    /// Start `request` over `input`. The call must eventually be completed,
    /// or its `Completer` dropped.
    fn submit(&self, request: PgpRequest, input: Vec<u8>) -> PendingCall;
}

#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The caller's side of an in-flight service call.
pub struct PendingCall {
    result: Receiver<TransformOutcome>,
    cancel: CancelHandle,
}

/// The service's side of an in-flight call.
pub struct Completer {
    result: Sender<TransformOutcome>,
    cancel: CancelHandle,
}

impl PendingCall {
    pub fn new() -> (PendingCall, Completer) {
        let (tx, rx) = channel::bounded(1);
        let cancel = CancelHandle::default();
        (
            PendingCall {
                result: rx,
                cancel: cancel.clone(),
            },
            Completer { result: tx, cancel },
        )
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Block until the call completes, is cancelled, or `timeout` elapses.
    ///
    /// Timing out cancels the call.
    pub fn wait(self, timeout: Duration) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                self.cancel.cancel();
                return Err(Error::CryptoProvider {
                    code: CODE_TIMEOUT,
                    message: "Timed out waiting for PGP service".to_owned(),
                });
            }

            match self.result.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(outcome) => return outcome.into_result(),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    // A service may answer cancellation by dropping the call
                    if self.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    return Err(Error::CryptoProvider {
                        code: CODE_ABANDONED,
                        message: "PGP service abandoned the request"
                            .to_owned(),
                    })
                }
            }
        }
    }
}

impl Completer {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn complete(self, outcome: TransformOutcome) {
        // The caller may have stopped waiting; that is fine.
        let _ = self.result.send(outcome);
    }
}

/// An operation submitted to the service whose result is still to come.
pub struct InFlight<'a> {
    backend: &'a PgpBackend,
    call: PendingCall,
    original: &'a Message,
    operation: PgpOperation,
}

impl<'a> InFlight<'a> {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.call.cancel_handle()
    }

    /// Wait for the service and assemble the resulting message.
    pub fn wait(self, timeout: Duration) -> Result<Message, Error> {
        let data = self.call.wait(timeout)?;
        match self.operation {
            PgpOperation::SignAndEncrypt => {
                Ok(self.backend.wrap_encrypted(self.original, data))
            }
            PgpOperation::DecryptVerify => unwrap_decrypted(self.original, &data),
        }
    }
}

pub struct PgpBackend {
    service: Arc<dyn PgpService>,
    own_address: String,
    timeout: Duration,
}

impl PgpBackend {
    pub fn new(
        service: Arc<dyn PgpService>,
        own_address: String,
        timeout: Duration,
    ) -> Self {
        PgpBackend {
            service,
            own_address,
            timeout,
        }
    }

    /// Submit encryption of `message`, signed by and also encrypted to the
    /// account owner.
    pub fn begin_encrypt<'a>(
        &'a self,
        message: &'a Message,
        recipients: &[String],
    ) -> Result<InFlight<'a>, Error> {
        reject_if_encrypted(message)?;

        let mut all_recipients = recipients.to_vec();
        if !all_recipients
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&self.own_address))
        {
            all_recipients.push(self.own_address.clone());
        }

        let request = PgpRequest {
            operation: PgpOperation::SignAndEncrypt,
            recipients: all_recipients,
            sign_key: Some(self.own_address.clone()),
            sender: None,
            armor: true,
        };
        info!(
            "PGP encrypting '{}' to {:?}",
            message.subject(),
            request.recipients
        );

        Ok(InFlight {
            backend: self,
            call: self.service.submit(request, content_entity(message)),
            original: message,
            operation: PgpOperation::SignAndEncrypt,
        })
    }

    pub fn begin_decrypt<'a>(
        &'a self,
        message: &'a Message,
        identity: &IdentityContext,
    ) -> Result<InFlight<'a>, Error> {
        if !message.headers.contains(E3_ENCRYPTED) {
            return Err(Error::UnsupportedInput(
                "message lacks the E3 encryption marker",
            ));
        }

        let payload = match message.body {
            Body::Multipart { ref parts, .. } if parts.len() >= 2 => &parts[1],
            _ => {
                return Err(Error::MalformedMessage(
                    "PGP message has no encrypted payload part",
                ))
            }
        };

        let sender = if identity.own_message {
            Some(self.own_address.clone())
        } else {
            identity.sender.clone()
        };
        let request = PgpRequest {
            operation: PgpOperation::DecryptVerify,
            recipients: Vec::new(),
            sign_key: None,
            sender,
            armor: false,
        };

        Ok(InFlight {
            backend: self,
            call: self.service.submit(request, payload.decoded_body()?),
            original: message,
            operation: PgpOperation::DecryptVerify,
        })
    }

    fn wrap_encrypted(&self, original: &Message, armored: Vec<u8>) -> Message {
        let mut headers = original.headers.clone();
        headers.remove("Content-Type");
        headers.remove("Content-Transfer-Encoding");
        headers.set("MIME-Version", "1.0");
        headers.set(E3_ENCRYPTED, self.own_address.clone());

        let mut payload = Part::leaf(CT_PGP_PAYLOAD, armored);
        payload.headers.set("Content-Disposition", CD_PGP_PAYLOAD);

        let mut message = Message::new(headers, Body::Single(Vec::new()));
        message.set_multipart(
            "encrypted; protocol=\"application/pgp-encrypted\"",
            vec![Part::leaf(CT_PGP_ENCRYPTED, "Version: 1\r\n"), payload],
        );
        message.flags = original.flags.clone();
        message.set_flag(Flag::E3, true);
        message.internal_date = original.internal_date;
        message
    }
}

impl CryptoTransform for PgpBackend {
    fn name(&self) -> &'static str {
        "pgp"
    }

    fn encrypt(
        &self,
        message: &Message,
        recipients: &[String],
    ) -> Result<Message, Error> {
        self.begin_encrypt(message, recipients)?.wait(self.timeout)
    }

    fn decrypt(
        &self,
        message: &Message,
        identity: &IdentityContext,
    ) -> Result<Message, Error> {
        self.begin_decrypt(message, identity)?
            .wait(self.timeout)
            .map_err(|e| {
                warn!("PGP decryption of '{}' failed: {}", message.subject(), e);
                e
            })
    }
}

/// The MIME entity carrying the message content: its content headers and
/// body, without the envelope headers.
fn content_entity(message: &Message) -> Vec<u8> {
    let mut headers = Headers::new();
    headers.set(
        "Content-Type",
        message.headers.get("Content-Type").unwrap_or("text/plain"),
    );
    if let Some(cte) = message.headers.get("Content-Transfer-Encoding") {
        headers.set("Content-Transfer-Encoding", cte);
    }
    Part::new(headers, message.body.clone()).to_bytes()
}

fn unwrap_decrypted(original: &Message, data: &[u8]) -> Result<Message, Error> {
    let entity = Part::parse(data)?;

    let mut headers = original.headers.clone();
    headers.remove(E3_ENCRYPTED);
    headers.remove("Content-Transfer-Encoding");
    headers.set(
        "Content-Type",
        entity.headers.get("Content-Type").unwrap_or("text/plain"),
    );
    if let Some(cte) = entity.headers.get("Content-Transfer-Encoding") {
        headers.set("Content-Transfer-Encoding", cte);
    }

    let mut message = Message::new(headers, entity.body);
    message.flags = original.flags.clone();
    message.set_flag(Flag::E3, false);
    message.internal_date = original.internal_date;
    Ok(message)
}
