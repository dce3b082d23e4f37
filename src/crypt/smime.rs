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

//! The S/MIME backend.
//!
//! The actual CMS work happens behind `CmsPrimitive`, a narrow file-in,
//! file-out boundary reporting a plain status code. `OpensslCms` implements
//! it over OpenSSL; everything else here is MIME framing.
//!
//! Encryption signs the message with the account key and then encrypts the
//! signed entity to the account's own certificate. Decryption reverses this
//! and checks the signature.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::prelude::*;
use log::{info, warn};
use openssl::{
    cms::{CMSOptions, CmsContentInfo},
    pkey::PKey,
    stack::Stack,
    symm::Cipher,
    x509::X509,
};

use super::key_material::KeyMaterial;
use super::transform::{reject_if_encrypted, CryptoTransform, IdentityContext};
use crate::account::model::Flag;
use crate::mime::header::{
    is_smime, CD_SMIME_ATTACHMENT, CT_SMIME_ENVELOPED, E3_ENCRYPTED,
};
use crate::mime::message::{encode_base64_wrapped, Body, Headers, Message, Part};
use crate::support::error::Error;

pub const STATUS_OK: i32 = 0;
pub const STATUS_READ: i32 = 1;
pub const STATUS_KEY: i32 = 2;
pub const STATUS_CRYPTO: i32 = 3;
pub const STATUS_WRITE: i32 = 4;

const MAX_CMS_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// The native CMS operations.
///
/// Each reads `input` and writes `output`, returning `STATUS_OK` on success
/// and some other status otherwise. Keys and certificates are DER.
pub trait CmsPrimitive: Send + Sync {
    /// Produce an opaque signed S/MIME entity.
    fn sign(
        &self,
        cert_der: &[u8],
        key_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> i32;

    /// Produce an enveloped S/MIME entity for the certificate's owner.
    fn encrypt(&self, cert_der: &[u8], input: &Path, output: &Path) -> i32;

    /// Open an enveloped entity and verify the signed entity within,
    /// writing the original content.
    fn decrypt(
        &self,
        cert_der: &[u8],
        key_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> i32;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OpensslCms;

impl OpensslCms {
    fn try_sign(
        cert_der: &[u8],
        key_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> Result<(), i32> {
        let (cert, key) = load_keys(cert_der, Some(key_der))?;
        let data = read_file(input)?;
        let signed = CmsContentInfo::sign(
            Some(&*cert),
            key.as_deref(),
            None,
            Some(&data),
            CMSOptions::BINARY,
        )
        .map_err(|_| STATUS_CRYPTO)?;
        write_smime(output, &signed, "signed-data")
    }

    fn try_encrypt(
        cert_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> Result<(), i32> {
        let (cert, _) = load_keys(cert_der, None)?;
        let data = read_file(input)?;
        let mut certs = Stack::new().map_err(|_| STATUS_KEY)?;
        certs.push(cert).map_err(|_| STATUS_KEY)?;
        let enveloped = CmsContentInfo::encrypt(
            &certs,
            &data,
            Cipher::aes_256_cbc(),
            CMSOptions::BINARY,
        )
        .map_err(|_| STATUS_CRYPTO)?;
        write_smime(output, &enveloped, "enveloped-data")
    }

    fn try_decrypt(
        cert_der: &[u8],
        key_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> Result<(), i32> {
        let (cert, key) = load_keys(cert_der, Some(key_der))?;
        let key = key.ok_or(STATUS_KEY)?;

        let enveloped = read_smime(&read_file(input)?)?;
        let signed_entity = enveloped
            .decrypt(&key, &cert)
            .map_err(|_| STATUS_CRYPTO)?;

        let mut signed = read_smime(&signed_entity)?;
        let mut content = Vec::new();
        signed
            .verify(
                None,
                None,
                None,
                Some(&mut content),
                CMSOptions::NO_SIGNER_CERT_VERIFY,
            )
            .map_err(|_| STATUS_CRYPTO)?;

        fs::write(output, content).map_err(|_| STATUS_WRITE)
    }
}

impl CmsPrimitive for OpensslCms {
    fn sign(
        &self,
        cert_der: &[u8],
        key_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> i32 {
        status(Self::try_sign(cert_der, key_der, input, output))
    }

    fn encrypt(&self, cert_der: &[u8], input: &Path, output: &Path) -> i32 {
        status(Self::try_encrypt(cert_der, input, output))
    }

    fn decrypt(
        &self,
        cert_der: &[u8],
        key_der: &[u8],
        input: &Path,
        output: &Path,
    ) -> i32 {
        status(Self::try_decrypt(cert_der, key_der, input, output))
    }
}

fn status(result: Result<(), i32>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(status) => status,
    }
}

fn load_keys(
    cert_der: &[u8],
    key_der: Option<&[u8]>,
) -> Result<(X509, Option<PKey<openssl::pkey::Private>>), i32> {
    let cert = X509::from_der(cert_der).map_err(|_| STATUS_KEY)?;
    let key = match key_der {
        Some(der) => {
            Some(PKey::private_key_from_der(der).map_err(|_| STATUS_KEY)?)
        }
        None => None,
    };
    Ok((cert, key))
}

fn read_file(path: &Path) -> Result<Vec<u8>, i32> {
    crate::support::file_ops::slurp(path, MAX_CMS_FILE_SIZE)
        .map_err(|_| STATUS_READ)
}

fn write_smime(
    path: &Path,
    cms: &CmsContentInfo,
    smime_type: &str,
) -> Result<(), i32> {
    let der = cms.to_der().map_err(|_| STATUS_CRYPTO)?;
    let mut out = format!(
        "MIME-Version: 1.0\r\n\
         Content-Disposition: attachment; filename=\"smime.p7m\"\r\n\
         Content-Type: application/pkcs7-mime; smime-type={}; \
         name=\"smime.p7m\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n",
        smime_type
    )
    .into_bytes();
    out.extend_from_slice(&encode_base64_wrapped(&der));
    fs::write(path, out).map_err(|_| STATUS_WRITE)
}

fn read_smime(data: &[u8]) -> Result<CmsContentInfo, i32> {
    let der = Part::parse(data)
        .and_then(|p| p.decoded_body())
        .map_err(|_| STATUS_READ)?;
    CmsContentInfo::from_der(&der).map_err(|_| STATUS_READ)
}

/// Drop everything up to and including the first blank line.
fn strip_header_block(data: &[u8]) -> &[u8] {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|ix| &data[ix + 4..])
        .or_else(|| {
            data.windows(2)
                .position(|w| w == b"\n\n")
                .map(|ix| &data[ix + 2..])
        })
        .unwrap_or(data)
}

pub struct SmimeBackend {
    key: Arc<KeyMaterial>,
    primitive: Box<dyn CmsPrimitive>,
    tmp_dir: PathBuf,
    email: String,
}

impl SmimeBackend {
    pub fn new(
        key: Arc<KeyMaterial>,
        primitive: Box<dyn CmsPrimitive>,
        tmp_dir: PathBuf,
        email: String,
    ) -> Self {
        SmimeBackend {
            key,
            primitive,
            tmp_dir,
            email,
        }
    }

    fn scratch(&self) -> Result<tempfile::TempDir, Error> {
        fs::create_dir_all(&self.tmp_dir)?;
        Ok(tempfile::Builder::new()
            .prefix("smime")
            .tempdir_in(&self.tmp_dir)?)
    }
}

impl CryptoTransform for SmimeBackend {
    fn name(&self) -> &'static str {
        "smime"
    }

    fn encrypt(
        &self,
        message: &Message,
        _recipients: &[String],
    ) -> Result<Message, Error> {
        reject_if_encrypted(message)?;
        if is_smime(&message.headers) {
            return Err(Error::UnsupportedInput("message is already S/MIME"));
        }
        if !message.body.is_multipart() {
            return Err(Error::UnsupportedInput(
                "only multipart messages can be framed for S/MIME",
            ));
        }

        let mut canonical_headers = Headers::new();
        canonical_headers.set(
            "Content-Type",
            message.headers.get("Content-Type").unwrap_or("text/plain"),
        );
        canonical_headers.set("MIME-Version", "1.0");
        let canonical =
            Part::new(canonical_headers, message.body.clone()).to_bytes();

        let scratch = self.scratch()?;
        let plain = scratch.path().join("plain");
        let signed = scratch.path().join("signed");
        let enveloped = scratch.path().join("enveloped");
        fs::write(&plain, canonical)?;

        let cert_der = self.key.certificate_der()?;
        let key_der = self.key.private_key_der()?;
        match self.primitive.sign(&cert_der, &key_der, &plain, &signed) {
            STATUS_OK => (),
            code => return Err(Error::CmsStatus(code)),
        }
        match self.primitive.encrypt(&cert_der, &signed, &enveloped) {
            STATUS_OK => (),
            code => return Err(Error::CmsStatus(code)),
        }

        let envelope = fs::read(&enveloped)?;
        let payload = strip_header_block(&envelope).to_vec();

        let mut headers = message.headers.clone();
        for name in &[
            "Content-Type",
            "Content-Disposition",
            "Content-Transfer-Encoding",
            "MIME-Version",
        ] {
            headers.remove(name);
        }
        headers.set("MIME-Version", "1.0");
        headers.set("Content-Type", CT_SMIME_ENVELOPED);
        headers.set("Content-Disposition", CD_SMIME_ATTACHMENT);
        headers.set("Content-Transfer-Encoding", "base64");
        headers.set(E3_ENCRYPTED, self.email.clone());

        let mut encrypted = Message::new(headers, Body::Single(payload));
        encrypted.flags = message.flags.clone();
        encrypted.set_flag(Flag::E3, true);
        encrypted.internal_date = Utc::now();
        info!("S/MIME encrypted '{}'", message.subject());
        Ok(encrypted)
    }

    fn decrypt(
        &self,
        message: &Message,
        _identity: &IdentityContext,
    ) -> Result<Message, Error> {
        if !message.headers.mime_type().contains("pkcs") {
            return Err(Error::UnsupportedInput("not an S/MIME message"));
        }

        let payload = match message.body {
            Body::Single(ref data) => data,
            Body::Multipart { .. } => {
                return Err(Error::MalformedMessage(
                    "S/MIME envelope is multipart",
                ))
            }
        };
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::MalformedMessage("S/MIME envelope is empty"));
        }

        let mut envelope_headers = Headers::new();
        for name in &[
            "MIME-Version",
            "Content-Disposition",
            "Content-Type",
            "Content-Transfer-Encoding",
        ] {
            if let Some(value) = message.headers.get(name) {
                envelope_headers.set(name, value);
            }
        }
        let envelope =
            Part::new(envelope_headers, Body::Single(payload.clone()));

        let scratch = self.scratch()?;
        let enveloped = scratch.path().join("enveloped");
        let plain = scratch.path().join("plain");
        fs::write(&enveloped, envelope.to_bytes())?;

        let cert_der = self.key.certificate_der()?;
        let key_der = self.key.private_key_der()?;
        match self
            .primitive
            .decrypt(&cert_der, &key_der, &enveloped, &plain)
        {
            STATUS_OK => (),
            code => {
                warn!(
                    "S/MIME decryption of '{}' failed with status {}",
                    message.subject(),
                    code
                );
                return Err(Error::CmsStatus(code));
            }
        }

        let entity = Part::parse(&fs::read(&plain)?)?;

        let mut headers = message.headers.clone();
        for name in &[
            "Content-Type",
            "Content-Disposition",
            "Content-Transfer-Encoding",
            "MIME-Version",
            E3_ENCRYPTED,
        ] {
            headers.remove(name);
        }
        for (name, value) in entity.headers.iter() {
            headers.set(name, value);
        }

        let mut decrypted = Message::new(headers, entity.body);
        decrypted.flags = message.flags.clone();
        decrypted.set_flag(Flag::E3, false);
        decrypted.internal_date = message.internal_date;
        Ok(decrypted)
    }
}
