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

//! Names and values of the header fields and content types E3 relies on.
//!
//! All E3 headers share the `X-E3-` prefix. These are visible on the wire and
//! must be reproduced exactly.

use super::message::{Headers, Message};

pub const E3_PREFIX: &str = "X-E3-";
/// Marks an E3-encrypted message; the value is the owner's address.
pub const E3_ENCRYPTED: &str = "X-E3-ENCRYPTED";
pub const E3_DIGEST: &str = "X-E3-DIGEST";
pub const E3_NAME: &str = "X-E3-NAME";
pub const E3_VERIFICATION: &str = "X-E3-VERIFICATION";
pub const E3_TIMESTAMP: &str = "X-E3-TIMESTAMP";
/// Identifies the device which produced a key announcement. Only used to
/// filter out a device's own announcements, never for trust decisions.
pub const E3_UID: &str = "X-E3-UID";
pub const E3_RESPONSE_TO: &str = "X-E3-RESPONSE-TO";
pub const E3_KEYS: &str = "X-E3-KEYS";
pub const E3_DELETE: &str = "X-E3-DELETE";
pub const E3_SIGNATURE: &str = "X-E3-SIGNATURE";

pub const CT_PGP_KEYS: &str = "application/pgp-keys";
pub const CT_PKCS12: &str = "application/x-pkcs12";
pub const CT_PEM: &str = "application/x-pem-file";
pub const CT_X509: &str = "application/x-x509-ca-cert";

pub const CT_SMIME_ENVELOPED: &str =
    "application/pkcs7-mime; name=\"smime.p7m\"; smime-type=enveloped-data";
pub const CD_SMIME_ATTACHMENT: &str = "attachment; filename=\"smime.p7m\"";

pub const CT_PGP_ENCRYPTED: &str = "application/pgp-encrypted";
pub const CT_PGP_PAYLOAD: &str =
    "application/octet-stream; name=\"encrypted.asc\"";
pub const CD_PGP_PAYLOAD: &str = "inline; filename=\"encrypted.asc\"";

/// Whether the message carries the E3-encrypted marker header.
pub fn is_e3_encrypted(message: &Message) -> bool {
    message.headers.contains(E3_ENCRYPTED)
}

/// Whether the content type looks like an S/MIME payload.
///
/// Clients disagree on the exact spelling, so this matches loosely.
pub fn is_smime(headers: &Headers) -> bool {
    headers
        .get("Content-Type")
        .map(|ct| ct.to_ascii_lowercase())
        .map_or(false, |ct| {
            ct.contains("pkcs7-mime")
                || ct.contains("smime")
                || ct.contains("p7m")
        })
}

/// Whether the content type is one of those used for key backup
/// attachments.
pub fn is_key_attachment_type(mime_type: &str) -> bool {
    let mime_type = mime_type.to_ascii_lowercase();
    mime_type.contains("x-pkcs12")
        || mime_type.contains("x-pem-file")
        || mime_type.contains("x-x509-ca-cert")
}
