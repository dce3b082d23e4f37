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

//! Generation of new E3 key pairs.

use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, PKeyRef, Private},
    rsa::Rsa,
    x509::{X509Builder, X509NameBuilder, X509},
};
use secstr::SecStr;

use super::key_material::KeyMaterial;
use crate::support::error::Error;

pub const RSA_BITS: u32 = 2048;
// 100 years
const VALIDITY_DAYS: u32 = 36525;
const SERIAL_BITS: i32 = 64;

/// Generate a new key pair with a self-signed certificate for `email`.
///
/// `bits` is `RSA_BITS` in real use; tests pass something smaller to keep
/// things fast.
pub fn generate(
    alias: String,
    email: &str,
    password: SecStr,
    bits: u32,
) -> Result<KeyMaterial, Error> {
    let private_key = PKey::from_rsa(Rsa::generate(bits)?)?;
    let certificate = self_signed_certificate(&private_key, email)?;
    KeyMaterial::new(alias, private_key, vec![certificate], password)
}

/// Build a self-signed X.509 v3 certificate whose subject and issuer are both
/// `CN=<email>`.
fn self_signed_certificate(
    key: &PKeyRef<Private>,
    email: &str,
) -> Result<X509, Error> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", email)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*serial.to_asn1_integer()?)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
    builder.sign(key, MessageDigest::sha256())?;

    Ok(builder.build())
}
