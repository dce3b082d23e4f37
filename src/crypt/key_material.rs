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

//! The in-memory form of an account's E3 key.

use std::fmt;

use openssl::{
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    stack::Stack,
    x509::X509,
};
use secstr::SecStr;

use crate::support::error::Error;

/// A private key together with its certificate chain and the password
/// protecting its exported forms.
///
/// The digest of the public key is computed once at construction; it is the
/// fingerprint users compare across devices.
pub struct KeyMaterial {
    alias: String,
    private_key: PKey<Private>,
    /// Leaf certificate first.
    chain: Vec<X509>,
    password: SecStr,
    digest: String,
}

impl KeyMaterial {
    pub fn new(
        alias: String,
        private_key: PKey<Private>,
        chain: Vec<X509>,
        password: SecStr,
    ) -> Result<Self, Error> {
        if chain.is_empty() {
            return Err(Error::EmptyPkcs12);
        }

        let digest = public_key_digest(&private_key)?;
        Ok(KeyMaterial {
            alias,
            private_key,
            chain,
            password,
            digest,
        })
    }

    /// Load key material from a PKCS#12 container.
    ///
    /// The container's first key and certificate are used. A container that
    /// cannot be opened is reported as a password failure, since that is by
    /// far the most common cause.
    pub fn from_pkcs12(
        alias: String,
        der: &[u8],
        password: SecStr,
    ) -> Result<Self, Error> {
        let pkcs12 = Pkcs12::from_der(der)?;
        let parsed = pkcs12
            .parse(password_str(&password)?)
            .map_err(|_| Error::BadKeyStorePassword)?;

        let mut chain = vec![parsed.cert];
        if let Some(ca) = parsed.chain {
            chain.extend(ca.into_iter());
        }

        KeyMaterial::new(alias, parsed.pkey, chain, password)
    }

    /// Export as a PKCS#12 container protected by the key password.
    pub fn to_pkcs12(&self) -> Result<Vec<u8>, Error> {
        let mut builder = Pkcs12::builder();
        if self.chain.len() > 1 {
            let mut ca = Stack::new()?;
            for cert in &self.chain[1..] {
                ca.push(cert.clone())?;
            }
            builder.ca(ca);
        }

        let pkcs12 = builder.build(
            password_str(&self.password)?,
            &self.alias,
            &self.private_key,
            &self.chain[0],
        )?;
        Ok(pkcs12.to_der()?)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn certificate(&self) -> &X509 {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn password(&self) -> &SecStr {
        &self.password
    }

    /// base64(SHA-256(DER public key))
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The raw SHA-256 digest, for deriving verification phrases.
    pub fn digest_bytes(&self) -> Vec<u8> {
        base64::decode(&self.digest).unwrap_or_default()
    }

    pub fn certificate_der(&self) -> Result<Vec<u8>, Error> {
        Ok(self.chain[0].to_der()?)
    }

    pub fn private_key_der(&self) -> Result<Vec<u8>, Error> {
        Ok(self.private_key.private_key_to_der()?)
    }

    pub fn public_key_pem(&self) -> Result<Vec<u8>, Error> {
        Ok(self.private_key.public_key_to_pem()?)
    }

    /// Upper-case hex SHA-256 fingerprint of the leaf certificate.
    pub fn certificate_fingerprint(&self) -> Result<String, Error> {
        let digest = self.chain[0].digest(openssl::hash::MessageDigest::sha256())?;
        Ok(digest.iter().map(|b| format!("{:02X}", b)).collect())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("alias", &self.alias)
            .field("digest", &self.digest)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

fn public_key_digest(key: &PKey<Private>) -> Result<String, Error> {
    let der = key.public_key_to_der()?;
    Ok(base64::encode(&openssl::sha::sha256(&der)))
}

fn password_str(password: &SecStr) -> Result<&str, Error> {
    std::str::from_utf8(password.unsecure())
        .map_err(|_| Error::BadKeyStorePassword)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypt::keygen;

    #[test]
    fn pkcs12_round_trip_keeps_digest() {
        let material = keygen::generate(
            "alias".to_owned(),
            "alice@example.com",
            SecStr::from("secret"),
            1024,
        )
        .unwrap();
        assert_eq!(32, material.digest_bytes().len());

        let der = material.to_pkcs12().unwrap();
        let loaded = KeyMaterial::from_pkcs12(
            "other".to_owned(),
            &der,
            SecStr::from("secret"),
        )
        .unwrap();
        assert_eq!("other", loaded.alias());
        assert_eq!(material.digest(), loaded.digest());
        assert_eq!(
            material.certificate_der().unwrap(),
            loaded.certificate_der().unwrap()
        );

        assert_matches!(
            Err(Error::BadKeyStorePassword),
            KeyMaterial::from_pkcs12(
                "other".to_owned(),
                &der,
                SecStr::from("wrong")
            )
        );
    }

    #[test]
    fn distinct_keys_have_distinct_digests() {
        let a = keygen::generate(
            "a".to_owned(),
            "a@example.com",
            SecStr::from("pw"),
            1024,
        )
        .unwrap();
        let b = keygen::generate(
            "b".to_owned(),
            "a@example.com",
            SecStr::from("pw"),
            1024,
        )
        .unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_eq!(64, a.certificate_fingerprint().unwrap().len());
        assert!(String::from_utf8(a.public_key_pem().unwrap())
            .unwrap()
            .starts_with("-----BEGIN PUBLIC KEY-----"));
    }
}
