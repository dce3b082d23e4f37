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

//! Implementation for the per-account key store.
//!
//! Each account has exactly one key store file, `<uuid>_e3_pkcs12_store.pfx`,
//! in the data directory. The file is a CBOR map from key alias to a PKCS#12
//! container holding that key and its certificate chain, each container
//! protected by the key password.
//!
//! The map as a whole is covered by an HMAC-SHA256 tag keyed by a salted
//! hash of the store password, so that opening the store with the wrong
//! password is detected up front rather than surfacing later as a missing or
//! corrupt entry.
//!
//! The whole file is rewritten atomically on every `store()`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use openssl::{
    hash::{Hasher, MessageDigest},
    pkey::PKey,
    sign::Signer,
};
use rand::{rngs::OsRng, RngCore};
use secstr::SecStr;
use serde::{Deserialize, Serialize};

use crate::{
    crypt::key_material::KeyMaterial,
    support::{
        error::Error,
        file_ops::{self, IgnoreKinds},
        log_prefix::LogPrefix,
        safe_name::is_safe_name,
    },
};

const MAX_STORE_FILE_SIZE: u64 = 4 * 1024 * 1024;
const SALT_LEN: usize = 16;

#[derive(Deserialize, Serialize)]
struct StoreFile {
    #[serde(with = "serde_bytes")]
    salt: Vec<u8>,
    entries: BTreeMap<String, serde_bytes::ByteBuf>,
    #[serde(with = "serde_bytes")]
    tag: Vec<u8>,
}

pub fn store_file_name(account_uuid: &str) -> String {
    format!("{}_e3_pkcs12_store.pfx", account_uuid)
}

/// Maintains one account's key store.
///
/// Entries are held in their encrypted PKCS#12 form; decoded key material is
/// cached per alias once it has been opened with the right password.
pub struct KeyStore {
    log_prefix: LogPrefix,
    path: PathBuf,
    tmp: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
    cache: HashMap<String, Arc<KeyMaterial>>,
}

impl KeyStore {
    /// Prepare the key store for `account_uuid` under `data_dir`.
    ///
    /// This creates the data directory if needed but does not read the
    /// store; call `load()` before anything else.
    pub fn open(
        log_prefix: LogPrefix,
        data_dir: &Path,
        tmp: PathBuf,
        account_uuid: &str,
    ) -> Result<Self, Error> {
        if !is_safe_name(account_uuid) {
            return Err(Error::UnsafeName);
        }

        fs::DirBuilder::new()
            .mode(0o750)
            .recursive(true)
            .create(data_dir)
            .ignore_already_exists()?;

        Ok(KeyStore {
            log_prefix,
            path: data_dir.join(store_file_name(account_uuid)),
            tmp,
            entries: BTreeMap::new(),
            cache: HashMap::new(),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Load the store from disk, replacing anything in memory.
    ///
    /// A store that does not exist yet loads as empty.
    pub fn load(&mut self, password: &SecStr) -> Result<(), Error> {
        self.entries.clear();
        self.cache.clear();

        let data = file_ops::slurp(&self.path, MAX_STORE_FILE_SIZE)
            .ignore_not_found()?;
        if data.is_empty() {
            info!("{} No key store yet, starting empty", self.log_prefix);
            return Ok(());
        }

        let file: StoreFile =
            serde_cbor::from_slice(&data).map_err(|_| Error::BadKeyStore)?;
        let expected = integrity_tag(&file.salt, password, &file.entries)?;
        if expected.len() != file.tag.len()
            || !openssl::memcmp::eq(&expected, &file.tag)
        {
            warn!(
                "{} Key store integrity check failed; wrong password?",
                self.log_prefix
            );
            return Err(Error::BadKeyStorePassword);
        }

        for (alias, der) in file.entries {
            if !is_safe_name(&alias) {
                return Err(Error::BadKeyStore);
            }
            self.entries.insert(alias, der.into_vec());
        }

        info!(
            "{} Loaded key store with {} entries",
            self.log_prefix,
            self.entries.len()
        );
        Ok(())
    }

    /// Add or replace the entry for the key material's alias.
    pub fn set_key_entry(
        &mut self,
        material: Arc<KeyMaterial>,
    ) -> Result<(), Error> {
        let alias = material.alias().to_owned();
        if !is_safe_name(&alias) {
            return Err(Error::UnsafeName);
        }

        let der = material.to_pkcs12()?;
        self.entries.insert(alias.clone(), der);
        self.cache.insert(alias, material);
        Ok(())
    }

    /// Open the entry for `alias` with `password`.
    pub fn get_entry(
        &mut self,
        alias: &str,
        password: &SecStr,
    ) -> Result<Arc<KeyMaterial>, Error> {
        if !is_safe_name(alias) {
            return Err(Error::UnsafeName);
        }

        if let Some(material) = self.cache.get(alias) {
            if material.password() == password {
                return Ok(Arc::clone(material));
            }
            return Err(Error::BadKeyStorePassword);
        }

        let der = self.entries.get(alias).ok_or(Error::NamedKeyNotFound)?;
        let material = Arc::new(KeyMaterial::from_pkcs12(
            alias.to_owned(),
            der,
            password.clone(),
        )?);
        self.cache.insert(alias.to_owned(), Arc::clone(&material));
        Ok(material)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(|k| &**k)
    }

    /// Remove the entry for `alias`, returning whether it existed.
    pub fn delete_entry(&mut self, alias: &str) -> bool {
        self.cache.remove(alias);
        self.entries.remove(alias).is_some()
    }

    /// Atomically write the store to disk under `password`.
    pub fn store(&self, password: &SecStr) -> Result<(), Error> {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let entries = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_bytes::ByteBuf::from(v.clone())))
            .collect::<BTreeMap<_, _>>();
        let tag = integrity_tag(&salt, password, &entries)?;
        let data = serde_cbor::to_vec(&StoreFile { salt, entries, tag })?;

        fs::DirBuilder::new()
            .mode(0o700)
            .recursive(true)
            .create(&self.tmp)
            .ignore_already_exists()?;
        file_ops::spit(&self.tmp, &self.path, true, 0o600, &data)?;
        info!(
            "{} Saved key store with {} entries",
            self.log_prefix,
            self.entries.len()
        );
        Ok(())
    }
}

fn integrity_tag(
    salt: &[u8],
    password: &SecStr,
    entries: &BTreeMap<String, serde_bytes::ByteBuf>,
) -> Result<Vec<u8>, Error> {
    let mut hasher = Hasher::new(MessageDigest::sha256())?;
    hasher.update(salt)?;
    hasher.update(password.unsecure())?;
    let key = PKey::hmac(&hasher.finish()?)?;

    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(&serde_cbor::to_vec(entries)?)?;
    Ok(signer.sign_to_vec()?)
}
