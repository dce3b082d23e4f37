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

//! In-memory stores for tests, with failure injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::prelude::*;

use super::*;
use crate::account::model::{Flag, LOCAL_UID_PREFIX};
use crate::mime::message::{Body, Headers, Part};

/// The kind of failure to inject into the next call of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    Transient,
    Permanent,
    Unavailable,
}

impl Failure {
    fn to_error(self, op: &str) -> Error {
        match self {
            Failure::Transient => {
                Error::RemoteTransient(format!("{} timed out", op))
            }
            Failure::Permanent => {
                Error::RemotePermanent(format!("{} rejected", op))
            }
            Failure::Unavailable => Error::AccountUnavailable,
        }
    }
}

#[derive(Default)]
struct RemoteFolder {
    messages: BTreeMap<u64, Message>,
    next_uid: u64,
    read_only: bool,
    unsupported_flags: Vec<Flag>,
}

#[derive(Default)]
struct RemoteState {
    folders: BTreeMap<String, RemoteFolder>,
    ops: Vec<String>,
    failures: HashMap<&'static str, VecDeque<Option<Failure>>>,
}

/// A fake remote store. Clones share state, so a test can keep one while
/// the session owns another.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, folder: &str) {
        let mut state = self.inner.lock().unwrap();
        state.folders.entry(folder.to_owned()).or_insert_with(|| {
            RemoteFolder {
                next_uid: 100,
                ..RemoteFolder::default()
            }
        });
    }

    pub fn set_read_only(&self, folder: &str) {
        self.add_folder(folder);
        self.inner
            .lock()
            .unwrap()
            .folders
            .get_mut(folder)
            .unwrap()
            .read_only = true;
    }

    pub fn set_unsupported_flag(&self, folder: &str, flag: Flag) {
        self.add_folder(folder);
        self.inner
            .lock()
            .unwrap()
            .folders
            .get_mut(folder)
            .unwrap()
            .unsupported_flags
            .push(flag);
    }

    /// Place a message directly on the server, returning its UID.
    pub fn inject(&self, folder: &str, mut message: Message) -> String {
        self.add_folder(folder);
        let mut state = self.inner.lock().unwrap();
        let f = state.folders.get_mut(folder).unwrap();
        let uid = f.next_uid;
        f.next_uid += 1;
        message.uid = uid.to_string();
        f.messages.insert(uid, message);
        uid.to_string()
    }

    pub fn fail_next(&self, op: &'static str, failure: Failure) {
        self.fail_nth(op, 0, failure);
    }

    /// Make the call to `op` after the next `skip` calls fail.
    pub fn fail_nth(&self, op: &'static str, skip: usize, failure: Failure) {
        let mut state = self.inner.lock().unwrap();
        let queue = state.failures.entry(op).or_default();
        queue.extend((0..skip).map(|_| None));
        queue.push_back(Some(failure));
    }

    /// Every mutating operation performed so far, in order.
    pub fn ops(&self) -> Vec<String> {
        self.inner.lock().unwrap().ops.clone()
    }

    pub fn messages(&self, folder: &str) -> Vec<Message> {
        self.inner
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .map(|f| f.messages.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self, op: &'static str) -> Result<(), Error> {
        let mut state = self.inner.lock().unwrap();
        match state.failures.get_mut(op).and_then(|q| q.pop_front()).flatten() {
            Some(failure) => Err(failure.to_error(op)),
            None => Ok(()),
        }
    }

    fn record(&self, op: String) {
        self.inner.lock().unwrap().ops.push(op);
    }

    fn with_folder<R>(
        &self,
        folder: &str,
        f: impl FnOnce(&mut RemoteFolder) -> R,
    ) -> Result<R, Error> {
        let mut state = self.inner.lock().unwrap();
        match state.folders.get_mut(folder) {
            Some(folder) => Ok(f(folder)),
            None => Err(Error::RemotePermanent(format!(
                "no such folder {}",
                folder
            ))),
        }
    }

    fn take_messages(
        &self,
        folder: &str,
        uids: &[String],
    ) -> Result<Vec<(String, Message)>, Error> {
        self.with_folder(folder, |f| {
            uids.iter()
                .filter_map(|u| u.parse::<u64>().ok())
                .filter_map(|u| f.messages.remove(&u).map(|m| (u.to_string(), m)))
                .collect()
        })
    }

    fn put_messages(
        &self,
        folder: &str,
        messages: Vec<(String, Message)>,
    ) -> Result<HashMap<String, String>, Error> {
        self.with_folder(folder, |f| {
            let mut map = HashMap::new();
            for (old_uid, mut message) in messages {
                let uid = f.next_uid;
                f.next_uid += 1;
                message.uid = uid.to_string();
                f.messages.insert(uid, message);
                map.insert(old_uid, uid.to_string());
            }
            map
        })
    }
}

impl RemoteStore for MemoryRemote {
    fn folder_exists(&mut self, folder: &str) -> Result<bool, Error> {
        self.check("folder_exists")?;
        Ok(self.inner.lock().unwrap().folders.contains_key(folder))
    }

    fn create_folder(&mut self, folder: &str) -> Result<bool, Error> {
        self.check("create_folder")?;
        self.record(format!("create_folder {}", folder));
        let existed = self.inner.lock().unwrap().folders.contains_key(folder);
        self.add_folder(folder);
        Ok(!existed)
    }

    fn open(&mut self, folder: &str) -> Result<OpenMode, Error> {
        self.check("open")?;
        self.with_folder(folder, |f| {
            if f.read_only {
                OpenMode::ReadOnly
            } else {
                OpenMode::ReadWrite
            }
        })
    }

    fn supports_flag(
        &mut self,
        folder: &str,
        flag: &Flag,
    ) -> Result<bool, Error> {
        self.with_folder(folder, |f| !f.unsupported_flags.contains(flag))
    }

    fn message_info(
        &mut self,
        folder: &str,
        uid: &str,
    ) -> Result<Option<RemoteMessageInfo>, Error> {
        let uid = match uid.parse::<u64>() {
            Ok(uid) => uid,
            Err(_) => return Ok(None),
        };
        self.with_folder(folder, |f| {
            f.messages.get(&uid).map(|m| RemoteMessageInfo {
                uid: uid.to_string(),
                internal_date: m.internal_date,
            })
        })
    }

    fn find_uids_by_message_id(
        &mut self,
        folder: &str,
        message_id: &str,
    ) -> Result<Vec<String>, Error> {
        self.check("find_uids_by_message_id")?;
        self.with_folder(folder, |f| {
            f.messages
                .iter()
                .filter(|&(_, m)| Some(message_id) == m.message_id())
                .map(|(uid, _)| uid.to_string())
                .collect()
        })
    }

    fn fetch(
        &mut self,
        folder: &str,
        uid: &str,
    ) -> Result<Option<Message>, Error> {
        self.check("fetch")?;
        let uid = match uid.parse::<u64>() {
            Ok(uid) => uid,
            Err(_) => return Ok(None),
        };
        self.with_folder(folder, |f| f.messages.get(&uid).cloned())
    }

    fn search_flagged(
        &mut self,
        folder: &str,
        flag: &Flag,
    ) -> Result<Vec<String>, Error> {
        self.check("search_flagged")?;
        self.with_folder(folder, |f| {
            f.messages
                .iter()
                .filter(|&(_, m)| m.has_flag(flag))
                .map(|(uid, _)| uid.to_string())
                .collect()
        })
    }

    fn append(
        &mut self,
        folder: &str,
        message: &Message,
    ) -> Result<Option<String>, Error> {
        self.check("append")?;
        self.record(format!("append {} {}", folder, message.subject()));
        let mut message = message.clone();
        message.flags.retain(|f| !f.is_local_only());
        let map = self.put_messages(folder, vec![(String::new(), message)])?;
        Ok(map.get("").cloned())
    }

    fn copy_messages(
        &mut self,
        src: &str,
        dst: &str,
        uids: &[String],
    ) -> Result<HashMap<String, String>, Error> {
        self.check("copy_messages")?;
        self.record(format!("copy {} {} {:?}", src, dst, uids));
        let copies = self.with_folder(src, |f| {
            uids.iter()
                .filter_map(|u| u.parse::<u64>().ok())
                .filter_map(|u| {
                    f.messages.get(&u).map(|m| (u.to_string(), m.clone()))
                })
                .collect::<Vec<_>>()
        })?;
        self.put_messages(dst, copies)
    }

    fn move_messages(
        &mut self,
        src: &str,
        dst: &str,
        uids: &[String],
    ) -> Result<HashMap<String, String>, Error> {
        self.check("move_messages")?;
        self.record(format!("move {} {} {:?}", src, dst, uids));
        let moved = self.take_messages(src, uids)?;
        self.put_messages(dst, moved)
    }

    fn delete_messages(
        &mut self,
        folder: &str,
        uids: &[String],
        trash: &str,
    ) -> Result<(), Error> {
        self.check("delete_messages")?;
        self.record(format!("delete {} {:?}", folder, uids));
        if folder == trash {
            self.with_folder(folder, |f| {
                for uid in uids.iter().filter_map(|u| u.parse::<u64>().ok()) {
                    if let Some(m) = f.messages.get_mut(&uid) {
                        m.set_flag(Flag::Deleted, true);
                    }
                }
            })
        } else {
            let moved = self.take_messages(folder, uids)?;
            self.add_folder(trash);
            self.put_messages(trash, moved).map(|_| ())
        }
    }

    fn set_flags(
        &mut self,
        folder: &str,
        uids: &[String],
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error> {
        self.check("set_flags")?;
        self.record(format!("set_flags {} {:?} {} {}", folder, uids, flag, state));
        self.with_folder(folder, |f| {
            for uid in uids.iter().filter_map(|u| u.parse::<u64>().ok()) {
                if let Some(m) = f.messages.get_mut(&uid) {
                    m.set_flag(flag.clone(), state);
                }
            }
        })
    }

    fn set_flag_on_all(
        &mut self,
        folder: &str,
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error> {
        self.check("set_flag_on_all")?;
        self.record(format!("set_flag_on_all {} {} {}", folder, flag, state));
        self.with_folder(folder, |f| {
            for m in f.messages.values_mut() {
                m.set_flag(flag.clone(), state);
            }
        })
    }

    fn expunge(&mut self, folder: &str) -> Result<(), Error> {
        self.check("expunge")?;
        self.record(format!("expunge {}", folder));
        self.with_folder(folder, |f| {
            f.messages.retain(|_, m| !m.has_flag(&Flag::Deleted));
        })
    }
}

#[derive(Default)]
struct LocalState {
    folders: BTreeMap<String, Vec<Message>>,
    next_local: u64,
    unreadable: Vec<(String, String)>,
}

/// A fake local message cache.
#[derive(Clone, Default)]
pub struct MemoryLocal {
    inner: Arc<Mutex<LocalState>>,
}

impl MemoryLocal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, folder: &str) -> Vec<Message> {
        self.inner
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .cloned()
            .unwrap_or_default()
    }

    /// Make reading the message at `folder`/`uid` fail from now on.
    pub fn make_unreadable(&self, folder: &str, uid: &str) {
        self.inner
            .lock()
            .unwrap()
            .unreadable
            .push((folder.to_owned(), uid.to_owned()));
    }
}

impl LocalStore for MemoryLocal {
    fn folder_exists(&self, folder: &str) -> bool {
        self.inner.lock().unwrap().folders.contains_key(folder)
    }

    fn create_folder(&mut self, folder: &str) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .folders
            .entry(folder.to_owned())
            .or_default();
        Ok(())
    }

    fn get_message(
        &self,
        folder: &str,
        uid: &str,
    ) -> Result<Option<Message>, Error> {
        let state = self.inner.lock().unwrap();
        if state.unreadable.iter().any(|(f, u)| f == folder && u == uid) {
            return Err(Error::MalformedMessage("unreadable test message"));
        }

        Ok(state
            .folders
            .get(folder)
            .and_then(|msgs| msgs.iter().find(|m| m.uid == uid).cloned()))
    }

    fn list_uids(&self, folder: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .map(|msgs| msgs.iter().map(|m| m.uid.clone()).collect())
            .unwrap_or_default())
    }

    fn store_message(
        &mut self,
        folder: &str,
        mut message: Message,
    ) -> Result<String, Error> {
        let mut state = self.inner.lock().unwrap();
        if message.uid.is_empty() {
            state.next_local += 1;
            message.uid = format!("{}{}", LOCAL_UID_PREFIX, state.next_local);
        }

        let uid = message.uid.clone();
        let msgs = state.folders.entry(folder.to_owned()).or_default();
        match msgs.iter_mut().find(|m| m.uid == uid) {
            Some(existing) => *existing = message,
            None => msgs.push(message),
        }
        Ok(uid)
    }

    fn change_uid(
        &mut self,
        folder: &str,
        old_uid: &str,
        new_uid: &str,
    ) -> Result<(), Error> {
        let mut state = self.inner.lock().unwrap();
        if let Some(m) = state
            .folders
            .get_mut(folder)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.uid == old_uid))
        {
            m.uid = new_uid.to_owned();
        }
        Ok(())
    }

    fn set_flag(
        &mut self,
        folder: &str,
        uid: &str,
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(m) = inner
            .folders
            .get_mut(folder)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.uid == uid))
        {
            m.set_flag(flag.clone(), state);
        }
        Ok(())
    }

    fn set_flag_on_all(
        &mut self,
        folder: &str,
        flag: &Flag,
        state: bool,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(msgs) = inner.folders.get_mut(folder) {
            for m in msgs {
                m.set_flag(flag.clone(), state);
            }
        }
        Ok(())
    }

    fn destroy_message(
        &mut self,
        folder: &str,
        uid: &str,
    ) -> Result<(), Error> {
        if let Some(msgs) = self.inner.lock().unwrap().folders.get_mut(folder)
        {
            msgs.retain(|m| m.uid != uid);
        }
        Ok(())
    }
}

/// Records every UID change it is told about.
#[derive(Default)]
pub struct RecordingListener {
    pub changes: Mutex<Vec<(String, String, String)>>,
}

impl MessageListener for RecordingListener {
    fn message_uid_changed(
        &self,
        _account: &str,
        folder: &str,
        old_uid: &str,
        new_uid: &str,
    ) {
        self.changes.lock().unwrap().push((
            folder.to_owned(),
            old_uid.to_owned(),
            new_uid.to_owned(),
        ));
    }
}

/// A plain multipart message suitable for encryption.
pub fn sample_message(subject: &str, message_id: &str) -> Message {
    let mut headers = Headers::new();
    headers.set("From", "alice@example.com");
    headers.set("To", "alice@example.com");
    headers.set("Subject", subject);
    headers.set("Message-ID", message_id);
    headers.set("MIME-Version", "1.0");
    let mut message = Message::new(headers, Body::Single(Vec::new()));
    message.set_multipart(
        "mixed",
        vec![
            Part::leaf("text/plain; charset=utf-8", format!("Body of {}", subject)),
            Part::leaf("text/html", format!("<p>{}</p>", subject)),
        ],
    );
    message.internal_date = Utc.ymd(2020, 6, 1).and_hms(12, 0, 0);
    message
}
