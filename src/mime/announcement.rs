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

//! Key announcement and key management messages.
//!
//! Devices sharing an account publish their keys to each other through
//! messages carrying `X-E3-*` headers. This module holds the formatting rules
//! for those headers and the predicates deciding which such messages deserve
//! attention.

use std::time::Duration;

use chrono::prelude::*;

use super::header::*;
use super::message::Message;
use crate::support::error::Error;

const FOLD_WIDTH: usize = 76;
const FOLD_SEPARATOR: &str = "\r\n ";

/// Fold base64 key data so it can be carried in a header.
pub fn fold_base64(data: &str) -> String {
    data.as_bytes()
        .chunks(FOLD_WIDTH)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(FOLD_SEPARATOR)
}

/// Undo `fold_base64`, also discarding any other whitespace.
pub fn unfold_base64(data: &str) -> String {
    data.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Format a hex string in space-separated groups of four for display.
pub fn beautify_hex(hex: &str) -> String {
    hex.as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the string that `X-E3-SIGNATURE` signs.
///
/// This is the concatenation of the values of every `X-E3-*` header except
/// the signature itself, ordered by upper-cased header name.
pub fn signed_header_data(message: &Message) -> String {
    let mut names: Vec<String> = message
        .headers
        .names()
        .into_iter()
        .map(|n| n.to_ascii_uppercase())
        .filter(|n| n.starts_with(E3_PREFIX) && n != E3_SIGNATURE)
        .collect();
    names.sort();
    names.dedup();

    let mut data = String::new();
    for name in &names {
        for value in message.headers.get_all(name) {
            data.push_str(value);
        }
    }
    data
}

/// The base64 keys listed in `X-E3-KEYS`, unfolded.
pub fn announced_keys(message: &Message) -> Vec<Vec<u8>> {
    message
        .headers
        .get_all(E3_KEYS)
        .flat_map(|v| v.split(','))
        .map(unfold_base64)
        .filter(|k| !k.is_empty())
        .filter_map(|k| base64::decode(&k).ok())
        .collect()
}

/// The key digests a delete request asks to remove.
pub fn delete_request_ids(message: &Message) -> Vec<String> {
    message
        .headers
        .get_all(E3_DELETE)
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect()
}

/// The announcement's timestamp, in milliseconds since the UNIX epoch.
pub fn announcement_time(message: &Message) -> Result<DateTime<Utc>, Error> {
    let millis = message
        .headers
        .get(E3_TIMESTAMP)
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or(Error::MalformedMessage("missing or bad X-E3-TIMESTAMP"))?;
    Ok(Utc.timestamp_millis(millis))
}

/// Whether the message is a key announcement from some device.
pub fn is_key_announcement(message: &Message) -> bool {
    [E3_VERIFICATION, E3_NAME, E3_TIMESTAMP, E3_UID]
        .iter()
        .all(|h| message.headers.contains(h))
}

/// Whether the message is a signed request to delete keys.
pub fn is_delete_request(message: &Message) -> bool {
    is_key_announcement(message)
        && message.headers.contains(E3_DELETE)
        && message.headers.contains(E3_SIGNATURE)
}

/// Whether the announcement was made by a device other than
/// `own_device_uid`.
pub fn is_foreign_device(message: &Message, own_device_uid: &str) -> bool {
    message
        .headers
        .get(E3_UID)
        .map_or(false, |uid| uid != own_device_uid)
}

/// Whether the announcement is recent enough to act on.
///
/// It must be no older than `window` and no further in the future than
/// `skew`.
pub fn is_fresh(
    message: &Message,
    now: DateTime<Utc>,
    window: Duration,
    skew: Duration,
) -> bool {
    let at = match announcement_time(message) {
        Ok(at) => at,
        Err(_) => return false,
    };

    let window = chrono::Duration::from_std(window)
        .unwrap_or_else(|_| chrono::Duration::max_value());
    let skew = chrono::Duration::from_std(skew)
        .unwrap_or_else(|_| chrono::Duration::zero());

    at <= now + skew && now - at <= window
}

#[cfg(test)]
mod test {
    use super::super::message::{Body, Headers};
    use super::*;

    fn announcement(ts: i64, uid: &str) -> Message {
        let mut headers = Headers::new();
        headers.set(E3_VERIFICATION, "tiger aftermath wayside");
        headers.set(E3_NAME, "e3-alice@example.com");
        headers.set(E3_TIMESTAMP, ts.to_string());
        headers.set(E3_UID, uid);
        Message::new(headers, Body::Single(Vec::new()))
    }

    #[test]
    fn folding() {
        let data = "A".repeat(200);
        let folded = fold_base64(&data);
        let lines: Vec<&str> = folded.split("\r\n").collect();
        assert_eq!(3, lines.len());
        assert_eq!(76, lines[0].len());
        assert_eq!(" ", &lines[1][..1]);
        assert_eq!(data, unfold_base64(&folded));
        assert_eq!("", fold_base64(""));
    }

    #[test]
    fn hex_beautification() {
        assert_eq!("0123 4567 89ab", beautify_hex("0123456789ab"));
        assert_eq!("0123 45", beautify_hex("012345"));
    }

    #[test]
    fn signed_data_ordering() {
        let mut message = announcement(1000, "dev-1");
        message.headers.set(E3_SIGNATURE, "sig");
        message.headers.add("x-e3-digest", "D");

        // DIGEST < NAME < TIMESTAMP < UID < VERIFICATION
        assert_eq!(
            "De3-alice@example.com1000dev-1tiger aftermath wayside",
            signed_header_data(&message)
        );
    }

    #[test]
    fn key_and_delete_lists() {
        let mut message = announcement(1000, "dev-1");
        let key = base64::encode(vec![7u8; 100]);
        message.headers.set(
            E3_KEYS,
            format!("{},{}", fold_base64(&key), base64::encode(b"k2")),
        );
        message.headers.set(E3_DELETE, "abc, def,");

        assert_eq!(
            vec![vec![7u8; 100], b"k2".to_vec()],
            announced_keys(&message)
        );
        assert_eq!(
            vec!["abc".to_owned(), "def".to_owned()],
            delete_request_ids(&message)
        );
        assert!(!is_delete_request(&message));
        message.headers.set(E3_SIGNATURE, "sig");
        assert!(is_delete_request(&message));
    }

    #[test]
    fn predicates() {
        let now = Utc.timestamp_millis(1_000_000);
        let window = Duration::from_secs(120);
        let skew = Duration::from_secs(60);

        let message = announcement(1_000_000 - 119_000, "dev-2");
        assert!(is_key_announcement(&message));
        assert!(is_foreign_device(&message, "dev-1"));
        assert!(!is_foreign_device(&message, "dev-2"));
        assert!(is_fresh(&message, now, window, skew));

        let stale = announcement(1_000_000 - 121_000, "dev-2");
        assert!(!is_fresh(&stale, now, window, skew));

        let future = announcement(1_000_000 + 59_000, "dev-2");
        assert!(is_fresh(&future, now, window, skew));
        let far_future = announcement(1_000_000 + 61_000, "dev-2");
        assert!(!is_fresh(&far_future, now, window, skew));

        let mut incomplete = announcement(1_000_000, "dev-2");
        incomplete.headers.remove(E3_UID);
        assert!(!is_key_announcement(&incomplete));
        assert!(!is_foreign_device(&incomplete, "dev-1"));

        incomplete.headers.set(E3_TIMESTAMP, "yesterday");
        assert!(!is_fresh(&incomplete, now, window, skew));
    }
}
