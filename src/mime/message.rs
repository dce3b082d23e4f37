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

//! A small in-memory model of MIME messages.
//!
//! This only understands as much structure as E3 needs: an ordered header
//! list and a body which is either opaque bytes or a list of boundary-delimited
//! parts (recursively). Serialisation always uses CRLF line endings and writes
//! multipart bodies in the canonical form
//!
//! ```text
//! --boundary CRLF part CRLF ... --boundary-- CRLF
//! ```
//!
//! which is also the exact byte stream handed to the CMS primitive.

use std::collections::BTreeSet;
use std::io::Write;

use chrono::prelude::*;
use lazy_static::lazy_static;
use rand::{rngs::OsRng, Rng};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;

use crate::account::model::Flag;
use crate::support::error::Error;

lazy_static! {
    static ref BOUNDARY_PARAM: Regex =
        Regex::new(r#"(?i);\s*boundary\s*=\s*(?:"([^"]*)"|([^\s;]+))"#)
            .unwrap();
    static ref HEADER_BODY_SPLIT: BytesRegex =
        BytesRegex::new(r"\r?\n\r?\n").unwrap();
}

/// An ordered, case-insensitive multimap of header fields.
///
/// Values are stored unfolded: the CRLF of a folded line is removed but the
/// whitespace which followed it is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first value of `name`, with surrounding whitespace trimmed.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.trim())
    }

    pub fn get_all<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.trim())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace all values of `name` with `value`.
    ///
    /// If the header already existed, the new value takes the position of the
    /// first old one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .fields
            .iter()
            .position(|&(ref n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(ix) => {
                self.fields[ix].1 = value;
                let mut seen_first = false;
                self.fields.retain(|&(ref n, _)| {
                    if !n.eq_ignore_ascii_case(name) {
                        true
                    } else {
                        !std::mem::replace(&mut seen_first, true)
                    }
                });
            }
            None => self.fields.push((name.to_owned(), value)),
        }
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_owned(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Distinct header names, in order of first appearance.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for &(ref n, _) in &self.fields {
            if !names.iter().any(|e| e.eq_ignore_ascii_case(n)) {
                names.push(n);
            }
        }
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|&(ref n, ref v)| (&**n, &**v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The bare MIME type of `Content-Type`, lower-cased, defaulting to
    /// `text/plain`.
    pub fn mime_type(&self) -> String {
        self.get("Content-Type")
            .and_then(|ct| ct.split(';').next())
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text/plain".to_owned())
    }

    fn parse(data: &[u8]) -> Result<Self, Error> {
        let text = String::from_utf8_lossy(data);
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                match fields.last_mut() {
                    Some(&mut (_, ref mut value)) => value.push_str(line),
                    None => {
                        return Err(Error::MalformedMessage(
                            "continuation line before first header",
                        ))
                    }
                }
                continue;
            }

            let colon = line.find(':').ok_or(Error::MalformedMessage(
                "header line without colon",
            ))?;
            let name = line[..colon].trim_end();
            if name.is_empty() {
                return Err(Error::MalformedMessage("empty header name"));
            }
            // The one space after the colon belongs to the syntax
            let value = &line[colon + 1..];
            let value = value
                .strip_prefix(' ')
                .or_else(|| value.strip_prefix('\t'))
                .unwrap_or(value);
            fields.push((name.to_owned(), value.to_owned()));
        }

        Ok(Headers { fields })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        for &(ref name, ref value) in &self.fields {
            let _ = write!(out, "{}: {}", name, value);
            out.extend_from_slice(b"\r\n");
        }
    }
}

/// The body of a message or part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Single(Vec<u8>),
    Multipart { boundary: String, parts: Vec<Part> },
}

impl Body {
    pub fn is_multipart(&self) -> bool {
        matches!(*self, Body::Multipart { .. })
    }

    pub fn parts(&self) -> &[Part] {
        match *self {
            Body::Single(_) => &[],
            Body::Multipart { ref parts, .. } => parts,
        }
    }

    fn parse(headers: &Headers, data: &[u8]) -> Result<Self, Error> {
        let boundary = if headers.mime_type().starts_with("multipart/") {
            headers.get("Content-Type").and_then(boundary_param)
        } else {
            None
        };

        match boundary {
            None => Ok(Body::Single(data.to_vec())),
            Some(boundary) => {
                let parts = split_multipart(data, &boundary)?
                    .into_iter()
                    .map(Part::parse)
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(Body::Multipart { boundary, parts })
            }
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match *self {
            Body::Single(ref data) => out.extend_from_slice(data),
            Body::Multipart {
                ref boundary,
                ref parts,
            } => {
                for part in parts {
                    let _ = write!(out, "--{}\r\n", boundary);
                    part.write_to(out);
                    out.extend_from_slice(b"\r\n");
                }
                let _ = write!(out, "--{}--\r\n", boundary);
            }
        }
    }
}

/// A single body part of a multipart entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub headers: Headers,
    pub body: Body,
}

impl Part {
    pub fn new(headers: Headers, body: Body) -> Self {
        Part { headers, body }
    }

    /// A leaf part with the given content type and raw body.
    pub fn leaf(content_type: &str, data: impl Into<Vec<u8>>) -> Self {
        let mut headers = Headers::new();
        headers.set("Content-Type", content_type);
        Part {
            headers,
            body: Body::Single(data.into()),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let (header_data, body_data) = split_header_body(data);
        let headers = Headers::parse(header_data)?;
        let body = Body::parse(&headers, body_data)?;
        Ok(Part { headers, body })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// The body after undoing a base64 transfer encoding, if any.
    ///
    /// Multipart bodies are returned in their serialised form.
    pub fn decoded_body(&self) -> Result<Vec<u8>, Error> {
        let raw = match self.body {
            Body::Single(ref data) => data.clone(),
            ref multi => {
                let mut out = Vec::new();
                multi.write_to(&mut out);
                return Ok(out);
            }
        };

        if self
            .headers
            .get("Content-Transfer-Encoding")
            .map_or(false, |cte| cte.eq_ignore_ascii_case("base64"))
        {
            decode_base64_lenient(&raw)
        } else {
            Ok(raw)
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        self.headers.write_to(out);
        out.extend_from_slice(b"\r\n");
        self.body.write_to(out);
    }
}

/// A message, as held in the local cache or on the remote store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Remote UID, local-only UID, or empty before the first store.
    pub uid: String,
    pub flags: BTreeSet<Flag>,
    pub internal_date: DateTime<Utc>,
    pub headers: Headers,
    pub body: Body,
}

impl Message {
    pub fn new(headers: Headers, body: Body) -> Self {
        Message {
            uid: String::new(),
            flags: BTreeSet::new(),
            internal_date: Utc::now(),
            headers,
            body,
        }
    }

    /// Parse a message in wire format. The UID is empty and the internal
    /// date is the current time.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let part = Part::parse(data)?;
        Ok(Message::new(part.headers, part.body))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        self.body.write_to(&mut out);
        out
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: Flag, state: bool) {
        if state {
            self.flags.insert(flag);
        } else {
            self.flags.remove(&flag);
        }
    }

    pub fn subject(&self) -> &str {
        self.headers.get("Subject").unwrap_or("")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("Message-ID")
    }

    /// Replace the body with a multipart body made of `parts`, updating
    /// `Content-Type` with a fresh boundary.
    pub fn set_multipart(&mut self, subtype_params: &str, parts: Vec<Part>) {
        let boundary = new_boundary();
        self.headers.set(
            "Content-Type",
            format!("multipart/{}; boundary=\"{}\"", subtype_params, boundary),
        );
        self.body = Body::Multipart { boundary, parts };
    }
}

pub fn new_boundary() -> String {
    format!("----e3-{:016x}", OsRng.gen::<u64>())
}

/// Extract the `boundary` parameter from a `Content-Type` value.
pub fn boundary_param(content_type: &str) -> Option<String> {
    BOUNDARY_PARAM.captures(content_type).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_owned())
            .filter(|b| !b.is_empty())
    })
}

fn split_header_body(data: &[u8]) -> (&[u8], &[u8]) {
    // A part with no headers starts directly with the blank line
    if data.starts_with(b"\r\n") {
        return (&[], &data[2..]);
    } else if data.starts_with(b"\n") {
        return (&[], &data[1..]);
    }

    match HEADER_BODY_SPLIT.find(data) {
        Some(m) => (&data[..m.start()], &data[m.end()..]),
        None => (data, &[]),
    }
}

fn split_multipart<'a>(
    data: &'a [u8],
    boundary: &str,
) -> Result<Vec<&'a [u8]>, Error> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut line_start = 0;
    let mut closed = false;

    while line_start < data.len() {
        let line_end = data[line_start..]
            .iter()
            .position(|&b| b'\n' == b)
            .map_or(data.len(), |p| line_start + p + 1);
        let line = trim_eol(&data[line_start..line_end]);

        if line.starts_with(delimiter.as_bytes()) {
            let rest = &line[delimiter.len()..];
            let is_close = rest.starts_with(b"--");
            let rest = if is_close { &rest[2..] } else { rest };
            if rest.iter().all(|&b| b' ' == b || b'\t' == b) {
                if let Some(start) = current_start.take() {
                    // The CRLF before the delimiter belongs to the delimiter
                    let end = strip_eol_before(data, start, line_start);
                    parts.push(&data[start..end]);
                }

                if is_close {
                    closed = true;
                    break;
                }
                current_start = Some(line_end);
            }
        }

        line_start = line_end;
    }

    if !closed {
        return Err(Error::MalformedMessage("unterminated multipart body"));
    }

    Ok(parts)
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn strip_eol_before(data: &[u8], start: usize, end: usize) -> usize {
    let mut end = end;
    if end > start && b'\n' == data[end - 1] {
        end -= 1;
        if end > start && b'\r' == data[end - 1] {
            end -= 1;
        }
    }
    end
}

/// Decode base64, ignoring any whitespace (including line breaks).
pub fn decode_base64_lenient(data: &[u8]) -> Result<Vec<u8>, Error> {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    base64::decode(&compact)
        .map_err(|_| Error::MalformedMessage("invalid base64 content"))
}

/// Encode `data` as base64 wrapped at 76 columns with CRLF line endings.
pub fn encode_base64_wrapped(data: &[u8]) -> Vec<u8> {
    let encoded = base64::encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 38 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out
}
