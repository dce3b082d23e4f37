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

use std::fmt;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included in at the start of every log statement.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    component: String,
    account: Option<String>,
    operation: Option<String>,
}

impl LogPrefix {
    pub fn new(component: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                component,
                account: None,
                operation: None,
            })),
        }
    }

    pub fn deep_clone(&self) -> Self {
        let inner = self.inner.lock().unwrap();
        Self {
            inner: Arc::new(Mutex::new(Inner::clone(&inner))),
        }
    }

    pub fn set_account(&self, account: String) {
        self.inner.lock().unwrap().account = Some(sanitise(account));
    }

    pub fn set_operation(&self, operation: Option<String>) {
        self.inner.lock().unwrap().operation = operation.map(sanitise);
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.component)?;
        match (&inner.account, &inner.operation) {
            (None, None) => Ok(()),
            (Some(account), None) => write!(f, "[{}]", account),
            (None, Some(op)) => write!(f, "[{}]", op),
            (Some(account), Some(op)) => write!(f, "[{} {}]", account, op),
        }
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting() {
        let prefix = LogPrefix::new("e3".to_owned());
        assert_eq!("e3", prefix.to_string());

        prefix.set_account("alice@example.com\r\n".to_owned());
        assert_eq!("e3[alice@example.com]", prefix.to_string());

        let op = prefix.deep_clone();
        op.set_operation(Some("flush".to_owned()));
        assert_eq!("e3[alice@example.com flush]", op.to_string());
        assert_eq!("e3[alice@example.com]", prefix.to_string());

        let shared = prefix.clone();
        shared.set_operation(Some("x".repeat(100)));
        assert_eq!(
            format!("e3[alice@example.com {}]", "x".repeat(64)),
            prefix.to_string()
        );
    }
}
