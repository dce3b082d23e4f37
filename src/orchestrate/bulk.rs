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

//! Transforming every eligible message in a folder.

use log::{info, warn};

use super::replace::{replace_message, Replacement};
use crate::account::model::Flag;
use crate::account::session::AccountSession;
use crate::crypt::transform::{CryptoTransform, Direction};
use crate::mime::header::is_e3_encrypted;
use crate::mime::message::Message;
use crate::support::error::Error;

/// How many messages are loaded from the local cache at a time.
pub const BATCH_SIZE: usize = 20;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Subjects of the messages which were replaced, in processing order.
    pub processed: Vec<String>,
    /// Messages left alone, whether filtered out, already in the target
    /// state, or failed.
    pub skipped: usize,
}

/// Whether `message` still needs transforming in `direction`.
pub fn needs_transform(message: &Message, direction: Direction) -> bool {
    if message.has_flag(&Flag::Deleted)
        || message.has_flag(&Flag::E3Done)
        || message.has_flag(&Flag::E3Key)
    {
        return false;
    }

    let encrypted = is_e3_encrypted(message) || message.has_flag(&Flag::E3);
    encrypted != direction.is_encrypt()
}

/// Run `replace_message` over each message in `folder` which needs
/// transforming and which `predicate` accepts.
///
/// Every replacement is flushed on its own. A message whose transform fails
/// is counted as skipped. Storage errors and an unavailable account stop the
/// run; since replaced messages no longer need transforming, running again
/// picks up where this left off.
pub fn process_folder(
    session: &mut AccountSession,
    transform: &dyn CryptoTransform,
    direction: Direction,
    folder: &str,
    predicate: &dyn Fn(&Message) -> bool,
) -> Result<BulkReport, Error> {
    session
        .log_prefix
        .set_operation(Some(format!("{} {}", direction, folder)));
    let result = process_batches(session, transform, direction, folder, predicate);
    session.log_prefix.set_operation(None);
    result
}

fn process_batches(
    session: &mut AccountSession,
    transform: &dyn CryptoTransform,
    direction: Direction,
    folder: &str,
    predicate: &dyn Fn(&Message) -> bool,
) -> Result<BulkReport, Error> {
    let mut report = BulkReport::default();
    let uids = session.local.list_uids(folder)?;
    info!(
        "{} Considering {} messages with {}",
        session.log_prefix,
        uids.len(),
        transform.name()
    );

    for batch_uids in uids.chunks(BATCH_SIZE) {
        let mut batch = Vec::with_capacity(batch_uids.len());
        for uid in batch_uids {
            if let Some(message) = session.local.get_message(folder, uid)? {
                batch.push(message);
            }
        }

        for message in batch {
            if !needs_transform(&message, direction) || !predicate(&message) {
                report.skipped += 1;
                continue;
            }

            match replace_message(
                session, transform, direction, folder, &message,
            ) {
                Ok(Replacement::Replaced { subject, .. }) => {
                    report.processed.push(subject);
                }
                Ok(Replacement::PassedThrough(_)) => report.skipped += 1,
                Err(e) if e.is_crypto_failure() => {
                    warn!(
                        "{} Skipping {}/{}: {}",
                        session.log_prefix, folder, message.uid, e
                    );
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(
        "{} Processed {}, skipped {}",
        session.log_prefix,
        report.processed.len(),
        report.skipped
    );
    Ok(report)
}
