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

//! Verification of a key between two devices by reading phrases aloud.
//!
//! Both devices derive the same phrase set from the key digest. The device
//! being added shows a challenge (the right phrase set hidden among decoys)
//! and the user picks the one the other device is displaying.

use chrono::prelude::*;
use rand::{seq::SliceRandom, Rng};

use super::words::{EVEN_WORDS, ODD_WORDS};
use crate::mime::announcement;
use crate::mime::message::Message;
use crate::support::system_config::VerificationConfig;

pub const PHRASE_COUNT: usize = 3;
pub const WORDS_PER_PHRASE: usize = 3;

fn word(position: usize, byte: u8) -> &'static str {
    if 0 == position % 2 {
        EVEN_WORDS[byte as usize]
    } else {
        ODD_WORDS[byte as usize]
    }
}

/// Derive the phrase set for `digest`.
///
/// Word `i` is chosen by byte `i` of the digest. A digest shorter than
/// `PHRASE_COUNT * WORDS_PER_PHRASE` bytes yields fewer or shorter phrases.
pub fn phrases(digest: &[u8]) -> Vec<String> {
    let words = digest
        .iter()
        .take(PHRASE_COUNT * WORDS_PER_PHRASE)
        .enumerate()
        .map(|(ix, &byte)| word(ix, byte))
        .collect::<Vec<_>>();

    words
        .chunks(WORDS_PER_PHRASE)
        .map(|chunk| chunk.join(" "))
        .collect()
}

fn normalise(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `spoken` is exactly the phrase set for `digest`, in order,
/// ignoring case and spacing.
pub fn verify(spoken: &str, digest: &[u8]) -> bool {
    let expected = normalise(&phrases(digest).join(" "));
    !expected.is_empty() && normalise(spoken) == expected
}

/// Build a challenge: `correct` plus `decoys` random phrase sets of the same
/// shape, shuffled.
pub fn challenge(
    correct: &str,
    decoys: usize,
    rng: &mut impl Rng,
) -> Vec<String> {
    let word_count = correct.split_whitespace().count();
    let mut choices = vec![correct.to_owned()];

    while choices.len() < decoys + 1 {
        let decoy = (0..word_count)
            .map(|ix| word(ix, rng.gen()))
            .collect::<Vec<_>>()
            .join(" ");
        if !choices.iter().any(|c| normalise(c) == normalise(&decoy)) {
            choices.push(decoy);
        }
    }

    choices.shuffle(rng);
    choices
}

/// Select the key announcements worth prompting about: those from other
/// devices made within the freshness window.
pub fn actionable_announcements<'a>(
    messages: &'a [Message],
    own_device_uid: &str,
    config: &VerificationConfig,
    now: DateTime<Utc>,
) -> Vec<&'a Message> {
    messages
        .iter()
        .filter(|m| announcement::is_key_announcement(m))
        .filter(|m| announcement::is_foreign_device(m, own_device_uid))
        .filter(|m| {
            announcement::is_fresh(
                m,
                now,
                config.freshness(),
                config.clock_skew(),
            )
        })
        .collect()
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::mime::header::*;
    use crate::mime::message::{Body, Headers};

    #[test]
    fn known_digest() {
        let digest = [0u8, 1, 2, 3, 4, 5, 255, 254, 253, 9, 9];
        assert_eq!(
            vec![
                "aardvark adviser accrue",
                "aggregate adrift almighty",
                "Zulu yesteryear willow",
            ],
            phrases(&digest)
        );

        assert!(verify(
            "aardvark adviser accrue aggregate adrift almighty \
             zulu  YESTERYEAR\twillow",
            &digest
        ));
        // Order matters
        assert!(!verify(
            "aggregate adrift almighty aardvark adviser accrue \
             zulu yesteryear willow",
            &digest
        ));
        // So does completeness
        assert!(!verify("aardvark adviser accrue", &digest));
        assert!(!verify("", &[]));
    }

    #[test]
    fn challenge_contains_correct_phrase_once() {
        let mut rng = StdRng::seed_from_u64(42);
        let correct = "aardvark adviser accrue";
        let choices = challenge(correct, 4, &mut rng);
        assert_eq!(5, choices.len());
        assert_eq!(1, choices.iter().filter(|c| *c == correct).count());
        for choice in &choices {
            assert_eq!(3, choice.split_whitespace().count());
        }
    }

    fn announcement(uid: &str, at: DateTime<Utc>) -> Message {
        let mut headers = Headers::new();
        headers.set(E3_VERIFICATION, "aardvark adviser accrue");
        headers.set(E3_NAME, "e3-alice@example.com");
        headers.set(E3_TIMESTAMP, at.timestamp_millis().to_string());
        headers.set(E3_UID, uid);
        Message::new(headers, Body::Single(Vec::new()))
    }

    #[test]
    fn announcement_selection() {
        let config = VerificationConfig::default();
        let now = Utc.ymd(2020, 6, 1).and_hms(12, 0, 0);
        let messages = vec![
            announcement("other", now - chrono::Duration::seconds(30)),
            announcement("me", now - chrono::Duration::seconds(30)),
            announcement("other", now - chrono::Duration::seconds(600)),
            announcement("other", now + chrono::Duration::seconds(600)),
            Message::new(Headers::new(), Body::Single(Vec::new())),
        ];

        let selected = actionable_announcements(&messages, "me", &config, now);
        assert_eq!(1, selected.len());
        assert!(std::ptr::eq(&messages[0], selected[0]));
    }

    proptest! {
        #[test]
        fn phrases_verify_themselves(digest in prop::collection::vec(any::<u8>(), 32)) {
            let set = phrases(&digest);
            prop_assert_eq!(PHRASE_COUNT, set.len());
            for phrase in &set {
                prop_assert_eq!(
                    WORDS_PER_PHRASE,
                    phrase.split_whitespace().count()
                );
            }
            prop_assert!(verify(&set.join(" ").to_uppercase(), &digest));

            let mut other = digest.clone();
            other[0] ^= 1;
            prop_assert!(!verify(&set.join(" "), &other));
        }
    }
}
