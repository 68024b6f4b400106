/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
//! Resolving desired BIOS attribute names against the names a particular server actually has.
//!
//! Attribute names drift between vendors and firmware revisions, so a desired key is
//! scored against every actual key and only accepted when the score is high enough.

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::desired::SettingsSource;
use crate::model::AttributeSet;

/// Score of two keys that are identical after normalization.
pub const EXACT_SCORE: f64 = 100.0;

/// Scores above this (but below exact) are close enough to apply when forced.
pub const CLOSE_MATCH_THRESHOLD: f64 = 75.0;

/// The vendor specific cleanup applied to attribute names before comparing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyNormalizer {
    Identity,
    /// Supermicro appends `_XXXX` (four hex digits, a firmware-internal ID) to attribute
    /// names, and the suffix changes between BIOS versions.
    TrailingHexSuffix,
}

fn hex_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_[0-9A-Fa-f]{4}$").unwrap())
}

impl KeyNormalizer {
    pub fn for_vendor(vendor: &str) -> Self {
        if vendor.eq_ignore_ascii_case("supermicro") {
            KeyNormalizer::TrailingHexSuffix
        } else {
            KeyNormalizer::Identity
        }
    }

    pub fn normalize(self, key: &str) -> Cow<'_, str> {
        match self {
            KeyNormalizer::Identity => Cow::Borrowed(key),
            KeyNormalizer::TrailingHexSuffix => hex_suffix().replace(key, ""),
        }
    }
}

/// Indel similarity of two strings on a 0-100 scale:
/// `100 * (1 - indel_distance / (len(a) + len(b)))`. Symmetric and case-sensitive.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return EXACT_SCORE;
    }
    let lcs = lcs_len(&a, &b);
    if 2 * lcs == total {
        return EXACT_SCORE;
    }
    EXACT_SCORE * (2 * lcs) as f64 / total as f64
}

// Length of the longest common subsequence, one row of the table at a time.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    /// Identical after normalization
    Exact,
    /// Close match accepted because matching was forced
    Forced,
    /// Close match, not applied
    Close,
    /// Nothing credible
    NoMatch,
}

impl fmt::Display for MatchVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub desired_key: String,
    /// Best scoring actual attribute name, as the server spells it.
    pub candidate: Option<String>,
    pub score: f64,
    pub verdict: MatchVerdict,
}

impl MatchResult {
    /// The name to read and write on the server, if the match was accepted.
    pub fn resolved_key(&self) -> Option<&str> {
        match self.verdict {
            MatchVerdict::Exact | MatchVerdict::Forced => self.candidate.as_deref(),
            MatchVerdict::Close | MatchVerdict::NoMatch => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_key().is_some()
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.candidate {
            Some(c) => write!(
                f,
                "{} -> {} ({}, similarity {:.1})",
                self.desired_key, c, self.verdict, self.score
            ),
            None => write!(f, "{} -> none ({})", self.desired_key, self.verdict),
        }
    }
}

/// The desired settings for one server, re-keyed by the names the server uses.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Actual attribute name to desired value. Only accepted matches.
    pub applied: AttributeSet,
    /// One entry per desired key, in desired-key order.
    pub matches: Vec<MatchResult>,
}

impl Resolution {
    pub fn requested(&self) -> usize {
        self.matches.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_resolved()).count()
    }

    /// Desired keys that were not applied: close matches without force, and misses.
    pub fn unresolved(&self) -> impl Iterator<Item = &MatchResult> {
        self.matches.iter().filter(|m| !m.is_resolved())
    }

    pub fn is_complete(&self) -> bool {
        self.resolved_count() == self.requested()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMatcher {
    force: bool,
}

impl KeyMatcher {
    /// `force` accepts close (non exact) matches.
    pub fn new(force: bool) -> Self {
        KeyMatcher { force }
    }

    /// Score `desired_key` against every actual key and classify the best one. On a tie the
    /// first key in iteration order wins, so callers should pass keys in a stable order.
    pub fn best_match<'a>(
        &self,
        desired_key: &str,
        normalizer: KeyNormalizer,
        actual_keys: impl IntoIterator<Item = &'a str>,
    ) -> MatchResult {
        let wanted = normalizer.normalize(desired_key);
        let mut best: Option<(&str, f64)> = None;
        for actual in actual_keys {
            let score = similarity(&wanted, &normalizer.normalize(actual));
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((actual, score));
            }
        }
        let (candidate, score) = match best {
            Some((k, s)) => (Some(k.to_string()), s),
            None => (None, 0.0),
        };
        MatchResult {
            desired_key: desired_key.to_string(),
            candidate,
            score,
            verdict: self.verdict(score),
        }
    }

    fn verdict(&self, score: f64) -> MatchVerdict {
        if score >= EXACT_SCORE {
            MatchVerdict::Exact
        } else if score > CLOSE_MATCH_THRESHOLD {
            if self.force {
                MatchVerdict::Forced
            } else {
                MatchVerdict::Close
            }
        } else {
            MatchVerdict::NoMatch
        }
    }

    /// Resolve every desired key against the server's current attributes.
    pub fn resolve(
        &self,
        host: &str,
        desired: &AttributeSet,
        source: SettingsSource,
        normalizer: KeyNormalizer,
        current: &AttributeSet,
    ) -> Resolution {
        debug!("{host}: matching {} keys using {normalizer:?}", desired.len());
        let mut resolution = Resolution::default();
        for (setting, value) in desired {
            let m = self.best_match(setting, normalizer, current.names());
            if m.verdict != MatchVerdict::Exact {
                if source == SettingsSource::Wildcard {
                    debug!("{host}: matching {setting} from wildcard definition");
                } else {
                    warn!("{host}: BIOS key {setting} is different than previously recorded");
                }
                match m.verdict {
                    MatchVerdict::Forced => {
                        info!("{host}: forcing {m}");
                    }
                    MatchVerdict::Close => {
                        info!("{host}: possible match {m}, not applied without force");
                    }
                    _ => {
                        warn!("{host}: no match found for {m}. Skipping setting");
                    }
                }
            }
            if let Some(actual) = m.resolved_key() {
                if resolution.applied.contains(actual) {
                    warn!("{host}: {actual} matched by more than one desired key, {setting} wins");
                }
                resolution.applied.insert(actual, value.clone());
            }
            resolution.matches.push(m);
        }
        resolution
    }
}
