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
use tracing::warn;

use crate::matcher::KeyNormalizer;
use crate::model::{AttributeSet, AttributeValue};
use crate::reconcile::Server;
use crate::BiosError;

/// One difference between two attribute sets.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeDiff {
    Changed {
        name: String,
        left: AttributeValue,
        right: AttributeValue,
    },
    OnlyLeft {
        name: String,
        value: AttributeValue,
    },
    OnlyRight {
        name: String,
        value: AttributeValue,
    },
}

impl AttributeDiff {
    pub fn name(&self) -> &str {
        match self {
            AttributeDiff::Changed { name, .. }
            | AttributeDiff::OnlyLeft { name, .. }
            | AttributeDiff::OnlyRight { name, .. } => name,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, AttributeDiff::Changed { .. })
    }
}

/// Differences between two attribute sets, sorted by attribute name.
pub fn diff_sets(left: &AttributeSet, right: &AttributeSet) -> Vec<AttributeDiff> {
    let mut diffs: Vec<AttributeDiff> = left
        .iter()
        .filter_map(|(name, l)| match right.get(name) {
            Some(r) if r == l => None,
            Some(r) => Some(AttributeDiff::Changed {
                name: name.clone(),
                left: l.clone(),
                right: r.clone(),
            }),
            None => Some(AttributeDiff::OnlyLeft {
                name: name.clone(),
                value: l.clone(),
            }),
        })
        .collect();
    diffs.extend(
        right
            .iter()
            .filter(|(name, _)| !left.contains(name))
            .map(|(name, value)| AttributeDiff::OnlyRight {
                name: name.clone(),
                value: value.clone(),
            }),
    );
    diffs.sort_by(|a, b| a.name().cmp(b.name()));
    diffs
}

/// Re-key a set with `normalizer`. When two names collapse to one the later
/// (in sorted order) wins.
pub fn normalize_keys(host: &str, set: &AttributeSet, normalizer: KeyNormalizer) -> AttributeSet {
    let mut out = AttributeSet::new();
    for (name, value) in set {
        let key = normalizer.normalize(name);
        if out.contains(&key) {
            warn!("{host}: {name} collides with another attribute once normalized to {key}");
        }
        out.insert(key.into_owned(), value.clone());
    }
    out
}

#[derive(Debug, Clone)]
pub struct HostComparison {
    pub left: String,
    pub right: String,
    pub diffs: Vec<AttributeDiff>,
}

impl HostComparison {
    pub fn is_identical(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn changed(&self) -> impl Iterator<Item = &AttributeDiff> {
        self.diffs.iter().filter(|d| d.is_changed())
    }

    /// Attributes only one of the hosts has
    pub fn not_present(&self) -> impl Iterator<Item = &AttributeDiff> {
        self.diffs.iter().filter(|d| !d.is_changed())
    }
}

/// Compare the BIOS attributes of two servers of the same vendor and architecture.
/// With `normalize`, vendor revision suffixes are stripped from names on both sides first,
/// so servers on different BIOS versions line up.
pub fn compare_hosts(
    left: &Server,
    right: &Server,
    normalize: bool,
) -> Result<HostComparison, BiosError> {
    let (l, r) = (left.identity(), right.identity());
    if l.architecture != r.architecture {
        return Err(BiosError::Incomparable(format!(
            "{} is {} but {} is {}",
            left.hostname(),
            l.architecture,
            right.hostname(),
            r.architecture
        )));
    }
    if l.vendor != r.vendor {
        return Err(BiosError::Incomparable(format!(
            "{} is made by {} but {} by {}",
            left.hostname(),
            l.vendor,
            right.hostname(),
            r.vendor
        )));
    }
    if l.bios_version != r.bios_version {
        warn!(
            "BIOS versions differ: {} has {}, {} has {}. Attribute names may not line up",
            left.hostname(),
            l.bios_version.as_deref().unwrap_or("unknown"),
            right.hostname(),
            r.bios_version.as_deref().unwrap_or("unknown"),
        );
    }

    let diffs = if normalize {
        diff_sets(
            &normalize_keys(left.hostname(), left.attributes(), l.normalizer()),
            &normalize_keys(right.hostname(), right.attributes(), r.normalizer()),
        )
    } else {
        diff_sets(left.attributes(), right.attributes())
    };
    Ok(HostComparison {
        left: left.hostname().to_string(),
        right: right.hostname().to_string(),
        diffs,
    })
}
