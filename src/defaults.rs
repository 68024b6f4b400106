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
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::compare::{diff_sets, AttributeDiff};
use crate::config::load_yaml;
use crate::desired::ClassMap;
use crate::identity::ServerIdentity;
use crate::model::AttributeSet;
use crate::reconcile::{DiffRecord, Server};
use crate::BiosError;

const HEADER: &str = "# Bios Defaults Database\n# This should contain the default/factory reset values\n";

/// Factory BIOS settings per server class, as first seen.
#[derive(Debug, Clone)]
pub struct DefaultsDatabase {
    path: PathBuf,
    classes: ClassMap,
}

/// What recording a set of servers did to the database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub added: Vec<String>,
    pub overwritten: Vec<String>,
    /// Already present and not forced
    pub skipped: Vec<String>,
}

impl SaveReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.overwritten.is_empty()
    }
}

/// One server compared to the recorded defaults of its class.
#[derive(Debug, Clone)]
pub struct DefaultsDiff {
    pub host: String,
    pub identity: ServerIdentity,
    /// Settings whose current value is not the recorded one. `desired` holds the default.
    pub differences: Vec<DiffRecord>,
    /// Recorded attributes the server doesn't have
    pub missing: Vec<String>,
    /// Attributes the server has that were not recorded
    pub extra: Vec<String>,
}

impl DefaultsDiff {
    /// Same names, same values.
    pub fn is_default(&self) -> bool {
        self.differences.is_empty() && self.missing.is_empty() && self.extra.is_empty()
    }

    /// No value differs but the names don't line up. Usually a different BIOS version
    /// than the one recorded.
    pub fn is_incomplete_definition(&self) -> bool {
        self.differences.is_empty() && !(self.missing.is_empty() && self.extra.is_empty())
    }

    /// The current values of the non-default settings.
    pub fn custom_values(&self) -> AttributeSet {
        self.differences
            .iter()
            .map(|d| (d.attribute.clone(), d.current.clone()))
            .collect()
    }
}

impl DefaultsDatabase {
    /// Load the database. A file that doesn't exist yet is an empty database.
    pub fn load(path: &Path) -> Result<Self, BiosError> {
        let classes = if path.exists() {
            let classes: Option<ClassMap> = load_yaml(path)?;
            classes.unwrap_or_default()
        } else {
            info!("Bios database {} does not exist, it will be created", path.display());
            ClassMap::new()
        };
        Ok(DefaultsDatabase {
            path: path.to_path_buf(),
            classes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded defaults for exactly this class. No wildcard.
    pub fn lookup(&self, identity: &ServerIdentity) -> Result<&AttributeSet, BiosError> {
        self.classes
            .get(&identity.vendor)
            .and_then(|archs| archs.get(identity.architecture.as_str()))
            .and_then(|models| models.get(&identity.model))
            .ok_or_else(|| BiosError::MissingDefinition {
                vendor: identity.vendor.clone(),
                architecture: identity.architecture.to_string(),
                model: identity.model.clone(),
            })
    }

    /// Record each server's current attributes as its class's defaults. Classes already
    /// present are only replaced with `force`.
    pub fn record(&mut self, servers: &[Server], force: bool) -> SaveReport {
        let mut report = SaveReport::default();
        for server in servers {
            let identity = server.identity();
            let class = identity.class();
            let models = self
                .classes
                .entry(identity.vendor.clone())
                .or_default()
                .entry(identity.architecture.to_string())
                .or_default();
            if models.contains_key(&identity.model) {
                if force {
                    warn!("{class} found in database, forcing overwrite from {}", server.hostname());
                    models.insert(identity.model.clone(), server.attributes().clone());
                    report.overwritten.push(class);
                } else {
                    info!("{class} found in database; to force overwrite use --force");
                    report.skipped.push(class);
                }
            } else {
                info!("{class}: recording defaults from {}", server.hostname());
                models.insert(identity.model.clone(), server.attributes().clone());
                report.added.push(class);
            }
        }
        report
    }

    /// Write the whole database. The file is replaced in one rename so a failed write
    /// leaves the old file in place.
    pub fn save(&self) -> Result<(), BiosError> {
        let yaml = serde_yaml::to_string(&self.classes).map_err(|source| BiosError::YamlError {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| BiosError::FileError { path, source }
        };
        fs::write(&tmp, format!("{HEADER}{yaml}")).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!("Wrote {}", self.path.display());
        Ok(())
    }

    /// Record and, only if something changed, save.
    pub fn save_servers(&mut self, servers: &[Server], force: bool) -> Result<SaveReport, BiosError> {
        let report = self.record(servers, force);
        if report.changed() {
            self.save()?;
            info!(
                "{}: {} classes added, {} overwritten",
                self.path.display(),
                report.added.len(),
                report.overwritten.len()
            );
        } else {
            info!("{}: nothing to save", self.path.display());
        }
        Ok(report)
    }

    /// How a server's current settings differ from its class's recorded defaults.
    pub fn diff_against_defaults(&self, server: &Server) -> Result<DefaultsDiff, BiosError> {
        let host = server.hostname();
        let identity = server.identity();
        let defaults = self.lookup(identity)?;
        info!("Looking at defaults for {host}: {}", identity.class());

        let mut diff = DefaultsDiff {
            host: host.to_string(),
            identity: identity.clone(),
            differences: Vec::new(),
            missing: Vec::new(),
            extra: Vec::new(),
        };
        for d in diff_sets(defaults, server.attributes()) {
            match d {
                AttributeDiff::Changed { name, left, right } => {
                    info!("{host}: setting {name} is {right}, default is {left}");
                    diff.differences.push(DiffRecord {
                        attribute: name,
                        current: right,
                        desired: left,
                    });
                }
                AttributeDiff::OnlyLeft { name, .. } => {
                    warn!("{host} is missing setting {}/{name}", identity.class());
                    diff.missing.push(name);
                }
                AttributeDiff::OnlyRight { name, .. } => {
                    warn!("{host} has setting {name} that is not in {}", identity.class());
                    diff.extra.push(name);
                }
            }
        }

        if diff.is_default() {
            info!("{host} has all default settings");
        } else if diff.is_incomplete_definition() {
            error!(
                "{host}: the default definition for {} is incorrect or incomplete, and shows no differences",
                identity.class()
            );
        }
        Ok(diff)
    }
}

/// The non-default settings found, in desired-state file shape, as a starting point
/// for editing the desired-state file. Servers of the same class: the last one wins.
pub fn custom_settings(diffs: &[DefaultsDiff]) -> ClassMap {
    let mut out = ClassMap::new();
    for d in diffs.iter().filter(|d| !d.differences.is_empty()) {
        out.entry(d.identity.vendor.clone())
            .or_default()
            .entry(d.identity.architecture.to_string())
            .or_default()
            .insert(d.identity.model.clone(), d.custom_values());
    }
    out
}
