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
use std::fmt;

use tracing::{debug, error, info, warn};

use crate::config::HostEntry;
use crate::desired::{DesiredStateStore, SettingsSource};
use crate::identity::ServerIdentity;
use crate::matcher::{KeyMatcher, MatchResult};
use crate::model::{select_reset_type, ApplyTime, AttributeSet, AttributeValue, ResetType};
use crate::{BiosError, ManagementSession, SessionConnector};

/// A connected server and the BIOS attributes it had when last read.
pub struct Server {
    session: Box<dyn ManagementSession>,
    attributes: AttributeSet,
}

impl Server {
    /// Connect and take the attribute snapshot. The session is closed again if the
    /// snapshot can't be read.
    pub async fn open<C: SessionConnector + ?Sized>(
        connector: &C,
        host: &HostEntry,
    ) -> Result<Server, BiosError> {
        let session = connector.connect(host).await?;
        match session.read_attributes().await {
            Ok(attributes) => {
                debug!("{}: read {} BIOS attributes", host.name, attributes.len());
                Ok(Server {
                    session,
                    attributes,
                })
            }
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!("{}: close after failed read: {close_err}", host.name);
                }
                Err(e)
            }
        }
    }

    pub fn hostname(&self) -> &str {
        self.session.host()
    }

    pub fn identity(&self) -> &ServerIdentity {
        self.session.identity()
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn session(&self) -> &dyn ManagementSession {
        self.session.as_ref()
    }

    /// Re-read the attributes. Values written with an `OnReset` apply time only show
    /// up here after the server has rebooted.
    pub async fn refresh(&mut self) -> Result<(), BiosError> {
        self.attributes = self.session.read_attributes().await?;
        Ok(())
    }

    /// Log out, logging rather than returning any failure.
    pub async fn close(&self) {
        match self.session.close().await {
            Ok(()) => debug!("{}: session closed", self.hostname()),
            Err(e) => warn!("{}: failed to close session: {e}", self.hostname()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Write the differing attributes
    pub fix: bool,
    /// Reboot. With `fix` only servers that were fixed, without it every server checked.
    pub reboot: bool,
    /// Accept close attribute name matches
    pub force: bool,
}

/// One attribute that is not what it should be.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRecord {
    /// Attribute name as the server spells it
    pub attribute: String,
    pub current: AttributeValue,
    pub desired: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Compliant,
    /// Differences found and not written. Empty when every resolved key matches but
    /// some desired keys could not be resolved.
    NeedsChanges(Vec<DiffRecord>),
    /// Differences written. They take effect on the next reboot.
    Fixed(Vec<DiffRecord>),
    /// The write failed. Holds the BMC's diagnostic.
    FixFailed(String),
    Skipped(String),
}

impl Outcome {
    pub fn diffs(&self) -> &[DiffRecord] {
        match self {
            Outcome::NeedsChanges(d) | Outcome::Fixed(d) => d,
            _ => &[],
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Compliant => write!(f, "compliant"),
            Outcome::NeedsChanges(d) => write!(f, "needs {} changes", d.len()),
            Outcome::Fixed(d) => write!(f, "fixed {} settings", d.len()),
            Outcome::FixFailed(reason) => write!(f, "fix failed: {reason}"),
            Outcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebootStatus {
    NotRequested,
    /// Settings were written but no reboot was asked for
    Pending,
    Issued(ResetType),
    Failed(String),
}

/// What happened to one server.
#[derive(Debug, Clone)]
pub struct HostReport {
    pub host: String,
    pub identity: ServerIdentity,
    /// None if the server was skipped before settings were found
    pub source: Option<SettingsSource>,
    /// Number of desired settings for this server's class
    pub requested: usize,
    /// Desired keys that were close or missing, and so not checked
    pub unresolved: Vec<MatchResult>,
    pub outcome: Outcome,
    pub reboot: RebootStatus,
}

impl HostReport {
    fn skipped(server: &Server, reason: String) -> Self {
        HostReport {
            host: server.hostname().to_string(),
            identity: server.identity().clone(),
            source: None,
            requested: 0,
            unresolved: Vec::new(),
            outcome: Outcome::Skipped(reason),
            reboot: RebootStatus::NotRequested,
        }
    }

    pub fn needs_changes(&self) -> bool {
        matches!(self.outcome, Outcome::NeedsChanges(_))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.outcome, Outcome::Fixed(_))
    }

    pub fn was_rebooted(&self) -> bool {
        matches!(self.reboot, RebootStatus::Issued(_))
    }
}

/// Resolved desired values that differ from the server's current ones.
pub fn diff_resolved(applied: &AttributeSet, current: &AttributeSet) -> Vec<DiffRecord> {
    applied
        .iter()
        .filter_map(|(name, desired)| {
            let current = current.get(name)?;
            (current != desired).then(|| DiffRecord {
                attribute: name.clone(),
                current: current.clone(),
                desired: desired.clone(),
            })
        })
        .collect()
}

/// Check one server against the desired state, then fix and reboot it as asked.
pub async fn reconcile(
    server: &Server,
    store: &DesiredStateStore,
    options: &ReconcileOptions,
) -> HostReport {
    let host = server.hostname();
    let identity = server.identity();
    info!("{host}: checking BIOS settings for {}", identity.class());

    let desired = match store.resolve_for(identity) {
        Ok(d) => d,
        Err(e) => {
            warn!("{host}: {e}. Skipping");
            return HostReport::skipped(server, e.to_string());
        }
    };
    if desired.source == SettingsSource::Wildcard {
        info!("{host}: no entry for model {}, using wildcard definition", identity.model);
    }

    let resolution = KeyMatcher::new(options.force).resolve(
        host,
        desired.settings,
        desired.source,
        identity.normalizer(),
        server.attributes(),
    );
    if !resolution.is_complete() {
        warn!(
            "{host}: only {} of {} desired settings match this server's BIOS",
            resolution.resolved_count(),
            resolution.requested()
        );
    }

    let diffs = diff_resolved(&resolution.applied, server.attributes());
    for d in &diffs {
        info!(
            "{host}: BIOS setting {} is {}, but should be {}",
            d.attribute, d.current, d.desired
        );
    }
    let mut outcome = if diffs.is_empty() && resolution.is_complete() {
        Outcome::Compliant
    } else {
        Outcome::NeedsChanges(diffs)
    };

    if options.fix && !outcome.diffs().is_empty() {
        let diffs = outcome.diffs().to_vec();
        outcome = apply_fix(server, diffs).await;
    }

    let reboot = if !options.reboot {
        match outcome {
            Outcome::Fixed(_) => RebootStatus::Pending,
            _ => RebootStatus::NotRequested,
        }
    } else if should_reboot(&outcome, options.fix) {
        reboot(server).await
    } else {
        RebootStatus::NotRequested
    };

    HostReport {
        host: host.to_string(),
        identity: identity.clone(),
        source: Some(desired.source),
        requested: resolution.requested(),
        unresolved: resolution.unresolved().cloned().collect(),
        outcome,
        reboot,
    }
}

/// One write, never retried.
async fn apply_fix(server: &Server, diffs: Vec<DiffRecord>) -> Outcome {
    let host = server.hostname();
    let session = server.session();
    let changes: AttributeSet = diffs
        .iter()
        .map(|d| (d.attribute.clone(), d.desired.clone()))
        .collect();
    let apply_time = session
        .supported_apply_times()
        .contains(&ApplyTime::OnReset)
        .then_some(ApplyTime::OnReset);

    match session.write_attributes(&changes, apply_time).await {
        Ok(()) => {
            info!(
                "{host}: set {} BIOS settings; system reboot required",
                changes.len()
            );
            Outcome::Fixed(diffs)
        }
        Err(BiosError::Rejected { diagnostic, .. }) => {
            error!("{host}: BMC rejected the BIOS settings:\n{diagnostic}");
            Outcome::FixFailed(diagnostic)
        }
        Err(e) => {
            error!("{host}: unable to fix: {e}");
            Outcome::FixFailed(e.to_string())
        }
    }
}

/// With fix, only servers that were fixed. Without, every server that was checked.
fn should_reboot(outcome: &Outcome, fix: bool) -> bool {
    match outcome {
        Outcome::Fixed(_) => true,
        Outcome::Compliant | Outcome::NeedsChanges(_) => !fix,
        Outcome::FixFailed(_) | Outcome::Skipped(_) => false,
    }
}

/// Restart the server, or power it on if it is not on.
pub async fn reboot(server: &Server) -> RebootStatus {
    let host = server.hostname();
    let session = server.session();
    let power_state = match session.power_state().await {
        Ok(p) => p,
        Err(e) => {
            error!("{host}: could not read power state: {e}");
            return RebootStatus::Failed(e.to_string());
        }
    };
    let reset_type = select_reset_type(power_state, session.advertised_reset_types());
    info!("{host}: power is {power_state}, rebooting with {reset_type}");
    match session.reset(reset_type).await {
        Ok(()) => RebootStatus::Issued(reset_type),
        Err(e) => {
            error!("{host}: reboot failed: {e}");
            RebootStatus::Failed(e.to_string())
        }
    }
}
