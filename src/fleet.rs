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
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::HostEntry;
use crate::desired::DesiredStateStore;
use crate::reconcile::{self, HostReport, ReconcileOptions, RebootStatus, Server};
use crate::SessionConnector;

/// Sessions opened, or servers reconciled, at the same time.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// A host that never got a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub host: String,
    pub reason: String,
    /// No session at all, as opposed to a session whose BIOS could not be read.
    pub unreachable: bool,
}

/// The servers of one run, in processing order.
pub struct Fleet {
    pub servers: Vec<Server>,
    pub failures: Vec<ConnectFailure>,
}

impl Fleet {
    pub fn find(&self, hostname: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.hostname() == hostname)
    }

    /// Log out of every server.
    pub async fn close(self) {
        join_all(self.servers.iter().map(|s| s.close())).await;
    }
}

/// Everything that happened in a check/fix/reboot run.
#[derive(Debug, Clone, Default)]
pub struct FleetReport {
    /// In processing order, local host last
    pub reports: Vec<HostReport>,
    pub failures: Vec<ConnectFailure>,
}

impl FleetReport {
    pub fn needing_changes(&self) -> impl Iterator<Item = &HostReport> {
        self.reports.iter().filter(|r| r.needs_changes())
    }

    pub fn fixed(&self) -> impl Iterator<Item = &HostReport> {
        self.reports.iter().filter(|r| r.is_fixed())
    }

    pub fn rebooted(&self) -> impl Iterator<Item = &HostReport> {
        self.reports.iter().filter(|r| r.was_rebooted())
    }

    pub fn log_summary(&self, options: &ReconcileOptions) {
        if !self.failures.is_empty() {
            warn!(
                "{} hosts could not be reached: {}",
                self.failures.len(),
                self.failures
                    .iter()
                    .map(|f| f.host.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if !options.fix {
            info!("There are {} hosts needing changes", self.needing_changes().count());
            if options.reboot {
                info!("{} hosts have been rebooted", self.rebooted().count());
            }
        } else if !options.reboot {
            info!(
                "{} hosts have been modified. Please reboot them to activate changes.",
                self.fixed().count()
            );
        } else {
            info!(
                "{} hosts have been successfully modified and rebooted.",
                self.fixed().filter(|r| r.was_rebooted()).count()
            );
        }
    }
}

/// Result of resetting one server's BIOS to factory defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosResetReport {
    pub host: String,
    pub result: Result<(), String>,
    pub reboot: RebootStatus,
}

/// Runs per-server work across the fleet with bounded concurrency. The server the tool
/// runs on, if it is in the fleet, always goes last.
pub struct FleetOrchestrator<C> {
    connector: C,
    concurrency: usize,
    local_host: Option<String>,
}

impl<C: SessionConnector> FleetOrchestrator<C> {
    pub fn new(connector: C) -> Self {
        FleetOrchestrator {
            connector,
            concurrency: DEFAULT_CONCURRENCY,
            local_host: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// BMC address of the server the tool runs on
    pub fn with_local_host(mut self, local_host: Option<String>) -> Self {
        self.local_host = local_host;
        self
    }

    fn is_local(&self, hostname: &str) -> bool {
        self.local_host.as_deref() == Some(hostname)
    }

    /// The hosts in processing order: as given, with the local host moved to the end.
    pub fn order_hosts(&self, hosts: &[HostEntry]) -> Vec<HostEntry> {
        let (mut ordered, local): (Vec<HostEntry>, Vec<HostEntry>) =
            hosts.iter().cloned().partition(|h| !self.is_local(&h.name));
        if !local.is_empty() {
            info!("{} is this host's BMC, it will be processed last", local[0].name);
        }
        ordered.extend(local);
        ordered
    }

    /// Open a session to every host. Hosts that fail are recorded, never fatal.
    pub async fn connect(&self, hosts: &[HostEntry]) -> Fleet {
        let ordered = self.order_hosts(hosts);
        info!("Opening sessions to {} hosts", ordered.len());
        let results: Vec<_> = stream::iter(ordered.iter())
            .map(|h| async move { (h, Server::open(&self.connector, h).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fleet = Fleet {
            servers: Vec::new(),
            failures: Vec::new(),
        };
        for (host, result) in results {
            match result {
                Ok(server) => fleet.servers.push(server),
                Err(e) => {
                    let unreachable = e.is_connection_failure();
                    if unreachable {
                        error!("{}: unable to connect: {e}", host.name);
                    } else {
                        error!("{}: connected but unable to read the server: {e}", host.name);
                    }
                    fleet.failures.push(ConnectFailure {
                        host: host.name.clone(),
                        reason: e.to_string(),
                        unreachable,
                    });
                }
            }
        }
        fleet
    }

    /// Reconcile every server. The local host starts only after all others are done,
    /// so its reboot is issued last.
    pub async fn run(
        &self,
        fleet: &Fleet,
        store: &DesiredStateStore,
        options: &ReconcileOptions,
    ) -> FleetReport {
        let (local, others): (Vec<&Server>, Vec<&Server>) = fleet
            .servers
            .iter()
            .partition(|s| self.is_local(s.hostname()));

        let mut reports: Vec<HostReport> = stream::iter(others)
            .map(|s| reconcile::reconcile(s, store, options))
            .buffered(self.concurrency)
            .collect()
            .await;
        for server in local {
            debug!("{}: local host, reconciling now", server.hostname());
            reports.push(reconcile::reconcile(server, store, options).await);
        }
        FleetReport {
            reports,
            failures: fleet.failures.clone(),
        }
    }

    /// Reset every server's BIOS to factory defaults, optionally rebooting it after.
    pub async fn reset_bios(&self, fleet: &Fleet, reboot: bool) -> Vec<BiosResetReport> {
        let (local, others): (Vec<&Server>, Vec<&Server>) = fleet
            .servers
            .iter()
            .partition(|s| self.is_local(s.hostname()));

        let mut reports: Vec<BiosResetReport> = stream::iter(others)
            .map(|s| reset_one(s, reboot))
            .buffered(self.concurrency)
            .collect()
            .await;
        for server in local {
            reports.push(reset_one(server, reboot).await);
        }
        reports
    }
}

async fn reset_one(server: &Server, reboot: bool) -> BiosResetReport {
    let host = server.hostname();
    let result = match server.session().reset_bios().await {
        Ok(()) => {
            info!("{host} has been reset to factory defaults");
            Ok(())
        }
        Err(e) => {
            error!("{host}: BIOS reset failed: {e}");
            Err(e.to_string())
        }
    };
    let reboot = match (&result, reboot) {
        (Ok(()), true) => reconcile::reboot(server).await,
        (Ok(()), false) => RebootStatus::Pending,
        (Err(_), _) => RebootStatus::NotRequested,
    };
    BiosResetReport {
        host: host.to_string(),
        result,
        reboot,
    }
}

/// The BMC address of the machine we're running on, from `ipmitool lan print`.
/// None if ipmitool is missing or has no answer.
pub async fn local_bmc_address() -> Option<String> {
    let output = match Command::new("ipmitool").args(["lan", "print"]).output().await {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            debug!("ipmitool lan print exited with {}", o.status);
            return None;
        }
        Err(e) => {
            debug!("ipmitool not available: {e}");
            return None;
        }
    };
    parse_lan_print(&String::from_utf8_lossy(&output.stdout))
}

/// The `IP Address` line of `ipmitool lan print` output.
pub fn parse_lan_print(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (key.trim() == "IP Address" && !value.is_empty() && value != "0.0.0.0")
            .then(|| value.to_string())
    })
}
