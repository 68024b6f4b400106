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
//! End-to-end tests of reconciliation and fleet handling against in-memory BMCs.
//! The fake BMC applies writes at once and logs what it was asked to do.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use biosfleet::compare::compare_hosts;
use biosfleet::desired::ClassMap;
use biosfleet::reconcile::{reconcile, DiffRecord};
use biosfleet::{
    ApplyTime, Architecture, AttributeSet, AttributeValue, BiosError, DefaultsDatabase,
    DesiredStateStore, FleetOrchestrator, HostEntry, ManagementSession, MatchVerdict, Outcome,
    PowerState, RebootStatus, ReconcileOptions, ResetType, Server, ServerIdentity,
    SessionConnector, SettingsSource,
};

type EventLog = Arc<Mutex<Vec<String>>>;

struct FakeBmc {
    host: String,
    identity: ServerIdentity,
    attributes: Mutex<AttributeSet>,
    apply_times: Vec<ApplyTime>,
    reset_types: Vec<ResetType>,
    power: PowerState,
    reject_writes: Option<String>,
    read_error: Option<String>,
    reset_delay: Duration,
    events: EventLog,
}

impl FakeBmc {
    fn new(host: &str, identity: ServerIdentity, attributes: &[(&str, &str)]) -> Self {
        FakeBmc {
            host: host.to_string(),
            identity,
            attributes: Mutex::new(attributes.iter().map(|(k, v)| (*k, *v)).collect()),
            apply_times: vec![ApplyTime::OnReset],
            reset_types: vec![ResetType::On, ResetType::ForceRestart, ResetType::GracefulRestart],
            power: PowerState::On,
            reject_writes: None,
            read_error: None,
            reset_delay: Duration::ZERO,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ManagementSession for FakeBmc {
    fn host(&self) -> &str {
        &self.host
    }

    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    async fn read_attributes(&self) -> Result<AttributeSet, BiosError> {
        if let Some(detail) = &self.read_error {
            return Err(BiosError::ResourceError {
                url: format!("/redfish/v1/Systems/1/Bios on {}", self.host),
                detail: detail.clone(),
            });
        }
        Ok(self.attributes.lock().unwrap().clone())
    }

    async fn write_attributes(
        &self,
        attributes: &AttributeSet,
        apply_time: Option<ApplyTime>,
    ) -> Result<(), BiosError> {
        if let Some(diagnostic) = &self.reject_writes {
            return Err(BiosError::Rejected {
                url: format!("/redfish/v1/Systems/1/Bios/Settings on {}", self.host),
                status_code: reqwest::StatusCode::BAD_REQUEST,
                diagnostic: diagnostic.clone(),
            });
        }
        let names: Vec<&str> = attributes.names().collect();
        self.log(format!(
            "write {} {} {:?}",
            self.host,
            names.join(","),
            apply_time
        ));
        let mut current = self.attributes.lock().unwrap();
        for (k, v) in attributes {
            current.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn supported_apply_times(&self) -> &[ApplyTime] {
        &self.apply_times
    }

    fn advertised_reset_types(&self) -> &[ResetType] {
        &self.reset_types
    }

    async fn power_state(&self) -> Result<PowerState, BiosError> {
        Ok(self.power)
    }

    async fn reset(&self, reset_type: ResetType) -> Result<(), BiosError> {
        tokio::time::sleep(self.reset_delay).await;
        self.log(format!("reset {} {reset_type}", self.host));
        Ok(())
    }

    async fn reset_bios(&self) -> Result<(), BiosError> {
        self.log(format!("reset_bios {}", self.host));
        Ok(())
    }

    async fn close(&self) -> Result<(), BiosError> {
        self.log(format!("close {}", self.host));
        Ok(())
    }
}

/// Hands out each fake BMC once. Hosts it doesn't know fail to log in.
struct FakeConnector {
    bmcs: Mutex<HashMap<String, FakeBmc>>,
}

impl FakeConnector {
    fn new(bmcs: Vec<FakeBmc>) -> Self {
        FakeConnector {
            bmcs: Mutex::new(bmcs.into_iter().map(|b| (b.host.clone(), b)).collect()),
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, host: &HostEntry) -> Result<Box<dyn ManagementSession>, BiosError> {
        let bmc = self.bmcs.lock().unwrap().remove(&host.name);
        match bmc {
            Some(bmc) => Ok(Box::new(bmc)),
            None => Err(BiosError::AuthError {
                host: host.name.clone(),
                url: format!("https://{}/redfish/v1/SessionService/Sessions", host.name),
                status_code: reqwest::StatusCode::UNAUTHORIZED,
                diagnostic: "Invalid username or password".to_string(),
            }),
        }
    }
}

fn entry(name: &str) -> HostEntry {
    HostEntry {
        name: name.to_string(),
        user: "ADMIN".to_string(),
        password: "ADMIN".to_string(),
    }
}

fn dell_r650() -> ServerIdentity {
    ServerIdentity::new("Dell Inc.", Architecture::Intel, "PowerEdge R650")
        .with_versions(Some("1.10.2".to_string()), Some("7.00.00.171".to_string()))
}

fn smc_amd(model: &str) -> ServerIdentity {
    ServerIdentity::new("Supermicro", Architecture::Amd, model)
}

fn store(yaml: &str) -> Result<DesiredStateStore, anyhow::Error> {
    let classes: ClassMap = serde_yaml::from_str(yaml)?;
    Ok(DesiredStateStore::new(classes))
}

async fn open(bmc: FakeBmc) -> Result<Server, anyhow::Error> {
    let name = bmc.host.clone();
    let connector = FakeConnector::new(vec![bmc]);
    Ok(Server::open(&connector, &entry(&name)).await?)
}

const DELL_STORE: &str = r#"
Dell Inc.:
  Intel:
    PowerEdge R650:
      PowerProfile: Balanced
"#;

#[tokio::test]
async fn test_fix_power_profile() -> Result<(), anyhow::Error> {
    let bmc = FakeBmc::new(
        "bmc1",
        dell_r650(),
        &[("PowerProfile", "Performance"), ("BootMode", "Uefi")],
    );
    let events = bmc.events.clone();
    let mut server = open(bmc).await?;
    let store = store(DELL_STORE)?;

    let check = reconcile(&server, &store, &ReconcileOptions::default()).await;
    assert_eq!(
        check.outcome,
        Outcome::NeedsChanges(vec![DiffRecord {
            attribute: "PowerProfile".to_string(),
            current: "Performance".into(),
            desired: "Balanced".into(),
        }])
    );
    assert_eq!(check.reboot, RebootStatus::NotRequested);

    let options = ReconcileOptions {
        fix: true,
        ..Default::default()
    };
    let report = reconcile(&server, &store, &options).await;
    assert!(report.is_fixed());
    assert_eq!(report.outcome.diffs().len(), 1);
    assert_eq!(report.reboot, RebootStatus::Pending);
    assert_eq!(report.source, Some(SettingsSource::Model));
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["write bmc1 PowerProfile Some(OnReset)"]
    );

    server.refresh().await?;
    assert_eq!(
        server.attributes().get("PowerProfile"),
        Some(&AttributeValue::from("Balanced"))
    );
    let again = reconcile(&server, &store, &options).await;
    assert_eq!(again.outcome, Outcome::Compliant);
    Ok(())
}

#[tokio::test]
async fn test_no_apply_time_when_not_advertised() -> Result<(), anyhow::Error> {
    let mut bmc = FakeBmc::new("bmc1", dell_r650(), &[("PowerProfile", "Performance")]);
    bmc.apply_times = vec![ApplyTime::Immediate];
    let events = bmc.events.clone();
    let server = open(bmc).await?;
    let options = ReconcileOptions {
        fix: true,
        ..Default::default()
    };
    reconcile(&server, &store(DELL_STORE)?, &options).await;
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["write bmc1 PowerProfile None"]
    );
    Ok(())
}

#[tokio::test]
async fn test_unmatched_key_is_never_compliant() -> Result<(), anyhow::Error> {
    let bmc = FakeBmc::new(
        "bmc1",
        dell_r650(),
        &[("PowerProfile", "Performance"), ("SriovGlobalEnable", "Enabled")],
    );
    let server = open(bmc).await?;
    let store = store(
        r#"
Dell Inc.:
  Intel:
    PowerEdge R650:
      NicBoot: Enabled
"#,
    )?;
    let options = ReconcileOptions {
        fix: true,
        ..Default::default()
    };
    let report = reconcile(&server, &store, &options).await;
    assert_eq!(report.outcome, Outcome::NeedsChanges(vec![]));
    assert_eq!(report.requested, 1);
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].desired_key, "NicBoot");
    assert_eq!(report.unresolved[0].verdict, MatchVerdict::NoMatch);
    Ok(())
}

#[tokio::test]
async fn test_supermicro_suffix_resolves_to_actual_key() -> Result<(), anyhow::Error> {
    let bmc = FakeBmc::new(
        "smc1",
        smc_amd("AS -1115HS-TNR"),
        &[("SMTControl_0037", "Auto"), ("QuietBoot_00A1", "true")],
    );
    let events = bmc.events.clone();
    let server = open(bmc).await?;
    let store = store(
        r#"
Supermicro:
  AMD:
    AS -1115HS-TNR:
      SMTControl_1F2E: Enabled
      QuietBoot: "true"
"#,
    )?;
    let options = ReconcileOptions {
        fix: true,
        ..Default::default()
    };
    let report = reconcile(&server, &store, &options).await;
    assert!(report.unresolved.is_empty());
    assert_eq!(report.outcome.diffs()[0].attribute, "SMTControl_0037");
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["write smc1 SMTControl_0037 Some(OnReset)"]
    );
    Ok(())
}

#[tokio::test]
async fn test_close_match_needs_force() -> Result<(), anyhow::Error> {
    let store = store(
        r#"
Dell Inc.:
  Intel:
    PowerEdge R650:
      ProcCStates: Disabled
"#,
    )?;
    for (force, resolved) in [(false, false), (true, true)] {
        let bmc = FakeBmc::new("bmc1", dell_r650(), &[("ProcCState", "Enabled")]);
        let server = open(bmc).await?;
        let options = ReconcileOptions {
            force,
            ..Default::default()
        };
        let report = reconcile(&server, &store, &options).await;
        assert_eq!(report.unresolved.is_empty(), resolved);
        assert_eq!(report.outcome.diffs().len(), usize::from(resolved));
    }
    Ok(())
}

#[tokio::test]
async fn test_wildcard_model_is_flagged() -> Result<(), anyhow::Error> {
    let bmc = FakeBmc::new("smc1", smc_amd("AS -2015CS-TNR"), &[("SMTControl_0037", "Auto")]);
    let server = open(bmc).await?;
    let store = store(
        r#"
Supermicro:
  AMD:
    AS -1115HS-TNR:
      SMTControl: Enabled
    "*":
      SMTControl: Auto
"#,
    )?;
    let report = reconcile(&server, &store, &ReconcileOptions::default()).await;
    assert_eq!(report.source, Some(SettingsSource::Wildcard));
    assert_eq!(report.outcome, Outcome::Compliant);
    Ok(())
}

#[tokio::test]
async fn test_missing_definition_skips_without_reboot() -> Result<(), anyhow::Error> {
    let bmc = FakeBmc::new("hpe1", ServerIdentity::new("HPE", Architecture::Intel, "DL380"), &[]);
    let events = bmc.events.clone();
    let server = open(bmc).await?;
    let options = ReconcileOptions {
        reboot: true,
        ..Default::default()
    };
    let report = reconcile(&server, &store(DELL_STORE)?, &options).await;
    assert!(matches!(report.outcome, Outcome::Skipped(_)));
    assert_eq!(report.source, None);
    assert_eq!(report.reboot, RebootStatus::NotRequested);
    assert!(events.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rejected_fix_is_not_rebooted() -> Result<(), anyhow::Error> {
    let mut bmc = FakeBmc::new("bmc1", dell_r650(), &[("PowerProfile", "Performance")]);
    let diagnostic = "[{\"MessageId\": \"Base.1.12.PropertyValueNotInList\"}]".to_string();
    bmc.reject_writes = Some(diagnostic.clone());
    let events = bmc.events.clone();
    let server = open(bmc).await?;
    let options = ReconcileOptions {
        fix: true,
        reboot: true,
        force: false,
    };
    let report = reconcile(&server, &store(DELL_STORE)?, &options).await;
    assert_eq!(report.outcome, Outcome::FixFailed(diagnostic));
    assert_eq!(report.reboot, RebootStatus::NotRequested);
    assert!(events.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reboot_powers_on_a_server_that_is_off() -> Result<(), anyhow::Error> {
    let mut bmc = FakeBmc::new("bmc1", dell_r650(), &[("PowerProfile", "Balanced")]);
    bmc.power = PowerState::Off;
    let server = open(bmc).await?;
    let options = ReconcileOptions {
        reboot: true,
        ..Default::default()
    };
    let report = reconcile(&server, &store(DELL_STORE)?, &options).await;
    assert_eq!(report.reboot, RebootStatus::Issued(ResetType::On));
    Ok(())
}

#[tokio::test]
async fn test_failed_login_is_recorded() -> Result<(), anyhow::Error> {
    let mut pending = FakeBmc::new("bmc4", dell_r650(), &[]);
    pending.read_error = Some("Bios settings are pending".to_string());
    let connector = FakeConnector::new(vec![
        FakeBmc::new("bmc1", dell_r650(), &[("PowerProfile", "Balanced")]),
        FakeBmc::new("bmc3", dell_r650(), &[("PowerProfile", "Performance")]),
        pending,
    ]);
    let orchestrator = FleetOrchestrator::new(connector);
    let fleet = orchestrator
        .connect(&[entry("bmc1"), entry("bmc2"), entry("bmc3"), entry("bmc4")])
        .await;
    assert_eq!(fleet.servers.len(), 2);
    assert_eq!(fleet.failures.len(), 2);
    assert_eq!(fleet.failures[0].host, "bmc2");
    assert!(fleet.failures[0].unreachable);
    assert_eq!(fleet.failures[1].host, "bmc4");
    assert!(!fleet.failures[1].unreachable);

    let report = orchestrator
        .run(&fleet, &store(DELL_STORE)?, &ReconcileOptions::default())
        .await;
    assert_eq!(report.reports.len(), 2);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.needing_changes().count(), 1);
    assert_eq!(report.reports[0].host, "bmc1");
    assert_eq!(report.reports[0].outcome, Outcome::Compliant);
    fleet.close().await;
    Ok(())
}

#[tokio::test]
async fn test_local_host_reboots_last() -> Result<(), anyhow::Error> {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut bmcs = Vec::new();
    for (name, delay) in [("local", 0), ("a", 30), ("b", 10), ("c", 20)] {
        let mut bmc = FakeBmc::new(name, dell_r650(), &[("PowerProfile", "Performance")]);
        bmc.events = events.clone();
        bmc.reset_delay = Duration::from_millis(delay);
        bmcs.push(bmc);
    }
    let orchestrator =
        FleetOrchestrator::new(FakeConnector::new(bmcs)).with_local_host(Some("local".to_string()));
    let hosts = [entry("local"), entry("a"), entry("b"), entry("c")];
    let ordered: Vec<String> = orchestrator
        .order_hosts(&hosts)
        .into_iter()
        .map(|h| h.name)
        .collect();
    assert_eq!(ordered, ["a", "b", "c", "local"]);

    let fleet = orchestrator.connect(&hosts).await;
    let options = ReconcileOptions {
        fix: true,
        reboot: true,
        force: false,
    };
    let report = orchestrator.run(&fleet, &store(DELL_STORE)?, &options).await;
    assert_eq!(report.rebooted().count(), 4);
    assert_eq!(report.reports.last().map(|r| r.host.as_str()), Some("local"));

    let resets: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("reset "))
        .cloned()
        .collect();
    assert_eq!(resets.len(), 4);
    assert_eq!(resets[3], "reset local GracefulRestart");

    fleet.close().await;
    let closes = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("close "))
        .count();
    assert_eq!(closes, 4);
    Ok(())
}

#[tokio::test]
async fn test_reset_bios_local_host_last() -> Result<(), anyhow::Error> {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut bmcs = Vec::new();
    for name in ["a", "local", "b"] {
        let mut bmc = FakeBmc::new(name, dell_r650(), &[]);
        bmc.events = events.clone();
        bmcs.push(bmc);
    }
    let orchestrator =
        FleetOrchestrator::new(FakeConnector::new(bmcs)).with_local_host(Some("local".to_string()));
    let fleet = orchestrator
        .connect(&[entry("a"), entry("local"), entry("b")])
        .await;
    let reports = orchestrator.reset_bios(&fleet, true).await;
    assert!(reports.iter().all(|r| r.result.is_ok()));
    assert_eq!(
        events.lock().unwrap().last().map(String::as_str),
        Some("reset local GracefulRestart")
    );
    Ok(())
}

#[tokio::test]
async fn test_compare_hosts() -> Result<(), anyhow::Error> {
    let attrs = [("PowerProfile", "Balanced"), ("BootMode", "Uefi")];
    let a = open(FakeBmc::new("a", dell_r650(), &attrs)).await?;
    let b = open(FakeBmc::new("b", dell_r650(), &[("PowerProfile", "Performance")])).await?;
    assert!(compare_hosts(&a, &a, false)?.is_identical());

    let cmp = compare_hosts(&a, &b, false)?;
    assert_eq!(cmp.changed().count(), 1);
    assert_eq!(cmp.not_present().count(), 1);

    let amd = open(FakeBmc::new("c", smc_amd("AS -1115HS-TNR"), &attrs)).await?;
    let err = compare_hosts(&a, &amd, false).err().context("expected an error")?;
    assert!(matches!(err, BiosError::Incomparable(_)));
    Ok(())
}

#[tokio::test]
async fn test_save_defaults_needs_force_to_overwrite() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("defaults-db.yml");

    let first = open(FakeBmc::new("a", dell_r650(), &[("PowerProfile", "Performance")])).await?;
    let mut db = DefaultsDatabase::load(&path)?;
    let report = db.save_servers(std::slice::from_ref(&first), false)?;
    assert_eq!(report.added, ["Dell Inc./Intel/PowerEdge R650"]);
    let written = std::fs::read_to_string(&path)?;
    assert!(written.starts_with("# Bios Defaults Database\n# This should contain"));

    let second = open(FakeBmc::new("b", dell_r650(), &[("PowerProfile", "Balanced")])).await?;
    let mut db = DefaultsDatabase::load(&path)?;
    let report = db.save_servers(std::slice::from_ref(&second), false)?;
    assert!(!report.changed());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(std::fs::read_to_string(&path)?, written);

    // The second server differs from what was recorded
    let diff = db.diff_against_defaults(&second)?;
    assert_eq!(
        diff.differences,
        vec![DiffRecord {
            attribute: "PowerProfile".to_string(),
            current: AttributeValue::from("Balanced"),
            desired: AttributeValue::from("Performance"),
        }]
    );
    assert!(diff.missing.is_empty() && diff.extra.is_empty());

    let report = db.save_servers(std::slice::from_ref(&second), true)?;
    assert_eq!(report.overwritten.len(), 1);
    let db = DefaultsDatabase::load(&path)?;
    assert!(db.diff_against_defaults(&second)?.is_default());

    let hpe = open(FakeBmc::new("c", ServerIdentity::new("HPE", Architecture::Intel, "DL380"), &[])).await?;
    match db.diff_against_defaults(&hpe) {
        Err(BiosError::MissingDefinition { vendor, .. }) => assert_eq!(vendor, "HPE"),
        other => return Err(anyhow!("expected MissingDefinition, got {other:?}")),
    }
    Ok(())
}

#[tokio::test]
async fn test_defaults_diff_reports_missing_and_extra_settings() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("defaults-db.yml");
    let recorded = open(FakeBmc::new(
        "a",
        dell_r650(),
        &[("PowerProfile", "Performance"), ("SriovGlobalEnable", "Enabled")],
    ))
    .await?;
    let mut db = DefaultsDatabase::load(&path)?;
    db.save_servers(std::slice::from_ref(&recorded), false)?;

    // Same values, but a newer BIOS renamed one setting
    let upgraded = open(FakeBmc::new(
        "b",
        dell_r650(),
        &[("PowerProfile", "Performance"), ("SriovEnable", "Enabled")],
    ))
    .await?;
    let diff = db.diff_against_defaults(&upgraded)?;
    assert!(diff.differences.is_empty());
    assert_eq!(diff.missing, ["SriovGlobalEnable"]);
    assert_eq!(diff.extra, ["SriovEnable"]);
    assert!(!diff.is_default());
    assert!(diff.is_incomplete_definition());

    // A real difference is not an incomplete definition, even with renamed keys
    let tuned = open(FakeBmc::new(
        "c",
        dell_r650(),
        &[("PowerProfile", "Balanced"), ("SriovEnable", "Enabled")],
    ))
    .await?;
    let diff = db.diff_against_defaults(&tuned)?;
    assert_eq!(diff.differences.len(), 1);
    assert_eq!(diff.extra, ["SriovEnable"]);
    assert!(!diff.is_incomplete_definition());
    Ok(())
}
