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
/* BIOS settings fleet tool
 * Checks, fixes and compares BIOS settings on servers through their BMC's Redfish API.
 *
 * USAGE: ./biosfleet -c host_config.yml -b bios_settings.yml --fix --reboot
 * Run with -h for help.
 * Run with `-v` for more output.
 */

use std::path::Path;

use anyhow::{anyhow, Context};
use biosfleet::compare::{compare_hosts, AttributeDiff};
use biosfleet::defaults::{custom_settings, DefaultsDiff};
use biosfleet::fleet::{local_bmc_address, DEFAULT_CONCURRENCY};
use biosfleet::{
    DefaultsDatabase, DesiredStateStore, Fleet, FleetOrchestrator, FleetReport, HostConfig,
    ReconcileOptions, RedfishClientPool,
};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use tracing::{error, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::prelude::*;

const DEFAULT_HOST_CONFIG: &str = "host_config.csv";
const DEFAULT_BIOS_SETTINGS: &str = "bios_settings.yml";
const DEFAULT_DEFAULTS_DB: &str = "defaults-db.yml";

enum Mode {
    Dump,
    Check,
    Diff(String, String),
    DiffDefaults,
    SaveDefaults,
    ResetBios,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = getopts::Options::new();

    opts.optflag("h", "help", "Print this help");
    opts.optflag("v", "verbose", "Log at DEBUG level. Default is INFO");
    opts.optflag("", "version", "Display version number");
    opts.optopt(
        "c",
        "hostconfigfile",
        "Host list, YAML or CSV. Default is host_config.csv",
        "FILE",
    );
    opts.optopt(
        "b",
        "bios",
        "Desired BIOS settings file. Default is bios_settings.yml",
        "FILE",
    );
    opts.optflag(
        "",
        "fix",
        "Correct any BIOS settings that do not match the definition",
    );
    opts.optflag(
        "",
        "reboot",
        "Reboot servers. With --fix only the servers that were changed",
    );
    opts.optflag("", "dump", "Print out current BIOS settings only");
    opts.optflag(
        "",
        "save-defaults",
        "Save current BIOS settings to the defaults database. Should be factory reset values",
    );
    opts.optopt(
        "",
        "defaults-database",
        "Factory defaults database. Default is defaults-db.yml",
        "FILE",
    );
    opts.optflag(
        "f",
        "force",
        "Accept close BIOS setting name matches, and overwrite existing defaults",
    );
    opts.optflag(
        "",
        "reset-bios",
        "Reset BIOS to default settings. To also reboot, add --reboot",
    );
    opts.optmulti(
        "",
        "diff",
        "Compare two hosts' BIOS settings. Give it twice",
        "HOST",
    );
    opts.optflag(
        "",
        "normalize",
        "With --diff, strip vendor revision suffixes from setting names first",
    );
    opts.optflag(
        "",
        "diff-defaults",
        "Compare hosts' BIOS settings to factory defaults",
    );
    opts.optmulti(
        "",
        "bmc-ips",
        "BMC address to use instead of the host config file. Repeat or comma separate",
        "IP",
    );
    opts.optopt("", "bmc-username", "Username for all --bmc-ips hosts", "USER");
    opts.optopt("", "bmc-password", "Password for all --bmc-ips hosts", "PASS");
    opts.optopt(
        "",
        "concurrency",
        "Hosts worked on at the same time. Default is 10",
        "N",
    );

    let args_given = opts.parse(&args[1..])?;
    if args_given.opt_present("h") {
        eprintln!("{}", opts.usage("biosfleet [options]"));
        return Ok(());
    }
    if args_given.opt_present("version") {
        println!("biosfleet version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let log_level = if args_given.opt_present("v") {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(log_level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);
    tracing_subscriber::registry()
        .with(Layer::default().compact())
        .with(env_filter)
        .init();

    let options = ReconcileOptions {
        fix: args_given.opt_present("fix"),
        reboot: args_given.opt_present("reboot"),
        force: args_given.opt_present("force"),
    };
    let defaults_path = args_given
        .opt_str("defaults-database")
        .unwrap_or_else(|| DEFAULT_DEFAULTS_DB.to_string());
    let concurrency = match args_given.opt_str("concurrency") {
        Some(n) => n
            .parse::<usize>()
            .with_context(|| format!("--concurrency {n}"))?,
        None => DEFAULT_CONCURRENCY,
    };

    let diff_hosts = args_given.opt_strs("diff");
    let mode = if !diff_hosts.is_empty() {
        match diff_hosts.as_slice() {
            [a, b] => Mode::Diff(a.clone(), b.clone()),
            _ => return Err(anyhow!("--diff needs exactly two hosts")),
        }
    } else if args_given.opt_present("diff-defaults") {
        Mode::DiffDefaults
    } else if args_given.opt_present("reset-bios") {
        Mode::ResetBios
    } else if args_given.opt_present("save-defaults") {
        Mode::SaveDefaults
    } else if args_given.opt_present("dump") {
        Mode::Dump
    } else {
        Mode::Check
    };

    let bmc_ips: Vec<String> = args_given
        .opt_strs("bmc-ips")
        .iter()
        .flat_map(|s| s.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let host_config = if !bmc_ips.is_empty() {
        let (Some(user), Some(password)) = (
            args_given.opt_str("bmc-username"),
            args_given.opt_str("bmc-password"),
        ) else {
            return Err(anyhow!(
                "You must provide --bmc-username and --bmc-password when using --bmc-ips"
            ));
        };
        info!("Using BMC IPs from the command line");
        HostConfig::from_bmc_ips(&bmc_ips, &user, &password)
    } else {
        let path = args_given
            .opt_str("c")
            .unwrap_or_else(|| DEFAULT_HOST_CONFIG.to_string());
        HostConfig::load(Path::new(&path))
            .with_context(|| format!("Unable to open host configuration file {path}"))?
    };

    let hosts = match &mode {
        Mode::Diff(a, b) => host_config.select(&[a.clone(), b.clone()])?,
        _ => host_config.hosts.clone(),
    };

    // Loaded before any BMC is touched, so a bad file fails the run up front
    let store = match mode {
        Mode::Check => {
            let path = args_given
                .opt_str("b")
                .unwrap_or_else(|| DEFAULT_BIOS_SETTINGS.to_string());
            let store = DesiredStateStore::load(Path::new(&path))
                .with_context(|| format!("Unable to parse BIOS settings file {path}"))?;
            if store.is_empty() {
                warn!("{path} defines no settings, every host will be skipped");
            }
            Some(store)
        }
        _ => None,
    };
    let defaults_db = match mode {
        Mode::DiffDefaults | Mode::SaveDefaults => Some(
            DefaultsDatabase::load(Path::new(&defaults_path))
                .with_context(|| format!("Unable to load defaults database {defaults_path}"))?,
        ),
        _ => None,
    };

    let local_host = if options.reboot {
        let addr = local_bmc_address().await;
        if let Some(a) = &addr {
            info!("This host's IPMI IP is: {a}");
        }
        addr
    } else {
        None
    };

    let pool = RedfishClientPool::builder().build()?;
    let orchestrator = FleetOrchestrator::new(pool)
        .with_concurrency(concurrency)
        .with_local_host(local_host);
    let fleet = orchestrator.connect(&hosts).await;

    let result = match mode {
        Mode::Dump => {
            dump(&fleet);
            Ok(())
        }
        Mode::Check => match &store {
            Some(store) => {
                let report = orchestrator.run(&fleet, store, &options).await;
                print_report(&report, &options);
                Ok(())
            }
            None => Err(anyhow!("no desired state loaded")),
        },
        Mode::Diff(a, b) => diff_two(&fleet, &a, &b, args_given.opt_present("normalize")),
        Mode::DiffDefaults => match &defaults_db {
            Some(db) => diff_defaults(&fleet, db),
            None => Err(anyhow!("no defaults database loaded")),
        },
        Mode::SaveDefaults => match defaults_db {
            Some(mut db) => db
                .save_servers(&fleet.servers, options.force)
                .map(|_report| ())
                .map_err(anyhow::Error::from),
            None => Err(anyhow!("no defaults database loaded")),
        },
        Mode::ResetBios => {
            for r in orchestrator.reset_bios(&fleet, options.reboot).await {
                if let Err(e) = r.result {
                    error!("{}: {e}", r.host);
                }
            }
            Ok(())
        }
    };

    fleet.close().await;
    result
}

fn dump(fleet: &Fleet) {
    for server in &fleet.servers {
        println!("{} Current BIOS settings:", server.hostname());
        let mut table = new_table(&["Setting", "Value"]);
        for (name, value) in server.attributes() {
            table.add_row(vec![Cell::new(name), Cell::new(value)]);
        }
        println!("{table}");
        println!();
    }
}

fn diff_two(fleet: &Fleet, a: &str, b: &str, normalize: bool) -> Result<(), anyhow::Error> {
    let (Some(left), Some(right)) = (fleet.find(a), fleet.find(b)) else {
        return Err(anyhow!("you must be able to connect to both hosts to diff them"));
    };
    let cmp = compare_hosts(left, right, normalize)?;
    if cmp.is_identical() {
        info!("The servers have identical BIOS settings");
        return Ok(());
    }

    let mut changed = Vec::new();
    for d in cmp.changed() {
        if let AttributeDiff::Changed { name, left, right } = d {
            changed.push(vec![Cell::new(name), Cell::new(left), Cell::new(right)]);
        }
    }
    if !changed.is_empty() {
        println!("Settings that differ:");
        print_rows(&["Setting", &cmp.left, &cmp.right], changed);
        println!();
    }

    let mut not_present = Vec::new();
    for d in cmp.not_present() {
        let row = match d {
            AttributeDiff::OnlyLeft { name, value } => {
                vec![Cell::new(name), Cell::new(value), Cell::new("-")]
            }
            AttributeDiff::OnlyRight { name, value } => {
                vec![Cell::new(name), Cell::new("-"), Cell::new(value)]
            }
            AttributeDiff::Changed { .. } => continue,
        };
        not_present.push(row);
    }
    if !not_present.is_empty() {
        println!("Settings present on only one host:");
        print_rows(&["Setting", &cmp.left, &cmp.right], not_present);
    }
    Ok(())
}

fn diff_defaults(fleet: &Fleet, db: &DefaultsDatabase) -> Result<(), anyhow::Error> {
    let mut diffs: Vec<DefaultsDiff> = Vec::new();
    for server in &fleet.servers {
        match db.diff_against_defaults(server) {
            Ok(d) => diffs.push(d),
            Err(e) => error!("{}: {e}", server.hostname()),
        }
    }

    let mut summary = new_table(&["Host", "Class", "Changed", "Missing", "Extra"]);
    let mut changed = new_table(&["Host", "Setting", "Default", "Current"]);
    for d in &diffs {
        summary.add_row(vec![
            Cell::new(&d.host),
            Cell::new(d.identity.class()),
            Cell::new(d.differences.len()),
            Cell::new(d.missing.len()),
            Cell::new(d.extra.len()),
        ]);
        for r in &d.differences {
            changed.add_row(vec![
                Cell::new(&d.host),
                Cell::new(&r.attribute),
                Cell::new(&r.desired),
                Cell::new(&r.current),
            ]);
        }
    }
    if !diffs.is_empty() {
        println!("{summary}");
    }
    if diffs.iter().any(|d| !d.missing.is_empty() || !d.extra.is_empty()) {
        warn!("Some hosts don't have the same settings as recorded, their BIOS version may differ");
    }

    let custom = custom_settings(&diffs);
    if custom.is_empty() {
        info!("None of the servers have non-default settings");
    } else {
        println!();
        println!("{changed}");
        println!();
        println!("Bios Differences (Edit these before adding to the bios_settings file):");
        println!("{}", serde_yaml::to_string(&custom)?);
    }
    Ok(())
}

fn print_report(report: &FleetReport, options: &ReconcileOptions) {
    for r in &report.reports {
        info!("{}: {}", r.host, r.outcome);
    }
    report.log_summary(options);

    let mut diffs = Vec::new();
    for r in &report.reports {
        for d in r.outcome.diffs() {
            diffs.push(vec![
                Cell::new(&r.host),
                Cell::new(&d.attribute),
                Cell::new(&d.current),
                Cell::new(&d.desired),
            ]);
        }
    }
    if !diffs.is_empty() {
        println!();
        print_rows(&["Host", "Setting", "Current", "Desired"], diffs);
    }

    let mut unresolved = Vec::new();
    for r in &report.reports {
        for m in &r.unresolved {
            unresolved.push(vec![
                Cell::new(&r.host),
                Cell::new(&m.desired_key),
                Cell::new(m.candidate.as_deref().unwrap_or("-")),
                Cell::new(format!("{:.1}", m.score)),
                Cell::new(&m.verdict),
            ]);
        }
    }
    if !unresolved.is_empty() {
        warn!("Some desired settings could not be matched, they were not checked:");
        println!();
        print_rows(&["Host", "Desired", "Closest", "Similarity", "Verdict"], unresolved);
    }
}

/// Bordered table with a bold header, wrapped to the terminal width.
fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

fn print_rows(headers: &[&str], rows: Vec<Vec<Cell>>) {
    let mut table = new_table(headers);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}
