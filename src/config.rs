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
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::BiosError;

/// Read and parse a YAML file.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, BiosError> {
    let contents = read_file(path)?;
    serde_yaml::from_str(&contents).map_err(|source| BiosError::YamlError {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<String, BiosError> {
    fs::read_to_string(path).map_err(|source| BiosError::FileError {
        path: path.to_path_buf(),
        source,
    })
}

/// One BMC to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Hostname or IP address of the BMC
    pub name: String,
    pub user: String,
    pub password: String,
}

/// The list of BMCs in the fleet. Deserialized from a YAML file of the form
/// `hosts: [{name, user, password}, ...]`, or a CSV file with a `name,user,password` header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    pub hosts: Vec<HostEntry>,
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, BiosError> {
        let contents = read_file(path)?;
        Self::parse(&contents).map_err(|e| match e {
            BiosError::InvalidConfig(msg) => {
                BiosError::InvalidConfig(format!("{}: {msg}", path.display()))
            }
            e => e,
        })
    }

    /// YAML first. Anything that doesn't parse as a YAML mapping is tried as CSV.
    pub fn parse(contents: &str) -> Result<Self, BiosError> {
        match serde_yaml::from_str::<HostConfig>(contents) {
            Ok(conf) => Ok(conf),
            Err(e) => {
                debug!("Host list is not YAML ({e}), trying CSV");
                Self::parse_csv(contents)
            }
        }
    }

    fn parse_csv(contents: &str) -> Result<Self, BiosError> {
        let mut lines = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| BiosError::InvalidConfig("empty host list".to_string()))?
            .split(',')
            .map(str::trim)
            .collect();
        let column = |name: &str| {
            header
                .iter()
                .position(|h| *h == name)
                .ok_or_else(|| BiosError::InvalidConfig(format!("CSV header has no '{name}' column")))
        };
        let (name_col, user_col, pass_col) = (column("name")?, column("user")?, column("password")?);

        let mut hosts = Vec::new();
        for (n, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let field = |col: usize| {
                fields.get(col).map(|s| s.to_string()).ok_or_else(|| {
                    BiosError::InvalidConfig(format!("CSV row {} is missing fields", n + 2))
                })
            };
            hosts.push(HostEntry {
                name: field(name_col)?,
                user: field(user_col)?,
                password: field(pass_col)?,
            });
        }
        Ok(HostConfig { hosts })
    }

    /// A host list for BMC addresses given on the command line, all sharing one credential.
    pub fn from_bmc_ips(ips: &[String], user: &str, password: &str) -> Self {
        HostConfig {
            hosts: ips
                .iter()
                .map(|ip| HostEntry {
                    name: ip.clone(),
                    user: user.to_string(),
                    password: password.to_string(),
                })
                .collect(),
        }
    }

    /// The entries for the given host names, in the order given.
    pub fn select(&self, names: &[String]) -> Result<Vec<HostEntry>, BiosError> {
        names
            .iter()
            .map(|name| {
                self.hosts
                    .iter()
                    .find(|h| &h.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        BiosError::InvalidConfig(format!("host {name} is not in the host list"))
                    })
            })
            .collect()
    }
}
