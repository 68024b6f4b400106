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
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ODataId;

/// When a settings change takes effect.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum ApplyTime {
    AtMaintenanceWindowStart,
    Immediate,
    InMaintenanceWindowOnReset,
    OnReset, // for bios settings
}

impl fmt::Display for ApplyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for ApplyTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AtMaintenanceWindowStart" => ApplyTime::AtMaintenanceWindowStart,
            "Immediate" => ApplyTime::Immediate,
            "InMaintenanceWindowOnReset" => ApplyTime::InMaintenanceWindowOnReset,
            "OnReset" => ApplyTime::OnReset,
            x => return Err(format!("Unknown ApplyTime {x}")),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct SettingsApplyTime {
    pub apply_time: ApplyTime,
}

/// The `@Redfish.Settings` annotation: where pending changes are written and
/// which apply times the BMC accepts for them.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct RedfishSettings {
    pub settings_object: Option<ODataId>,
    pub supported_apply_times: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActionTarget {
    pub target: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct BiosActions {
    #[serde(rename = "#Bios.ResetBios")]
    pub reset_bios: Option<ActionTarget>,
}

/// https://redfish.dmtf.org/schemas/v1/Bios.v1_2_0.json
/// Attributes stay raw JSON here, they become an AttributeSet once read.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Bios {
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub actions: BiosActions,
    #[serde(rename = "@Redfish.Settings")]
    pub redfish_settings: Option<RedfishSettings>,
    // Some BMCs answer 200 with an error body while pending changes block the resource
    #[serde(rename = "error")]
    pub error: Option<serde_json::Value>,
}

impl Bios {
    pub fn supported_apply_times(&self) -> Vec<ApplyTime> {
        self.redfish_settings
            .as_ref()
            .and_then(|s| s.supported_apply_times.as_ref())
            .map(|v| v.iter().filter_map(|t| t.parse().ok()).collect())
            .unwrap_or_default()
    }
}
