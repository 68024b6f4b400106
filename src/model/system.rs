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

/// The ResetType values a ComputerSystem.Reset action can be asked for.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetType {
    On,
    ForceOff,
    GracefulShutdown,
    GracefulRestart,
    ForceRestart,
    Nmi,
    ForceOn,
    PushPowerButton,
    PowerCycle,
}

impl fmt::Display for ResetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for ResetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "On" => ResetType::On,
            "ForceOff" => ResetType::ForceOff,
            "GracefulShutdown" => ResetType::GracefulShutdown,
            "GracefulRestart" => ResetType::GracefulRestart,
            "ForceRestart" => ResetType::ForceRestart,
            "Nmi" => ResetType::Nmi,
            "ForceOn" => ResetType::ForceOn,
            "PushPowerButton" => ResetType::PushPowerButton,
            "PowerCycle" => ResetType::PowerCycle,
            x => return Err(format!("Unknown ResetType {x}")),
        })
    }
}

/// Picks the least disruptive way to get a server through a reboot.
/// A server that isn't on just gets turned on.
pub fn select_reset_type(power_state: PowerState, allowed: &[ResetType]) -> ResetType {
    if power_state != PowerState::On {
        return ResetType::On;
    }
    [ResetType::GracefulRestart, ResetType::ForceRestart]
        .into_iter()
        .find(|t| allowed.contains(t))
        .unwrap_or(ResetType::On)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
    PoweringOff,
    PoweringOn,
    Unknown,
}

impl PowerState {
    pub fn from_redfish(s: Option<&str>) -> Self {
        match s {
            Some("On") => PowerState::On,
            Some("Off") => PowerState::Off,
            Some("PoweringOn") => PowerState::PoweringOn,
            Some("PoweringOff") => PowerState::PoweringOff,
            _ => PowerState::Unknown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResetAction {
    pub target: String,
    #[serde(rename = "ResetType@Redfish.AllowableValues")]
    pub allowable_values: Option<Vec<String>>,
    // Supermicro lists the allowable values in a separate ActionInfo resource
    #[serde(rename = "@Redfish.ActionInfo")]
    pub action_info: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct SystemActions {
    #[serde(rename = "#ComputerSystem.Reset")]
    pub reset: Option<ResetAction>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ActionParameter {
    pub name: Option<String>,
    pub allowable_values: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ActionInfo {
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

/// The parts of https://redfish.dmtf.org/schemas/v1/ComputerSystem.v1_17_0.json that
/// identify a server and let us reset it.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ComputerSystem {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub bios_version: Option<String>,
    pub power_state: Option<String>,
    pub processors: Option<ODataId>,
    pub bios: Option<ODataId>,
    #[serde(default)]
    pub actions: SystemActions,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_system_parser() {
        let data = json!({
            "@odata.id": "/redfish/v1/Systems/1",
            "Manufacturer": "Supermicro",
            "Model": "AS -1115HS-TNR",
            "BiosVersion": "1.4",
            "PowerState": "On",
            "Processors": {"@odata.id": "/redfish/v1/Systems/1/Processors"},
            "Bios": {"@odata.id": "/redfish/v1/Systems/1/Bios"},
            "Actions": {
                "#ComputerSystem.Reset": {
                    "target": "/redfish/v1/Systems/1/Actions/ComputerSystem.Reset",
                    "@Redfish.ActionInfo": "/redfish/v1/Systems/1/ResetActionInfo"
                }
            }
        });
        let result: ComputerSystem = serde_json::from_value(data).unwrap();
        assert_eq!(result.manufacturer.as_deref(), Some("Supermicro"));
        let reset = result.actions.reset.unwrap();
        assert!(reset.allowable_values.is_none());
        assert_eq!(
            reset.action_info.as_deref(),
            Some("/redfish/v1/Systems/1/ResetActionInfo")
        );
    }

    #[test]
    fn test_select_reset_type() {
        use ResetType::*;
        assert_eq!(
            select_reset_type(PowerState::Off, &[GracefulRestart, ForceRestart]),
            On
        );
        assert_eq!(
            select_reset_type(PowerState::On, &[ForceRestart, GracefulRestart]),
            GracefulRestart
        );
        assert_eq!(select_reset_type(PowerState::On, &[On, ForceRestart]), ForceRestart);
        assert_eq!(select_reset_type(PowerState::On, &[ForceOff]), On);
        assert_eq!(select_reset_type(PowerState::Unknown, &[GracefulRestart]), On);
    }

    #[test]
    fn test_reset_type_round_trip_names() {
        assert_eq!("GracefulRestart".parse::<ResetType>(), Ok(ResetType::GracefulRestart));
        assert!("Bogus".parse::<ResetType>().is_err());
    }
}
