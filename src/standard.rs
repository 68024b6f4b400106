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
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::identity::{Architecture, ServerIdentity};
use crate::jsonmap;
use crate::model::service_root::ServiceRoot;
use crate::model::{
    ActionInfo, ApplyTime, AttributeSet, Bios, Collection, ComputerSystem, Manager, PowerState,
    Processor, ResetType, SettingsApplyTime,
};
use crate::network::RedfishHttpClient;
use crate::{BiosError, ManagementSession};

// BIOS writes can take a while on some BMCs
const PATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// A logged-in Redfish session to one BMC, using only standard Redfish resources.
pub struct RedfishSession {
    client: RedfishHttpClient,
    session_location: Option<String>,
    identity: ServerIdentity,
    system_url: String,
    reset_target: Option<String>,
    reset_types: Vec<ResetType>,
    bios_url: String,
    settings_url: String,
    reset_bios_target: Option<String>,
    apply_times: Vec<ApplyTime>,
}

/// Everything learned about the server while connecting.
struct Discovery {
    identity: ServerIdentity,
    system_url: String,
    reset_target: Option<String>,
    reset_types: Vec<ResetType>,
    bios_url: String,
    settings_url: String,
    reset_bios_target: Option<String>,
    apply_times: Vec<ApplyTime>,
}

impl RedfishSession {
    /// Log in and discover the server. The session is logged out again if discovery fails.
    pub async fn open(mut client: RedfishHttpClient) -> Result<Self, BiosError> {
        let session_location = match client.login().await {
            Ok(location) => location,
            Err(BiosError::HTTPErrorCode { status_code, .. })
                if status_code == StatusCode::NOT_FOUND
                    || status_code == StatusCode::METHOD_NOT_ALLOWED =>
            {
                warn!(
                    "{}: no SessionService ({status_code}), using basic auth",
                    client.host()
                );
                None
            }
            Err(e) => return Err(e),
        };

        let d = match discover(&client).await {
            Ok(d) => d,
            Err(e) => {
                if let Some(location) = &session_location {
                    if let Err(logout_err) = client.logout(location).await {
                        debug!("{}: logout after failed discovery: {logout_err}", client.host());
                    }
                }
                return Err(e);
            }
        };
        info!(
            "{}: {} BIOS {} BMC {}",
            client.host(),
            d.identity.class(),
            d.identity.bios_version.as_deref().unwrap_or("unknown"),
            d.identity.bmc_firmware_version.as_deref().unwrap_or("unknown"),
        );
        Ok(RedfishSession {
            client,
            session_location,
            identity: d.identity,
            system_url: d.system_url,
            reset_target: d.reset_target,
            reset_types: d.reset_types,
            bios_url: d.bios_url,
            settings_url: d.settings_url,
            reset_bios_target: d.reset_bios_target,
            apply_times: d.apply_times,
        })
    }

    async fn get_bios(&self) -> Result<Bios, BiosError> {
        get_bios(&self.client, &self.bios_url).await
    }
}

#[async_trait]
impl ManagementSession for RedfishSession {
    fn host(&self) -> &str {
        self.client.host()
    }

    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    async fn read_attributes(&self) -> Result<AttributeSet, BiosError> {
        let bios = self.get_bios().await?;
        Ok(AttributeSet::from_json_map(&bios.attributes))
    }

    async fn write_attributes(
        &self,
        attributes: &AttributeSet,
        apply_time: Option<ApplyTime>,
    ) -> Result<(), BiosError> {
        let mut body = serde_json::Map::new();
        body.insert(
            "Attributes".to_string(),
            serde_json::Value::Object(attributes.to_json_map()),
        );
        if let Some(apply_time) = apply_time {
            body.insert(
                "@Redfish.SettingsApplyTime".to_string(),
                serde_json::to_value(SettingsApplyTime { apply_time }).map_err(|source| {
                    BiosError::JsonSerializeError {
                        url: self.settings_url.clone(),
                        object_debug: format!("{apply_time:?}"),
                        source,
                    }
                })?,
            );
        }
        self.client
            .patch(&self.settings_url, body, Some(PATCH_TIMEOUT))
            .await
            .map(|_status_code| ())
            .map_err(rejected)
    }

    fn supported_apply_times(&self) -> &[ApplyTime] {
        &self.apply_times
    }

    fn advertised_reset_types(&self) -> &[ResetType] {
        &self.reset_types
    }

    async fn power_state(&self) -> Result<PowerState, BiosError> {
        let system: ComputerSystem = self.client.get(&self.system_url).await?;
        Ok(PowerState::from_redfish(system.power_state.as_deref()))
    }

    async fn reset(&self, reset_type: ResetType) -> Result<(), BiosError> {
        let target = self.reset_target.as_deref().ok_or_else(|| {
            BiosError::NotSupported(format!("{}: no ComputerSystem.Reset action", self.host()))
        })?;
        let mut body = HashMap::new();
        body.insert("ResetType", reset_type);
        self.client
            .post(target, body)
            .await
            .map(|_resp| ())
            .map_err(rejected)
    }

    async fn reset_bios(&self) -> Result<(), BiosError> {
        let target = self.reset_bios_target.as_deref().ok_or_else(|| {
            BiosError::NotSupported(format!("{}: no Bios.ResetBios action", self.host()))
        })?;
        self.client
            .post(target, serde_json::json!({}))
            .await
            .map(|_resp| ())
            .map_err(rejected)
    }

    async fn close(&self) -> Result<(), BiosError> {
        match &self.session_location {
            Some(location) => self.client.logout(location).await,
            None => Ok(()),
        }
    }
}

/// A 4xx answer to a write or an action means the BMC refused it. Keep its diagnostic.
fn rejected(e: BiosError) -> BiosError {
    match e {
        BiosError::HTTPErrorCode {
            url,
            status_code,
            response_body,
        } if status_code.is_client_error() => {
            let diagnostic = jsonmap::body_diagnostic(&response_body, &url);
            BiosError::Rejected {
                url,
                status_code,
                diagnostic,
            }
        }
        // The session was accepted earlier, so this is a refusal of this request
        BiosError::AuthError {
            url,
            status_code,
            diagnostic,
            ..
        } => BiosError::Rejected {
            url,
            status_code,
            diagnostic,
        },
        e => e,
    }
}

async fn get_bios(client: &RedfishHttpClient, bios_url: &str) -> Result<Bios, BiosError> {
    let bios: Bios = client.get(bios_url).await?;
    // Supermicro answers 200 with an error object while changes are pending
    if let Some(error) = &bios.error {
        let detail = match error.as_object() {
            Some(obj) => jsonmap::error_diagnostic(obj, bios_url),
            None => error.to_string(),
        };
        return Err(BiosError::ResourceError {
            url: bios_url.to_string(),
            detail,
        });
    }
    Ok(bios)
}

async fn discover(client: &RedfishHttpClient) -> Result<Discovery, BiosError> {
    let root: ServiceRoot = client.get("").await?;
    let root_vendor = root.vendor_string();
    debug!(
        "{}: BMC vendor {}",
        client.host(),
        root_vendor.as_deref().unwrap_or("Unknown")
    );

    let systems_url = root
        .systems
        .as_ref()
        .map(|s| s.odata_id.clone())
        .unwrap_or_else(|| "Systems".to_string());
    let systems: Collection = client.get(&systems_url).await?;
    let system_url = systems.first_member(&systems_url)?.to_string();
    let system: ComputerSystem = client.get(&system_url).await?;

    let processors_url = system
        .processors
        .as_ref()
        .map(|p| p.odata_id.clone())
        .unwrap_or_else(|| format!("{system_url}/Processors"));
    let processors: Collection = client.get(&processors_url).await?;
    let processor: Processor = client
        .get(processors.first_member(&processors_url)?)
        .await?;
    let architecture =
        Architecture::from_processor_model(processor.model.as_deref().unwrap_or_default());

    let (reset_target, reset_types) = match &system.actions.reset {
        Some(action) => {
            let allowed = match (&action.allowable_values, &action.action_info) {
                (Some(values), _) => values.clone(),
                (None, Some(info_url)) => {
                    let info: ActionInfo = client.get(info_url).await?;
                    info.parameters
                        .into_iter()
                        .next()
                        .and_then(|p| p.allowable_values)
                        .unwrap_or_default()
                }
                (None, None) => Vec::new(),
            };
            let types = allowed
                .iter()
                .filter_map(|t| match t.parse::<ResetType>() {
                    Ok(rt) => Some(rt),
                    Err(e) => {
                        debug!("{}: {e}", client.host());
                        None
                    }
                })
                .collect();
            (Some(action.target.clone()), types)
        }
        None => {
            warn!("{}: system has no reset action", client.host());
            (None, Vec::new())
        }
    };

    let bios_url = system
        .bios
        .as_ref()
        .map(|b| b.odata_id.clone())
        .unwrap_or_else(|| format!("{system_url}/Bios"));
    let bios = get_bios(client, &bios_url).await?;
    let settings_url = bios
        .redfish_settings
        .as_ref()
        .and_then(|s| s.settings_object.as_ref())
        .map(|o| o.odata_id.clone())
        .unwrap_or_else(|| bios_url.clone());
    let apply_times = bios.supported_apply_times();
    let reset_bios_target = bios.actions.reset_bios.as_ref().map(|a| a.target.clone());

    let bmc_firmware_version = match &root.managers {
        Some(managers) => match manager_firmware(client, &managers.odata_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!("{}: could not read BMC firmware version: {e}", client.host());
                None
            }
        },
        None => None,
    };

    let vendor = system
        .manufacturer
        .clone()
        .or(root_vendor)
        .ok_or_else(|| BiosError::MissingKey {
            key: "Manufacturer".to_string(),
            url: system_url.clone(),
        })?;
    let model = system.model.clone().ok_or_else(|| BiosError::MissingKey {
        key: "Model".to_string(),
        url: system_url.clone(),
    })?;
    let identity = ServerIdentity::new(vendor.trim(), architecture, model.trim())
        .with_versions(system.bios_version.clone(), bmc_firmware_version);

    Ok(Discovery {
        identity,
        system_url,
        reset_target,
        reset_types,
        bios_url,
        settings_url,
        reset_bios_target,
        apply_times,
    })
}

async fn manager_firmware(
    client: &RedfishHttpClient,
    managers_url: &str,
) -> Result<Option<String>, BiosError> {
    let managers: Collection = client.get(managers_url).await?;
    let manager: Manager = client.get(managers.first_member(managers_url)?).await?;
    Ok(manager.firmware_version)
}
