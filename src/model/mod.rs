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
use serde::{Deserialize, Serialize};

pub mod attribute;
pub use attribute::{AttributeSet, AttributeValue};

pub mod bios;
pub use bios::*;

pub mod service_root;

pub mod system;
pub use system::*;

use crate::BiosError;

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ODataId {
    #[serde(rename = "@odata.id")]
    pub odata_id: String,
}

/// Any Redfish resource collection (`Systems`, `Managers`, `Processors`). We only
/// ever look at the members.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Collection {
    #[serde(default)]
    pub members: Vec<ODataId>,
}

impl Collection {
    /// BIOS tooling only drives single-node BMCs, so the first member is the one.
    pub fn first_member(&self, url: &str) -> Result<&str, BiosError> {
        self.members
            .first()
            .map(|m| m.odata_id.as_str())
            .ok_or_else(|| BiosError::MissingKey {
                key: "Members".to_string(),
                url: url.to_string(),
            })
    }
}

/// https://redfish.dmtf.org/schemas/v1/Manager.v1_10_0.json
/// Only the BMC firmware version matters here.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Manager {
    pub firmware_version: Option<String>,
}

/// https://redfish.dmtf.org/schemas/v1/Processor.v1_11_0.json
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Processor {
    pub model: Option<String>,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    #[test]
    fn test_collection_first_member() {
        let data = json!({
            "@odata.id": "/redfish/v1/Systems",
            "Members": [{"@odata.id": "/redfish/v1/Systems/1"}],
            "Members@odata.count": 1
        });
        let result: super::Collection = serde_json::from_value(data).unwrap();
        assert_eq!(
            result.first_member("Systems").unwrap(),
            "/redfish/v1/Systems/1"
        );
    }

    #[test]
    fn test_empty_collection() {
        let result: super::Collection = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(
            result.first_member("Managers"),
            Err(crate::BiosError::MissingKey { .. })
        ));
    }
}
