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

use serde::{Deserialize, Serialize};

use crate::matcher::KeyNormalizer;

/// Processor architecture class. The desired-state and defaults files use the
/// `AMD` / `Intel` spelling as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "AMD")]
    Amd,
    Intel,
}

impl Architecture {
    /// AMD processor model strings start with 'A' ("AMD EPYC 9454"); everything else is
    /// treated as Intel.
    pub fn from_processor_model(model: &str) -> Self {
        if model.starts_with('A') {
            Architecture::Amd
        } else {
            Architecture::Intel
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Amd => "AMD",
            Architecture::Intel => "Intel",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a server is. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIdentity {
    /// System manufacturer, e.g. "Supermicro", "Dell Inc."
    pub vendor: String,
    pub architecture: Architecture,
    pub model: String,
    pub bios_version: Option<String>,
    pub bmc_firmware_version: Option<String>,
    normalizer: KeyNormalizer,
}

impl ServerIdentity {
    pub fn new(vendor: &str, architecture: Architecture, model: &str) -> Self {
        ServerIdentity {
            vendor: vendor.to_string(),
            architecture,
            model: model.to_string(),
            bios_version: None,
            bmc_firmware_version: None,
            normalizer: KeyNormalizer::for_vendor(vendor),
        }
    }

    pub fn with_versions(mut self, bios: Option<String>, bmc_firmware: Option<String>) -> Self {
        self.bios_version = bios;
        self.bmc_firmware_version = bmc_firmware;
        self
    }

    /// How this vendor's attribute names must be cleaned before they are compared.
    pub fn normalizer(&self) -> KeyNormalizer {
        self.normalizer
    }

    /// vendor/architecture/model, for log lines.
    pub fn class(&self) -> String {
        format!("{}/{}/{}", self.vendor, self.architecture, self.model)
    }
}
