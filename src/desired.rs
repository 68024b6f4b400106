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
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::load_yaml;
use crate::identity::ServerIdentity;
use crate::model::AttributeSet;
use crate::BiosError;

/// Model key that applies to every model of a vendor/architecture without its own entry.
pub const WILDCARD_MODEL: &str = "*";

/// vendor -> architecture -> model -> attributes. The shape of both the desired-state file
/// and the defaults database.
pub type ClassMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, AttributeSet>>>;

/// Where a server's desired settings came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsSource {
    /// An entry for exactly this model
    Model,
    /// The `*` entry of the vendor/architecture
    Wildcard,
}

impl fmt::Display for SettingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DesiredSettings<'a> {
    pub settings: &'a AttributeSet,
    pub source: SettingsSource,
}

/// The operator's desired BIOS settings per class of server. Read only once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredStateStore {
    classes: ClassMap,
}

impl DesiredStateStore {
    pub fn new(classes: ClassMap) -> Self {
        DesiredStateStore { classes }
    }

    /// Load the YAML desired-state file. An empty file is an empty store.
    pub fn load(path: &Path) -> Result<Self, BiosError> {
        let classes: Option<ClassMap> = load_yaml(path)?;
        Ok(DesiredStateStore::new(classes.unwrap_or_default()))
    }

    /// Settings for a server class: the exact model entry, else the `*` entry of the
    /// same vendor/architecture.
    pub fn resolve(
        &self,
        vendor: &str,
        architecture: &str,
        model: &str,
    ) -> Result<DesiredSettings<'_>, BiosError> {
        let missing = || BiosError::MissingDefinition {
            vendor: vendor.to_string(),
            architecture: architecture.to_string(),
            model: model.to_string(),
        };
        let models = self
            .classes
            .get(vendor)
            .and_then(|archs| archs.get(architecture))
            .ok_or_else(missing)?;
        if let Some(settings) = models.get(model) {
            return Ok(DesiredSettings {
                settings,
                source: SettingsSource::Model,
            });
        }
        models
            .get(WILDCARD_MODEL)
            .map(|settings| DesiredSettings {
                settings,
                source: SettingsSource::Wildcard,
            })
            .ok_or_else(missing)
    }

    pub fn resolve_for(&self, identity: &ServerIdentity) -> Result<DesiredSettings<'_>, BiosError> {
        self.resolve(
            &identity.vendor,
            identity.architecture.as_str(),
            &identity.model,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeValue;

    const STORE: &str = r#"
Supermicro:
  AMD:
    "AS -1115HS-TNR":
      SMTControl: Enabled
      PowerProfile: Balanced
    "*":
      SMTControl: Auto
  Intel:
    SYS-120U-TNR:
      QuietBoot: false
"#;

    fn store() -> DesiredStateStore {
        serde_yaml::from_str(STORE).unwrap()
    }

    #[test]
    fn test_exact_model_wins_over_wildcard() {
        let store = store();
        let d = store.resolve("Supermicro", "AMD", "AS -1115HS-TNR").unwrap();
        assert_eq!(d.source, SettingsSource::Model);
        assert_eq!(d.settings.len(), 2);
    }

    #[test]
    fn test_wildcard_fallback() {
        let store = store();
        let d = store.resolve("Supermicro", "AMD", "AS -2015CS-TNR").unwrap();
        assert_eq!(d.source, SettingsSource::Wildcard);
        assert_eq!(d.settings.get("SMTControl"), Some(&AttributeValue::from("Auto")));
    }

    #[test]
    fn test_missing_definition() {
        let store = store();
        // No wildcard under Intel
        assert!(matches!(
            store.resolve("Supermicro", "Intel", "SYS-620U"),
            Err(BiosError::MissingDefinition { .. })
        ));
        assert!(matches!(
            store.resolve("Dell Inc.", "Intel", "PowerEdge R650"),
            Err(BiosError::MissingDefinition { .. })
        ));
        assert!(matches!(
            store.resolve("Supermicro", "ARM", "x"),
            Err(BiosError::MissingDefinition { .. })
        ));
    }

    #[test]
    fn test_no_fuzzy_model_lookup() {
        let store = store();
        assert!(store.resolve("Supermicro", "Intel", "SYS-120U-TNR ").is_err());
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bios_settings.yaml");
        std::fs::write(&path, "# nothing yet\n").unwrap();
        let empty = DesiredStateStore::load(&path).unwrap();
        assert!(empty.is_empty());
        assert!(!store().is_empty());
    }
}
