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
pub mod model;
pub use model::{ApplyTime, AttributeSet, AttributeValue, PowerState, ResetType};

mod error;
pub use error::BiosError;

pub mod compare;
pub mod config;
pub mod defaults;
pub mod desired;
pub mod fleet;
pub mod identity;
mod jsonmap;
pub mod matcher;
mod network;
pub mod reconcile;
pub mod standard;

pub use config::{HostConfig, HostEntry};
pub use defaults::DefaultsDatabase;
pub use desired::{DesiredStateStore, SettingsSource};
pub use fleet::{Fleet, FleetOrchestrator, FleetReport};
pub use identity::{Architecture, ServerIdentity};
pub use matcher::{KeyMatcher, KeyNormalizer, MatchResult, MatchVerdict};
pub use network::{
    Endpoint, RedfishClientPool, RedfishClientPoolBuilder, RedfishHttpClient, REDFISH_ENDPOINT,
};
pub use reconcile::{HostReport, Outcome, ReconcileOptions, RebootStatus, Server};

/// Interface to one server's BMC. All async calls make one or more network calls.
#[async_trait::async_trait]
pub trait ManagementSession: Send + Sync {
    /// Hostname or IP address of the BMC, as given in the host list
    fn host(&self) -> &str;

    /// What the server is. Discovered once while connecting.
    fn identity(&self) -> &ServerIdentity;

    /// Current value of every BIOS attribute
    async fn read_attributes(&self) -> Result<AttributeSet, BiosError>;

    /// Write some BIOS attributes. Most BMCs stage these until the next reset.
    /// A BMC refusing the values is `BiosError::Rejected` with its diagnostic.
    async fn write_attributes(
        &self,
        attributes: &AttributeSet,
        apply_time: Option<ApplyTime>,
    ) -> Result<(), BiosError>;

    /// Apply times the BMC accepts for BIOS writes. Empty if it doesn't say.
    fn supported_apply_times(&self) -> &[ApplyTime];

    /// Reset types the system's reset action allows
    fn advertised_reset_types(&self) -> &[ResetType];

    /// Is this thing even on?
    async fn power_state(&self) -> Result<PowerState, BiosError>;

    async fn reset(&self, reset_type: ResetType) -> Result<(), BiosError>;

    /// Put every BIOS attribute back to its factory default. Takes effect on the next reset.
    async fn reset_bios(&self) -> Result<(), BiosError>;

    /// Log out. The session must not be used afterwards.
    async fn close(&self) -> Result<(), BiosError>;
}

/// Opens management sessions.
#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, host: &HostEntry) -> Result<Box<dyn ManagementSession>, BiosError>;
}
