//! Telemetry sample construction
//!
//! Every sample carries the host's stable billing identity plus two
//! presentation labels (`display_name`, `support`) that are re-drawn on each
//! call. The receiver must key billing on the stable labels only, so the
//! churn on the presentation labels must never produce a second billed
//! entity for the same host.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::identity::{HostId, HostIdentity};

/// Metric written for every host
pub const METRIC_NAME: &str = "system_cpu_logical_count";

/// Support levels a host may report
pub const SUPPORT_LEVELS: [&str; 2] = ["Premium", "Standard"];

/// Inclusive bounds of the sample value
pub const VALUE_RANGE: (u32, u32) = (1, 3);

pub const LABEL_NAME: &str = "__name__";
pub const LABEL_HOST: &str = "_id";
pub const LABEL_ACCOUNT: &str = "billing_marketplace_account";
pub const LABEL_INSTANCE: &str = "billing_marketplace_instance_id";
pub const LABEL_ORGANIZATION: &str = "external_organization";
pub const LABEL_DISPLAY_NAME: &str = "display_name";
pub const LABEL_SUPPORT: &str = "support";

/// Labels with fixed values on every sample
const STATIC_LABELS: [(&str, &str); 7] = [
    ("billing_marketplace", "aws"),
    ("billing_model", "marketplace"),
    ("conversions_success", "true"),
    ("product", "69"),
    ("socket_count", "1"),
    ("usage", "Production"),
    (LABEL_NAME, METRIC_NAME),
];

/// Label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// One timestamped measurement. Labels are sorted by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub labels: Vec<Label>,
    pub value: f64,
    pub timestamp_ms: i64,
}

impl Sample {
    /// Value of a label, if present
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.value.as_str())
    }
}

/// Builds samples for hosts in `[host_id_min, host_id_max)`
#[derive(Debug, Clone, Copy)]
pub struct SampleBuilder {
    host_id_min: HostId,
    host_id_max: HostId,
}

impl SampleBuilder {
    pub fn new(host_id_min: HostId, host_id_max: HostId) -> Self {
        Self {
            host_id_min,
            host_id_max,
        }
    }

    /// Alternate display name of a host. Falls outside the host id range so
    /// it can never be confused with another simulated host.
    pub fn display_alias(&self, host_id: HostId) -> HostId {
        host_id
            .saturating_sub(self.host_id_min)
            .saturating_add(self.host_id_max)
    }

    /// Build a sample stamped with the current wall-clock time
    pub fn build(&self, host_id: HostId, identity: &HostIdentity) -> Sample {
        self.build_with_rng(host_id, identity, &mut rand::thread_rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(
        &self,
        host_id: HostId,
        identity: &HostIdentity,
        rng: &mut R,
    ) -> Sample {
        let host = host_id.to_string();

        let display_name = if rng.gen_bool(0.5) {
            host.clone()
        } else {
            self.display_alias(host_id).to_string()
        };
        let support = SUPPORT_LEVELS
            .choose(rng)
            .copied()
            .unwrap_or(SUPPORT_LEVELS[0]);

        let mut labels = STATIC_LABELS
            .iter()
            .map(|(name, value)| Label::new(name, *value))
            .collect::<Vec<_>>();
        labels.extend([
            Label::new(LABEL_HOST, host.clone()),
            Label::new(LABEL_INSTANCE, host),
            Label::new(LABEL_ACCOUNT, identity.account.to_string()),
            Label::new(LABEL_ORGANIZATION, identity.organization.to_string()),
            Label::new(LABEL_DISPLAY_NAME, display_name),
            Label::new(LABEL_SUPPORT, support),
        ]);
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        Sample {
            labels,
            value: rng.gen_range(VALUE_RANGE.0..=VALUE_RANGE.1) as f64,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
