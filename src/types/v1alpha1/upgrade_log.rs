// Copyright 2025 UpgradeLog Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod children;

use crate::types;
use crate::types::error::NoNamespaceSnafu;
use crate::types::v1alpha1::condition::{self, ConditionStatus, UpgradeLogCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;
use strum::Display;

pub const GROUP: &str = "upgradelog.io";

/// Back-reference from every child resource to the UpgradeLog tracking it.
pub const LABEL_UPGRADE_LOG: &str = const_str::concat!(GROUP, "/logging-subsystem");

/// Which piece of the logging stack a child resource belongs to.
pub const LABEL_UPGRADE_LOG_COMPONENT: &str = const_str::concat!(GROUP, "/component");

/// Applied to the Upgrade by an external actor once the packaged logs have
/// been retrieved; triggers teardown of the logging stack.
pub const LABEL_READ_MESSAGE: &str = const_str::concat!(GROUP, "/read-message");

/// Stamped on the Upgrade so unrelated upgrade-progression logic can see the
/// logging infrastructure is in place.
pub const LABEL_UPGRADE_STATE: &str = const_str::concat!(GROUP, "/upgrade-state");
pub const UPGRADE_STATE_LOGGING_INFRA_PREPARED: &str = "LoggingInfraPrepared";

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const AGGREGATOR_APP_NAME: &str = "fluentd";

// Component-readiness flags. Monotone within one upgrade attempt: once set
// to "true" they are only removed by deleting the UpgradeLog itself.
pub const ANNOTATION_CLUSTER_FLOW_READY: &str = const_str::concat!(GROUP, "/cluster-flow-ready");
pub const ANNOTATION_CLUSTER_OUTPUT_READY: &str =
    const_str::concat!(GROUP, "/cluster-output-ready");
pub const ANNOTATION_FLUENT_BIT_READY: &str = const_str::concat!(GROUP, "/fluentbit-ready");
pub const ANNOTATION_FLUENTD_READY: &str = const_str::concat!(GROUP, "/fluentd-ready");
pub const READY: &str = "true";

/// Whether the log-collecting rules are currently installed.
pub const ANNOTATION_STATE: &str = const_str::concat!(GROUP, "/state");
pub const STATE_COLLECTING: &str = "collecting";
pub const STATE_STOPPED: &str = "stopped";

/// Name of the archive volume as created by the aggregator workload, for
/// later lookup during teardown.
pub const ANNOTATION_LOG_ARCHIVE_ALT_NAME: &str =
    const_str::concat!(GROUP, "/log-archive-alt-name");

// Result annotations the external packaging process attaches to its job.
pub const ANNOTATION_ARCHIVE_NAME: &str = const_str::concat!(GROUP, "/archive-name");
pub const ANNOTATION_ARCHIVE_SIZE: &str = const_str::concat!(GROUP, "/archive-size");

/// Name of the Addon object representing a pre-enabled logging operator.
pub const ADDON_LOGGING_NAME: &str = "cluster-logging";

/// The child resource kinds managed for one UpgradeLog. Deterministic
/// naming: `<upgradelog-name>-<suffix>`, except the downloader Service which
/// reuses the UpgradeLog's own name.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Component {
    #[strum(serialize = "operator")]
    Operator,

    #[strum(serialize = "infra")]
    Infra,

    #[strum(serialize = "fluentbit-agent")]
    FluentbitAgent,

    #[strum(serialize = "flow")]
    Flow,

    #[strum(serialize = "output")]
    Output,

    #[strum(serialize = "log-archive")]
    LogArchive,

    #[strum(serialize = "downloader")]
    Downloader,

    /// The aggregator workload itself; not built here (the logging operator
    /// renders it) but observed for readiness and volume ownership.
    #[strum(serialize = "aggregator")]
    Aggregator,
}

impl Component {
    pub fn resource_name(&self, upgrade_log_name: &str) -> String {
        format!("{upgrade_log_name}-{self}")
    }

    /// The readiness flag this component's observed state feeds, if any.
    pub fn readiness_annotation(&self) -> Option<&'static str> {
        match self {
            Component::Flow => Some(ANNOTATION_CLUSTER_FLOW_READY),
            Component::Output => Some(ANNOTATION_CLUSTER_OUTPUT_READY),
            Component::FluentbitAgent => Some(ANNOTATION_FLUENT_BIT_READY),
            Component::Aggregator => Some(ANNOTATION_FLUENTD_READY),
            _ => None,
        }
    }

    /// The archive volume is deliberately left outside the cascade so it
    /// survives teardown.
    pub fn owned_by_controller(&self) -> bool {
        !matches!(self, Component::LogArchive | Component::Aggregator)
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "upgradelog.io",
    version = "v1alpha1",
    kind = "UpgradeLog",
    namespaced,
    status = "crate::types::v1alpha1::status::UpgradeLogStatus",
    shortname = "ulog",
    plural = "upgradelogs",
    singular = "upgradelog",
    printcolumn = r#"{"name":"Upgrade", "type":"string", "jsonPath":".spec.upgrade"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeLogSpec {
    /// Name of the Upgrade this logging subsystem belongs to.
    pub upgrade: String,
}

impl UpgradeLog {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn component_name(&self, component: Component) -> String {
        component.resource_name(&self.name())
    }

    /// a new controlling owner reference for cascade deletion
    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// a non-controlling owner reference, used to track the archive volume
    /// next to the owner the workload controller already set
    pub fn new_tracking_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn common_labels(&self) -> BTreeMap<String, String> {
        [(LABEL_UPGRADE_LOG.to_owned(), self.name())]
            .into_iter()
            .collect()
    }

    pub fn annotation_is_true(&self, key: &str) -> bool {
        self.annotations().get(key).map(String::as_str) == Some(READY)
    }

    /// Sets an annotation; returns whether the stored value changed.
    pub fn set_annotation(&mut self, key: &str, value: &str) -> bool {
        if self.annotations().get(key).map(String::as_str) == Some(value) {
            return false;
        }
        self.annotations_mut().insert(key.to_owned(), value.to_owned());
        true
    }

    pub fn state_marker(&self) -> Option<&str> {
        self.annotations().get(ANNOTATION_STATE).map(String::as_str)
    }

    pub fn condition_status(&self, type_: UpgradeLogCondition) -> Option<ConditionStatus> {
        self.status
            .as_ref()
            .and_then(|status| condition::status_of(&status.conditions, &type_.to_string()))
    }

    pub fn condition_is(&self, type_: UpgradeLogCondition, status: ConditionStatus) -> bool {
        self.condition_status(type_) == Some(status)
    }

    pub fn set_condition(
        &mut self,
        type_: UpgradeLogCondition,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        let conditions = &mut self.status.get_or_insert_default().conditions;
        condition::set(conditions, &type_.to_string(), status, reason, message)
    }
}
