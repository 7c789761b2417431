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

use crate::types::v1alpha1::condition::{self, Condition, ConditionStatus, UpgradeCondition};
use crate::types::v1alpha1::upgrade_log::LABEL_READ_MESSAGE;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The parent cluster-upgrade object. The upgrade flow itself is driven
/// elsewhere; this controller only mirrors log readiness onto it and reacts
/// to its read-acknowledgment label.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "upgradelog.io",
    version = "v1alpha1",
    kind = "Upgrade",
    namespaced,
    status = "UpgradeStatus",
    plural = "upgrades",
    singular = "upgrade",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeSpec {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub log_enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Name of the UpgradeLog coordinating this upgrade's log collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_log: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
}

impl Upgrade {
    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            condition::is_true(&status.conditions, &UpgradeCondition::Completed.to_string())
        })
    }

    /// An external actor marks the upgrade once its log bundle has been
    /// retrieved; that acknowledgment triggers teardown.
    pub fn read_message_acknowledged(&self) -> bool {
        self.labels().get(LABEL_READ_MESSAGE).map(String::as_str) == Some("true")
    }

    pub fn set_condition(
        &mut self,
        type_: UpgradeCondition,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        let conditions = &mut self.status.get_or_insert_default().conditions;
        condition::set(conditions, &type_.to_string(), status, reason, message)
    }

    /// Sets a label; returns whether the stored value changed.
    pub fn set_label(&mut self, key: &str, value: &str) -> bool {
        if self.labels().get(key).map(String::as_str) == Some(value) {
            return false;
        }
        self.labels_mut().insert(key.to_owned(), value.to_owned());
        true
    }
}

/// Externally-managed logging add-on toggle. When the add-on is already
/// enabled the chart install is skipped and its values drive image lookup.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "upgradelog.io",
    version = "v1alpha1",
    kind = "Addon",
    namespaced,
    plural = "addons",
    singular = "addon",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    /// Chart values as a JSON document, the way the add-on manager stores
    /// them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_content: Option<String>,
}
