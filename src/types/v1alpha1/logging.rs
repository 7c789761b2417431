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

//! Resource types of the external log-shipping operator.
//!
//! Only the slice of each spec this controller fills in or reads back is
//! modeled. The operator itself turns a `Logging`/`FluentbitAgent` pair into
//! the shipping DaemonSet and the aggregator StatefulSet, and activates the
//! `ClusterFlow`/`ClusterOutput` routing rules; all of that is opaque here.

use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub repository: String,
    pub tag: String,
}

/// Umbrella object for the logging infrastructure; its `fluentd` section
/// describes the single-replica aggregator workload.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "logging.banzaicloud.io",
    version = "v1beta1",
    kind = "Logging",
    namespaced,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSpec {
    pub control_namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluentd: Option<FluentdSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FluentdSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_reloader_image: Option<ImageSpec>,

    /// The aggregator needs a stable network identity, so it always runs as
    /// a single-replica stateful workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<FluentdScaling>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    /// Claim template for the aggregator's buffer/archive directory. The
    /// workload controller rendering the aggregator materializes the claim;
    /// this controller never creates it directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_storage_volume: Option<KubernetesStorage>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FluentdScaling {
    pub replicas: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<corev1::PersistentVolumeClaim>,
}

/// Node-level shipping agent configuration; the operator renders it into a
/// DaemonSet.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "logging.banzaicloud.io",
    version = "v1beta1",
    kind = "FluentbitAgent",
    namespaced,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct FluentbitAgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
}

/// Log-routing rule: which logs to collect. A rule can exist but stay
/// inactive when upstream validation rejects it, hence the `active` status.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "logging.banzaicloud.io",
    version = "v1beta1",
    kind = "ClusterFlow",
    namespaced,
    status = "RuleStatus",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFlowSpec {
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Match>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_output_refs: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Select>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Select {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<std::collections::BTreeMap<String, String>>,
}

/// Log-routing rule: where collected logs go.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "logging.banzaicloud.io",
    version = "v1beta1",
    kind = "ClusterOutput",
    namespaced,
    status = "RuleStatus",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOutputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileOutput>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileOutput {
    pub path: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}
