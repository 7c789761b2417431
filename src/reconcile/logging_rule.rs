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

use super::{Delta, Error, Handler};
use crate::context::ControlPlane;
use crate::images::ImageGetter;
use crate::types::v1alpha1::logging::{ClusterFlow, ClusterOutput, RuleStatus};
use crate::types::v1alpha1::upgrade_log::{
    ANNOTATION_CLUSTER_FLOW_READY, ANNOTATION_CLUSTER_OUTPUT_READY, READY,
};
use kube::ResourceExt;
use tracing::debug;

/// A rule can exist but stay inactive when validation failed upstream; only
/// an active rule counts as installed.
pub(crate) fn rule_active(status: Option<&RuleStatus>) -> bool {
    status.and_then(|s| s.active).unwrap_or(false)
}

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    async fn mark_rule_ready(
        &self,
        labels: &std::collections::BTreeMap<String, String>,
        annotation: &'static str,
    ) -> Result<(), Error> {
        let Some(upgrade_log) = self.resolve_upgrade_log(labels).await? else {
            return Ok(());
        };

        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: current.set_annotation(annotation, READY),
            status: false,
        })
        .await?;
        Ok(())
    }

    pub async fn on_cluster_flow_change(&self, cluster_flow: &ClusterFlow) -> Result<(), Error> {
        if cluster_flow.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        if !rule_active(cluster_flow.status.as_ref()) {
            debug!("cluster flow {} is not active yet", cluster_flow.name_any());
            return Ok(());
        }
        self.mark_rule_ready(cluster_flow.labels(), ANNOTATION_CLUSTER_FLOW_READY)
            .await
    }

    pub async fn on_cluster_output_change(
        &self,
        cluster_output: &ClusterOutput,
    ) -> Result<(), Error> {
        if cluster_output.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        if !rule_active(cluster_output.status.as_ref()) {
            return Ok(());
        }
        self.mark_rule_ready(cluster_output.labels(), ANNOTATION_CLUSTER_OUTPUT_READY)
            .await
    }
}
