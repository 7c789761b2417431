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
use crate::types::v1alpha1::upgrade_log::{
    AGGREGATOR_APP_NAME, ANNOTATION_LOG_ARCHIVE_ALT_NAME, APP_NAME_LABEL, Component,
    LABEL_UPGRADE_LOG_COMPONENT,
};
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use tracing::info;

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    /// The archive volume is created by the aggregator workload, not by this
    /// controller. Attach the tracking owner link so standard garbage
    /// collection knows about it, without ever touching pre-existing owners,
    /// and remember the volume's name for teardown-time lookup.
    pub async fn on_pvc_change(
        &self,
        pvc: &corev1::PersistentVolumeClaim,
    ) -> Result<(), Error> {
        if pvc.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }

        let labels = pvc.labels();
        if labels.get(APP_NAME_LABEL).map(String::as_str) != Some(AGGREGATOR_APP_NAME) {
            return Ok(());
        }
        let aggregator = Component::Aggregator.to_string();
        if labels.get(LABEL_UPGRADE_LOG_COMPONENT) != Some(&aggregator) {
            return Ok(());
        }
        let Some(upgrade_log) = self.resolve_upgrade_log(labels).await? else {
            return Ok(());
        };

        let upgrade_log_name = upgrade_log.name();
        let already_tracked = pvc
            .owner_references()
            .iter()
            .any(|owner| owner.name == upgrade_log_name);

        if !already_tracked {
            let pvc_name = pvc.name_any();
            let mut repaired = pvc.clone();
            repaired
                .metadata
                .owner_references
                .get_or_insert_default()
                .push(upgrade_log.new_tracking_owner_ref());
            self.api.update(&self.namespace, &repaired).await?;
            info!("added {upgrade_log_name} as an owner of archive volume {pvc_name}");
        }

        let pvc_name = pvc.name_any();
        self.persist_upgrade_log(&upgrade_log_name, |current| Delta {
            metadata: current.set_annotation(ANNOTATION_LOG_ARCHIVE_ALT_NAME, &pvc_name),
            status: false,
        })
        .await?;
        Ok(())
    }
}
