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
use crate::types::v1alpha1::upgrade::Upgrade;
use crate::types::v1alpha1::upgrade_log::{
    ANNOTATION_LOG_ARCHIVE_ALT_NAME, Component, UpgradeLog,
};
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::info;

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    /// Once the read acknowledgment lands on the Upgrade, the UpgradeLog and
    /// everything it owns are purged; only the archive volume is kept, by
    /// dropping its UpgradeLog owner link before the cascade delete.
    pub async fn on_upgrade_change(&self, upgrade: &Upgrade) -> Result<(), Error> {
        if upgrade.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        if !upgrade.read_message_acknowledged() {
            return Ok(());
        }
        let Some(upgrade_log_name) = upgrade
            .status
            .as_ref()
            .and_then(|status| status.upgrade_log.clone())
        else {
            return Ok(());
        };

        let upgrade_log = match self
            .api
            .get::<UpgradeLog>(&self.namespace, &upgrade_log_name)
            .await
        {
            Ok(upgrade_log) => Some(upgrade_log),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(upgrade_log) = upgrade_log {
            self.retain_archive_volume(&upgrade_log).await?;
            self.delete_if_present::<UpgradeLog>(&upgrade_log_name)
                .await?;
            self.api
                .record(
                    &upgrade.object_ref(&()),
                    EventType::Normal,
                    "UpgradeLogPurged",
                    &format!("upgrade log {upgrade_log_name} and its components removed"),
                )
                .await?;
            info!("purged upgrade log {upgrade_log_name}, archive volume retained");
        }

        self.persist_upgrade(&upgrade.name(), |current| {
            let Some(status) = current.status.as_mut() else {
                return Delta::default();
            };
            Delta {
                metadata: false,
                status: status.upgrade_log.take().is_some(),
            }
        })
        .await?;
        Ok(())
    }

    /// Detaches the UpgradeLog owner link from the archive volume so the
    /// cascade delete leaves it behind. Other owner links stay in place.
    async fn retain_archive_volume(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        let volume_name = upgrade_log
            .annotations()
            .get(ANNOTATION_LOG_ARCHIVE_ALT_NAME)
            .cloned()
            .unwrap_or_else(|| upgrade_log.component_name(Component::LogArchive));

        let pvc = match self
            .api
            .get::<corev1::PersistentVolumeClaim>(&self.namespace, &volume_name)
            .await
        {
            Ok(pvc) => pvc,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let upgrade_log_name = upgrade_log.name();
        let Some(owners) = pvc.metadata.owner_references.as_ref() else {
            return Ok(());
        };
        if !owners.iter().any(|owner| owner.name == upgrade_log_name) {
            return Ok(());
        }

        let mut detached = pvc.clone();
        detached
            .metadata
            .owner_references
            .get_or_insert_default()
            .retain(|owner| owner.name != upgrade_log_name);
        self.api.update(&self.namespace, &detached).await?;
        Ok(())
    }
}
