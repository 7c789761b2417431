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
    ANNOTATION_FLUENT_BIT_READY, ANNOTATION_FLUENTD_READY, READY,
};
use k8s_openapi::api::apps::v1;
use kube::ResourceExt;

/// Daemon-style readiness: every scheduled node runs a ready pod, and there
/// is at least one.
pub(crate) fn daemon_set_ready(daemon_set: &v1::DaemonSet) -> bool {
    let Some(status) = &daemon_set.status else {
        return false;
    };
    status.desired_number_scheduled > 0 && status.number_ready == status.desired_number_scheduled
}

/// Stateful readiness: every requested replica reports ready, and at least
/// one was requested.
pub(crate) fn stateful_set_ready(stateful_set: &v1::StatefulSet) -> bool {
    let requested = stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(0);
    let ready = stateful_set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    requested > 0 && ready >= requested
}

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    /// The shipping agent's DaemonSet, rendered by the logging operator.
    /// A not-ready observation never clears a previously-set flag.
    pub async fn on_daemon_set_change(&self, daemon_set: &v1::DaemonSet) -> Result<(), Error> {
        if daemon_set.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        if !daemon_set_ready(daemon_set) {
            return Ok(());
        }
        let Some(upgrade_log) = self.resolve_upgrade_log(daemon_set.labels()).await? else {
            return Ok(());
        };

        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: current.set_annotation(ANNOTATION_FLUENT_BIT_READY, READY),
            status: false,
        })
        .await?;
        Ok(())
    }

    /// The aggregator's StatefulSet, rendered by the logging operator.
    pub async fn on_stateful_set_change(
        &self,
        stateful_set: &v1::StatefulSet,
    ) -> Result<(), Error> {
        if stateful_set.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        if !stateful_set_ready(stateful_set) {
            return Ok(());
        }
        let Some(upgrade_log) = self.resolve_upgrade_log(stateful_set.labels()).await? else {
            return Ok(());
        };

        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: current.set_annotation(ANNOTATION_FLUENTD_READY, READY),
            status: false,
        })
        .await?;
        Ok(())
    }
}
