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
use crate::types::v1alpha1::condition::{ConditionStatus, UpgradeLogCondition};
use crate::types::v1alpha1::managed_chart::ManagedChart;
use kube::ResourceExt;

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    /// The chart manager reports its own Ready signal; once it does, the
    /// logging operator is considered deployed.
    pub async fn on_managed_chart_change(&self, managed_chart: &ManagedChart) -> Result<(), Error> {
        if managed_chart.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        if !managed_chart.is_ready() {
            return Ok(());
        }
        let Some(upgrade_log) = self.resolve_upgrade_log(managed_chart.labels()).await? else {
            return Ok(());
        };

        let chart_name = managed_chart.name_any();
        self.persist_upgrade_log(&upgrade_log.name(), |current| {
            let mut changed = current.set_condition(
                UpgradeLogCondition::OperatorDeployed,
                ConditionStatus::True,
                "",
                "",
            );
            let status = current.status.get_or_insert_default();
            if status.operator_source.as_deref() != Some(chart_name.as_str()) {
                status.operator_source = Some(chart_name.clone());
                changed = true;
            }
            Delta {
                metadata: false,
                status: changed,
            }
        })
        .await?;
        Ok(())
    }
}
