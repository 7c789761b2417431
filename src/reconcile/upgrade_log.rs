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
use crate::types::v1alpha1::condition::{ConditionStatus, UpgradeCondition, UpgradeLogCondition};
use crate::types::v1alpha1::logging::{ClusterFlow, ClusterOutput, FluentbitAgent, Logging};
use crate::types::v1alpha1::upgrade::{Addon, Upgrade};
use crate::types::v1alpha1::upgrade_log::{
    ADDON_LOGGING_NAME, ANNOTATION_CLUSTER_FLOW_READY, ANNOTATION_CLUSTER_OUTPUT_READY,
    ANNOTATION_FLUENT_BIT_READY, ANNOTATION_FLUENTD_READY, ANNOTATION_STATE, Component,
    LABEL_UPGRADE_STATE, STATE_COLLECTING, STATE_STOPPED, UPGRADE_STATE_LOGGING_INFRA_PREPARED,
    UpgradeLog,
};
use kube::Resource;
use kube::runtime::events::EventType;
use tracing::{debug, info};

const DOWNLOAD_FAILED_REASON: &str = "PackagingFailed";

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    /// The orchestrator. Walks the condition ladder top to bottom and
    /// performs at most the one next unblocked action per invocation; the
    /// change notification triggered by that very action drives the next
    /// step. Every decision is re-derived from a fresh read, so arbitrary
    /// interleaving of child notifications cannot reorder the ladder.
    pub async fn on_upgrade_log_change(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        if upgrade_log.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }

        let upgrade_log = match self
            .api
            .get::<UpgradeLog>(&self.namespace, &upgrade_log.name())
            .await
        {
            Ok(latest) => latest,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if upgrade_log
            .condition_status(UpgradeLogCondition::UpgradeLogReady)
            .is_none()
        {
            debug!("initializing upgrade log {}", upgrade_log.name());
            self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
                metadata: false,
                status: current.set_condition(
                    UpgradeLogCondition::UpgradeLogReady,
                    ConditionStatus::Unknown,
                    "",
                    "",
                ),
            })
            .await?;
            return Ok(());
        }

        if upgrade_log.condition_is(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::Unknown)
        {
            return self.advance_provisioning(&upgrade_log).await;
        }
        if upgrade_log.condition_is(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::True) {
            return self.advance_post_ready(&upgrade_log).await;
        }
        Ok(())
    }

    /// OperatorDeployed → InfraReady → UpgradeLogReady.
    async fn advance_provisioning(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        match upgrade_log.condition_status(UpgradeLogCondition::OperatorDeployed) {
            None => return self.deploy_operator(upgrade_log).await,
            // the chart handler flips this once the install reports ready
            Some(ConditionStatus::Unknown) | Some(ConditionStatus::False) => return Ok(()),
            Some(ConditionStatus::True) => {}
        }

        match upgrade_log.condition_status(UpgradeLogCondition::InfraReady) {
            None => return self.provision_infrastructure(upgrade_log).await,
            Some(ConditionStatus::Unknown) => {
                if upgrade_log.annotation_is_true(ANNOTATION_FLUENT_BIT_READY)
                    && upgrade_log.annotation_is_true(ANNOTATION_FLUENTD_READY)
                {
                    self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
                        metadata: false,
                        status: current.set_condition(
                            UpgradeLogCondition::InfraReady,
                            ConditionStatus::True,
                            "",
                            "",
                        ),
                    })
                    .await?;
                }
                return Ok(());
            }
            Some(ConditionStatus::True) => {}
            Some(ConditionStatus::False) => return Ok(()),
        }

        if upgrade_log.annotation_is_true(ANNOTATION_CLUSTER_FLOW_READY)
            && upgrade_log.annotation_is_true(ANNOTATION_CLUSTER_OUTPUT_READY)
        {
            return self.start_collecting(upgrade_log).await;
        }
        self.install_logging_rules(upgrade_log).await
    }

    /// True immediately (Skipped) when the add-on already provides the
    /// operator; otherwise install the chart and wait for its Ready signal.
    async fn deploy_operator(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        match self
            .api
            .get::<Addon>(&self.namespace, ADDON_LOGGING_NAME)
            .await
        {
            Ok(addon) if addon.spec.enabled => {
                info!("logging addon is enabled, skipping the operator install");
                self.persist_upgrade_log(&upgrade_log.name(), |current| {
                    let mut changed = current.set_condition(
                        UpgradeLogCondition::OperatorDeployed,
                        ConditionStatus::True,
                        "Skipped",
                        "cluster-logging addon is enabled",
                    );
                    let status = current.status.get_or_insert_default();
                    if status.operator_source.as_deref() != Some(ADDON_LOGGING_NAME) {
                        status.operator_source = Some(ADDON_LOGGING_NAME.to_owned());
                        changed = true;
                    }
                    Delta {
                        metadata: false,
                        status: changed,
                    }
                })
                .await?;
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let managed_chart = upgrade_log.new_managed_chart();
        if self.create_if_absent(&managed_chart).await? {
            self.api
                .record(
                    &upgrade_log.object_ref(&()),
                    EventType::Normal,
                    "OperatorInstallStarted",
                    "installing the logging operator chart",
                )
                .await?;
        }

        let chart_name = upgrade_log.component_name(Component::Operator);
        self.persist_upgrade_log(&upgrade_log.name(), |current| {
            let mut changed = current.set_condition(
                UpgradeLogCondition::OperatorDeployed,
                ConditionStatus::Unknown,
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

    /// Creates the shipping/aggregator pair; their readiness flows back
    /// through the workload handlers. The archive volume claim is only
    /// carried as a template here — the workload controller rendering the
    /// aggregator creates the claim itself.
    async fn provision_infrastructure(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        let images = self.images.consolidated_logging_images().await?;
        let logging = upgrade_log.new_logging(&images)?;
        let fluentbit_agent = upgrade_log.new_fluentbit_agent(&images)?;

        let created = self.create_if_absent(&logging).await?;
        self.create_if_absent(&fluentbit_agent).await?;
        if created {
            self.api
                .record(
                    &upgrade_log.object_ref(&()),
                    EventType::Normal,
                    "LoggingInfraProvisioned",
                    "created the log shipping and aggregation infrastructure",
                )
                .await?;
        }

        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: false,
            status: current.set_condition(
                UpgradeLogCondition::InfraReady,
                ConditionStatus::Unknown,
                "",
                "",
            ),
        })
        .await?;
        Ok(())
    }

    async fn install_logging_rules(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        let created = self.create_if_absent(&upgrade_log.new_cluster_output()).await?;
        self.create_if_absent(&upgrade_log.new_cluster_flow()).await?;
        if created {
            self.api
                .record(
                    &upgrade_log.object_ref(&()),
                    EventType::Normal,
                    "LogRulesInstalled",
                    "installed the log-collecting rules",
                )
                .await?;
        }
        Ok(())
    }

    /// Both rules are active: the subsystem is ready. Mirror that onto the
    /// parent upgrade so it can proceed.
    async fn start_collecting(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: current.set_annotation(ANNOTATION_STATE, STATE_COLLECTING),
            status: current.set_condition(
                UpgradeLogCondition::UpgradeLogReady,
                ConditionStatus::True,
                "",
                "",
            ),
        })
        .await?;
        self.api
            .record(
                &upgrade_log.object_ref(&()),
                EventType::Normal,
                "LogCollectionStarted",
                "log-collecting rules are active",
            )
            .await?;

        if let Some(upgrade) = self.get_upgrade(&upgrade_log.spec.upgrade).await? {
            self.persist_upgrade(&upgrade.name(), |current| Delta {
                metadata: current
                    .set_label(LABEL_UPGRADE_STATE, UPGRADE_STATE_LOGGING_INFRA_PREPARED),
                status: current.set_condition(
                    UpgradeCondition::LogReady,
                    ConditionStatus::True,
                    "",
                    "",
                ),
            })
            .await?;
        }
        Ok(())
    }

    /// UpgradeEnded → DownloadReady → teardown of collection.
    async fn advance_post_ready(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        // the packager handler records the archive outcome; fold it into the
        // DownloadReady condition
        if upgrade_log.condition_is(UpgradeLogCondition::DownloadReady, ConditionStatus::Unknown)
            && let Some(archive) = upgrade_log.status.as_ref().and_then(|s| s.archive.clone())
        {
            if archive.ready {
                self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
                    metadata: false,
                    status: current.set_condition(
                        UpgradeLogCondition::DownloadReady,
                        ConditionStatus::True,
                        "",
                        "",
                    ),
                })
                .await?;
                return Ok(());
            }
            if !archive.reason.is_empty() {
                self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
                    metadata: false,
                    status: current.set_condition(
                        UpgradeLogCondition::DownloadReady,
                        ConditionStatus::False,
                        DOWNLOAD_FAILED_REASON,
                        &archive.reason,
                    ),
                })
                .await?;
                return Ok(());
            }
        }

        match upgrade_log.condition_status(UpgradeLogCondition::UpgradeEnded) {
            None => {
                match self.get_upgrade(&upgrade_log.spec.upgrade).await? {
                    // the upgrade is already gone; its log collection is over
                    None => {
                        self.set_upgrade_ended(upgrade_log).await?;
                    }
                    Some(upgrade) => {
                        self.persist_upgrade(&upgrade.name(), |current| Delta {
                            metadata: current.set_label(
                                LABEL_UPGRADE_STATE,
                                UPGRADE_STATE_LOGGING_INFRA_PREPARED,
                            ),
                            status: current.set_condition(
                                UpgradeCondition::LogReady,
                                ConditionStatus::True,
                                "",
                                "",
                            ),
                        })
                        .await?;
                        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
                            metadata: false,
                            status: current.set_condition(
                                UpgradeLogCondition::UpgradeEnded,
                                ConditionStatus::Unknown,
                                "",
                                "",
                            ),
                        })
                        .await?;
                    }
                }
                Ok(())
            }
            Some(ConditionStatus::Unknown) => match self.get_upgrade(&upgrade_log.spec.upgrade).await? {
                None => self.set_upgrade_ended(upgrade_log).await,
                Some(upgrade) if upgrade.is_completed() => {
                    self.set_upgrade_ended(upgrade_log).await
                }
                Some(upgrade) => {
                    if upgrade_log
                        .condition_status(UpgradeLogCondition::DownloadReady)
                        .is_none()
                    {
                        return self.provision_downloader(upgrade_log, &upgrade).await;
                    }
                    Ok(())
                }
            },
            Some(ConditionStatus::True) => {
                if upgrade_log.state_marker() == Some(STATE_COLLECTING) {
                    return self.stop_collecting(upgrade_log).await;
                }
                Ok(())
            }
            Some(ConditionStatus::False) => Ok(()),
        }
    }

    async fn set_upgrade_ended(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: false,
            status: current.set_condition(
                UpgradeLogCondition::UpgradeEnded,
                ConditionStatus::True,
                "",
                "",
            ),
        })
        .await?;
        Ok(())
    }

    /// The upgrade has resumed past the logging gate: stand up the download
    /// path so the packaged logs can be fetched once the upgrade ends.
    async fn provision_downloader(
        &self,
        upgrade_log: &UpgradeLog,
        upgrade: &Upgrade,
    ) -> Result<(), Error> {
        let image_version = if upgrade.spec.version.is_empty() {
            "latest"
        } else {
            upgrade.spec.version.as_str()
        };

        let created = self
            .create_if_absent(&upgrade_log.new_log_downloader(image_version))
            .await?;
        self.create_if_absent(&upgrade_log.new_log_downloader_service())
            .await?;
        if created {
            self.api
                .record(
                    &upgrade_log.object_ref(&()),
                    EventType::Normal,
                    "DownloaderProvisioned",
                    "created the log downloader workload and service",
                )
                .await?;
        }

        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: false,
            status: current.set_condition(
                UpgradeLogCondition::DownloadReady,
                ConditionStatus::Unknown,
                "",
                "",
            ),
        })
        .await?;
        Ok(())
    }

    /// The upgrade has ended; uninstall the collection rules and the
    /// infrastructure pair. The archive volume stays, and conditions keep
    /// their last value as history.
    async fn stop_collecting(&self, upgrade_log: &UpgradeLog) -> Result<(), Error> {
        self.delete_if_present::<ClusterFlow>(&upgrade_log.component_name(Component::Flow))
            .await?;
        self.delete_if_present::<ClusterOutput>(&upgrade_log.component_name(Component::Output))
            .await?;
        self.delete_if_present::<Logging>(&upgrade_log.component_name(Component::Infra))
            .await?;
        self.delete_if_present::<FluentbitAgent>(
            &upgrade_log.component_name(Component::FluentbitAgent),
        )
        .await?;

        self.api
            .record(
                &upgrade_log.object_ref(&()),
                EventType::Normal,
                "LogCollectionStopped",
                "removed the log-collecting rules and infrastructure",
            )
            .await?;

        self.persist_upgrade_log(&upgrade_log.name(), |current| Delta {
            metadata: current.set_annotation(ANNOTATION_STATE, STATE_STOPPED),
            status: false,
        })
        .await?;
        Ok(())
    }

    async fn get_upgrade(&self, name: &str) -> Result<Option<Upgrade>, Error> {
        match self.api.get::<Upgrade>(&self.namespace, name).await {
            Ok(upgrade) => Ok(Some(upgrade)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::{
        create_test_upgrade, create_test_upgrade_log, enabled_addon, test_handler, test_images,
        FakeControlPlane, StaticImageGetter, TEST_NAMESPACE, TEST_UPGRADE_LOG_NAME,
        TEST_UPGRADE_NAME,
    };
    use crate::types::v1alpha1::managed_chart::ManagedChart;
    use k8s_openapi::api::apps::v1;
    use k8s_openapi::api::core::v1 as corev1;

    fn reload(handler: &Handler<FakeControlPlane, StaticImageGetter>) -> UpgradeLog {
        handler
            .api
            .get_as(TEST_NAMESPACE, TEST_UPGRADE_LOG_NAME)
            .unwrap()
    }

    async fn step(
        handler: &Handler<FakeControlPlane, StaticImageGetter>,
    ) -> UpgradeLog {
        let current = reload(handler);
        handler.on_upgrade_log_change(&current).await.unwrap();
        reload(handler)
    }

    // Test: a fresh UpgradeLog is initialized with UpgradeLogReady=Unknown
    #[tokio::test]
    async fn test_initialization() {
        let handler = test_handler();
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade_log());

        let upgrade_log = step(&handler).await;
        assert!(upgrade_log.condition_is(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown
        ));
    }

    // Test: neither addon nor chart exists, so the chart gets installed
    #[tokio::test]
    async fn test_missing_operator_installs_the_chart() {
        let handler = test_handler();
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade_log());

        step(&handler).await; // initialization
        let upgrade_log = step(&handler).await;

        assert!(upgrade_log.condition_is(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::Unknown
        ));
        assert_eq!(
            upgrade_log.status.as_ref().unwrap().operator_source.as_deref(),
            Some(format!("{TEST_UPGRADE_LOG_NAME}-operator").as_str())
        );
        assert!(
            handler
                .api
                .get_as::<ManagedChart>(
                    TEST_NAMESPACE,
                    &format!("{TEST_UPGRADE_LOG_NAME}-operator")
                )
                .is_some(),
            "the chart-install object should exist"
        );
    }

    // Test: an enabled addon skips the chart install entirely
    #[tokio::test]
    async fn test_enabled_addon_skips_the_chart() {
        let handler = test_handler();
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade_log());
        handler.api.seed(TEST_NAMESPACE, &enabled_addon());

        step(&handler).await; // initialization
        let upgrade_log = step(&handler).await;

        let condition = upgrade_log
            .status
            .as_ref()
            .and_then(|s| {
                crate::types::v1alpha1::condition::get(
                    &s.conditions,
                    &UpgradeLogCondition::OperatorDeployed.to_string(),
                )
            })
            .unwrap()
            .clone();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "Skipped");
        assert_eq!(
            upgrade_log.status.as_ref().unwrap().operator_source.as_deref(),
            Some(ADDON_LOGGING_NAME)
        );
        assert!(
            handler
                .api
                .get_as::<ManagedChart>(
                    TEST_NAMESPACE,
                    &format!("{TEST_UPGRADE_LOG_NAME}-operator")
                )
                .is_none(),
            "no chart-install object should be created"
        );
    }

    // Test: a deployed operator leads to the infrastructure being created
    #[tokio::test]
    async fn test_deployed_operator_provisions_infrastructure() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::True,
            "",
            "",
        );
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let upgrade_log = step(&handler).await;

        assert!(upgrade_log.condition_is(
            UpgradeLogCondition::InfraReady,
            ConditionStatus::Unknown
        ));
        assert!(handler
            .api
            .get_as::<Logging>(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-infra"))
            .is_some());
        assert!(handler
            .api
            .get_as::<FluentbitAgent>(
                TEST_NAMESPACE,
                &format!("{TEST_UPGRADE_LOG_NAME}-fluentbit-agent")
            )
            .is_some());

        // the claim rides along as a template; the workload controller
        // creates the volume, never this controller
        assert!(
            handler
                .api
                .get_as::<corev1::PersistentVolumeClaim>(
                    TEST_NAMESPACE,
                    &format!("{TEST_UPGRADE_LOG_NAME}-log-archive")
                )
                .is_none(),
            "the archive volume must not be created directly"
        );
        let logging: Logging = handler
            .api
            .get_as(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-infra"))
            .unwrap();
        assert!(
            logging
                .spec
                .fluentd
                .and_then(|fluentd| fluentd.buffer_storage_volume)
                .and_then(|storage| storage.pvc)
                .is_some(),
            "the aggregator spec must carry the archive claim template"
        );
    }

    // Test: partly-ready infrastructure keeps the UpgradeLog untouched
    #[tokio::test]
    async fn test_partial_infra_readiness_is_not_enough() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::True,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::InfraReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_annotation(ANNOTATION_FLUENT_BIT_READY, "true");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let upgrade_log = step(&handler).await;
        assert!(upgrade_log.condition_is(
            UpgradeLogCondition::InfraReady,
            ConditionStatus::Unknown
        ));
    }

    // Test: both infra flags flip InfraReady to True
    #[tokio::test]
    async fn test_complete_infra_readiness_marks_infra_ready() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::True,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::InfraReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_annotation(ANNOTATION_FLUENT_BIT_READY, "true");
        upgrade_log.set_annotation(ANNOTATION_FLUENTD_READY, "true");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let upgrade_log = step(&handler).await;
        assert!(upgrade_log.condition_is(UpgradeLogCondition::InfraReady, ConditionStatus::True));
    }

    // Test: ready infrastructure leads to the rules being installed
    #[tokio::test]
    async fn test_ready_infra_installs_logging_rules() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::True,
            "",
            "",
        );
        upgrade_log.set_condition(UpgradeLogCondition::InfraReady, ConditionStatus::True, "", "");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        step(&handler).await;

        assert!(handler
            .api
            .get_as::<ClusterFlow>(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-flow"))
            .is_some());
        assert!(handler
            .api
            .get_as::<ClusterOutput>(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-output"))
            .is_some());
    }

    // Test: active rules flip UpgradeLogReady and mirror onto the parent
    #[tokio::test]
    async fn test_active_rules_start_collection_and_gate_the_upgrade() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::True,
            "",
            "",
        );
        upgrade_log.set_condition(UpgradeLogCondition::InfraReady, ConditionStatus::True, "", "");
        upgrade_log.set_annotation(ANNOTATION_CLUSTER_FLOW_READY, "true");
        upgrade_log.set_annotation(ANNOTATION_CLUSTER_OUTPUT_READY, "true");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade());

        let upgrade_log = step(&handler).await;

        assert!(upgrade_log.condition_is(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::True
        ));
        assert_eq!(upgrade_log.state_marker(), Some(STATE_COLLECTING));

        let upgrade: Upgrade = handler
            .api
            .get_as(TEST_NAMESPACE, TEST_UPGRADE_NAME)
            .unwrap();
        assert!(crate::types::v1alpha1::condition::is_true(
            &upgrade.status.as_ref().unwrap().conditions,
            &UpgradeCondition::LogReady.to_string()
        ));
        assert_eq!(
            upgrade.metadata.labels.as_ref().unwrap().get(LABEL_UPGRADE_STATE),
            Some(&UPGRADE_STATE_LOGGING_INFRA_PREPARED.to_owned())
        );
    }

    // Test: a missing upgrade means log collection has outlived it
    #[tokio::test]
    async fn test_missing_upgrade_marks_upgrade_ended() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::True, "", "");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let upgrade_log = step(&handler).await;
        assert!(upgrade_log.condition_is(UpgradeLogCondition::UpgradeEnded, ConditionStatus::True));
    }

    // Test: a resumed upgrade gets the download path provisioned
    #[tokio::test]
    async fn test_resumed_upgrade_provisions_downloader() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::True, "", "");
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeEnded,
            ConditionStatus::Unknown,
            "",
            "",
        );
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade());

        let upgrade_log = step(&handler).await;

        assert!(upgrade_log.condition_is(
            UpgradeLogCondition::DownloadReady,
            ConditionStatus::Unknown
        ));
        let deployment: v1::Deployment = handler
            .api
            .get_as(
                TEST_NAMESPACE,
                &format!("{TEST_UPGRADE_LOG_NAME}-downloader"),
            )
            .unwrap();
        let image = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone()
            .unwrap();
        assert!(image.ends_with(":dev"), "downloader tag should track the upgrade version");
        assert!(
            handler
                .api
                .get_as::<corev1::Service>(TEST_NAMESPACE, TEST_UPGRADE_LOG_NAME)
                .is_some(),
            "downloader service should exist"
        );
    }

    // Test: a ready archive flips DownloadReady to True
    #[tokio::test]
    async fn test_ready_archive_marks_download_ready() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::True, "", "");
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeEnded, ConditionStatus::True, "", "");
        upgrade_log.set_condition(
            UpgradeLogCondition::DownloadReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log
            .status
            .get_or_insert_default()
            .record_archive("test-archive", 1024, true, "");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let upgrade_log = step(&handler).await;
        assert!(upgrade_log.condition_is(UpgradeLogCondition::DownloadReady, ConditionStatus::True));
    }

    // Test: an outright packaging failure surfaces as DownloadReady=False
    #[tokio::test]
    async fn test_failed_archive_marks_download_failed() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::True, "", "");
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeEnded, ConditionStatus::True, "", "");
        upgrade_log.set_condition(
            UpgradeLogCondition::DownloadReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log
            .status
            .get_or_insert_default()
            .record_archive("test-archive", 0, false, "packaging job failed");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let upgrade_log = step(&handler).await;

        let condition = crate::types::v1alpha1::condition::get(
            &upgrade_log.status.as_ref().unwrap().conditions,
            &UpgradeLogCondition::DownloadReady.to_string(),
        )
        .unwrap()
        .clone();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, DOWNLOAD_FAILED_REASON);
    }

    // Test: once the upgrade has ended the collection stack is torn down,
    // but the archive volume is retained
    #[tokio::test]
    async fn test_ended_upgrade_tears_down_collection_but_retains_archive() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeLogReady, ConditionStatus::True, "", "");
        upgrade_log.set_condition(UpgradeLogCondition::UpgradeEnded, ConditionStatus::True, "", "");
        upgrade_log.set_condition(UpgradeLogCondition::DownloadReady, ConditionStatus::True, "", "");
        upgrade_log.set_annotation(ANNOTATION_STATE, STATE_COLLECTING);
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let images = test_images();
        handler
            .api
            .seed(TEST_NAMESPACE, &upgrade_log.new_cluster_flow());
        handler
            .api
            .seed(TEST_NAMESPACE, &upgrade_log.new_cluster_output());
        handler
            .api
            .seed(TEST_NAMESPACE, &upgrade_log.new_logging(&images).unwrap());
        handler.api.seed(
            TEST_NAMESPACE,
            &upgrade_log.new_fluentbit_agent(&images).unwrap(),
        );
        handler
            .api
            .seed(TEST_NAMESPACE, &upgrade_log.new_log_archive_volume());

        let upgrade_log = step(&handler).await;

        assert_eq!(upgrade_log.state_marker(), Some(STATE_STOPPED));
        assert!(handler
            .api
            .get_as::<ClusterFlow>(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-flow"))
            .is_none());
        assert!(handler
            .api
            .get_as::<ClusterOutput>(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-output"))
            .is_none());
        assert!(handler
            .api
            .get_as::<Logging>(TEST_NAMESPACE, &format!("{TEST_UPGRADE_LOG_NAME}-infra"))
            .is_none());
        assert!(handler
            .api
            .get_as::<FluentbitAgent>(
                TEST_NAMESPACE,
                &format!("{TEST_UPGRADE_LOG_NAME}-fluentbit-agent")
            )
            .is_none());
        assert!(
            handler
                .api
                .get_as::<corev1::PersistentVolumeClaim>(
                    TEST_NAMESPACE,
                    &format!("{TEST_UPGRADE_LOG_NAME}-log-archive")
                )
                .is_some(),
            "the archive volume must be retained"
        );
    }

    // Test: redelivery while nothing progressed is a no-op
    #[tokio::test]
    async fn test_redelivery_without_progress_is_noop() {
        let handler = test_handler();
        let mut upgrade_log = create_test_upgrade_log();
        upgrade_log.set_condition(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::OperatorDeployed,
            ConditionStatus::True,
            "",
            "",
        );
        upgrade_log.set_condition(
            UpgradeLogCondition::InfraReady,
            ConditionStatus::Unknown,
            "",
            "",
        );
        upgrade_log.set_annotation(ANNOTATION_FLUENT_BIT_READY, "true");
        handler.api.seed(TEST_NAMESPACE, &upgrade_log);

        let first = step(&handler).await;
        let second = step(&handler).await;

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap(),
            "waiting on the aggregator must not mutate anything"
        );
    }

    // Test: condition ordering invariant holds along the whole happy path
    #[tokio::test]
    async fn test_condition_ordering_invariant() {
        let handler = test_handler();
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade_log());
        handler.api.seed(TEST_NAMESPACE, &enabled_addon());
        handler.api.seed(TEST_NAMESPACE, &create_test_upgrade());

        for _ in 0..8 {
            let upgrade_log = step(&handler).await;

            let implies = [
                (UpgradeLogCondition::InfraReady, UpgradeLogCondition::OperatorDeployed),
                (UpgradeLogCondition::UpgradeLogReady, UpgradeLogCondition::InfraReady),
            ];
            for (later, earlier) in implies {
                if upgrade_log.condition_is(later, ConditionStatus::True) {
                    assert!(
                        upgrade_log.condition_is(earlier, ConditionStatus::True),
                        "{later} must not be True while {earlier} is not"
                    );
                }
            }
            if upgrade_log
                .condition_status(UpgradeLogCondition::DownloadReady)
                .is_some()
            {
                assert!(
                    upgrade_log
                        .condition_status(UpgradeLogCondition::UpgradeEnded)
                        .is_some(),
                    "DownloadReady must not appear before UpgradeEnded"
                );
            }

            // feed the readiness flags as the child handlers would
            let fresh = reload(&handler);
            if fresh.condition_is(UpgradeLogCondition::InfraReady, ConditionStatus::Unknown) {
                handler
                    .persist_upgrade_log(TEST_UPGRADE_LOG_NAME, |current| Delta {
                        metadata: current.set_annotation(ANNOTATION_FLUENT_BIT_READY, "true")
                            | current.set_annotation(ANNOTATION_FLUENTD_READY, "true"),
                        status: false,
                    })
                    .await
                    .unwrap();
            }
            if fresh.condition_is(UpgradeLogCondition::InfraReady, ConditionStatus::True) {
                handler
                    .persist_upgrade_log(TEST_UPGRADE_LOG_NAME, |current| Delta {
                        metadata: current.set_annotation(ANNOTATION_CLUSTER_FLOW_READY, "true")
                            | current.set_annotation(ANNOTATION_CLUSTER_OUTPUT_READY, "true"),
                        status: false,
                    })
                    .await
                    .unwrap();
            }
        }

        let final_state = reload(&handler);
        assert!(final_state.condition_is(
            UpgradeLogCondition::UpgradeLogReady,
            ConditionStatus::True
        ));
    }
}
