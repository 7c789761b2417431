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

use super::{
    AGGREGATOR_APP_NAME, APP_NAME_LABEL, Component, LABEL_UPGRADE_LOG_COMPONENT, UpgradeLog,
};
use crate::images::{self, Image};
use crate::types;
use crate::types::error::MissingImageSnafu;
use crate::types::v1alpha1::logging::{
    ClusterFlow, ClusterFlowSpec, ClusterOutput, ClusterOutputSpec, FileOutput, FluentbitAgent,
    FluentbitAgentSpec, FluentdScaling, FluentdSpec, ImageSpec, KubernetesStorage, Logging,
    LoggingSpec, Match, Select,
};
use crate::types::v1alpha1::managed_chart::{ManagedChart, ManagedChartSpec};
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr;
use snafu::OptionExt;
use std::collections::BTreeMap;

const LOGGING_OPERATOR_CHART: &str = "logging-operator";
const LOGGING_OPERATOR_REPO: &str = "charts";

const ARCHIVE_VOLUME_NAME: &str = "log-archive";
const ARCHIVE_MOUNT_PATH: &str = "/archive";
const ARCHIVE_STORAGE_REQUEST: &str = "10Gi";

const DOWNLOADER_CONTAINER_NAME: &str = "log-downloader";
const DOWNLOADER_PORT: i32 = 8080;

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    [
        ("cpu".to_owned(), Quantity(cpu.to_owned())),
        ("memory".to_owned(), Quantity(memory.to_owned())),
    ]
    .into_iter()
    .collect()
}

fn image_spec(
    images: &BTreeMap<String, Image>,
    component: &str,
) -> Result<ImageSpec, types::error::Error> {
    let image = images.get(component).context(MissingImageSnafu {
        component: component.to_owned(),
    })?;
    Ok(ImageSpec {
        repository: image.repository.clone(),
        tag: image.tag.clone(),
    })
}

impl UpgradeLog {
    fn child_labels(&self, component: Component) -> BTreeMap<String, String> {
        let mut labels = self.common_labels();
        labels.insert(LABEL_UPGRADE_LOG_COMPONENT.to_owned(), component.to_string());
        labels
    }

    fn child_metadata(&self, component: Component) -> metav1::ObjectMeta {
        metav1::ObjectMeta {
            name: Some(self.component_name(component)),
            namespace: self.namespace().ok(),
            labels: Some(self.child_labels(component)),
            owner_references: component
                .owned_by_controller()
                .then(|| vec![self.new_owner_ref()]),
            ..Default::default()
        }
    }

    /// a new chart-install object for the logging operator
    pub fn new_managed_chart(&self) -> ManagedChart {
        ManagedChart {
            metadata: self.child_metadata(Component::Operator),
            spec: ManagedChartSpec {
                chart: LOGGING_OPERATOR_CHART.to_owned(),
                release_name: self.component_name(Component::Operator),
                repo_name: Some(LOGGING_OPERATOR_REPO.to_owned()),
                version: None,
                default_namespace: self.namespace().ok(),
            },
            status: None,
        }
    }

    /// a new infrastructure umbrella object; its fluentd section describes
    /// the aggregator, pinned to one replica for a stable network identity,
    /// and carries the archive volume claim as a template for the workload
    /// controller to materialize
    pub fn new_logging(
        &self,
        images: &BTreeMap<String, Image>,
    ) -> Result<Logging, types::error::Error> {
        Ok(Logging {
            metadata: self.child_metadata(Component::Infra),
            spec: LoggingSpec {
                control_namespace: self.namespace()?,
                fluentd: Some(FluentdSpec {
                    image: Some(image_spec(images, images::IMAGE_FLUENTD)?),
                    config_reloader_image: Some(image_spec(
                        images,
                        images::IMAGE_CONFIG_RELOADER,
                    )?),
                    scaling: Some(FluentdScaling { replicas: 1 }),
                    resources: Some(corev1::ResourceRequirements {
                        requests: Some(quantities("100m", "256Mi")),
                        limits: Some(quantities("1", "1Gi")),
                        ..Default::default()
                    }),
                    buffer_storage_volume: Some(KubernetesStorage {
                        pvc: Some(self.new_log_archive_volume()),
                    }),
                }),
            },
        })
    }

    /// a new node-level shipping agent object
    pub fn new_fluentbit_agent(
        &self,
        images: &BTreeMap<String, Image>,
    ) -> Result<FluentbitAgent, types::error::Error> {
        Ok(FluentbitAgent {
            metadata: self.child_metadata(Component::FluentbitAgent),
            spec: FluentbitAgentSpec {
                logging_ref: Some(self.component_name(Component::Infra)),
                image: Some(image_spec(images, images::IMAGE_FLUENTBIT)?),
                resources: Some(corev1::ResourceRequirements {
                    requests: Some(quantities("50m", "64Mi")),
                    limits: Some(quantities("200m", "128Mi")),
                    ..Default::default()
                }),
            },
        })
    }

    /// a new log-routing rule selecting what to collect
    pub fn new_cluster_flow(&self) -> ClusterFlow {
        ClusterFlow {
            metadata: self.child_metadata(Component::Flow),
            spec: ClusterFlowSpec {
                matches: vec![Match {
                    select: Some(Select {
                        labels: Some(self.common_labels()),
                    }),
                }],
                global_output_refs: vec![self.component_name(Component::Output)],
            },
            status: None,
        }
    }

    /// a new log-routing rule writing into the archive volume
    pub fn new_cluster_output(&self) -> ClusterOutput {
        ClusterOutput {
            metadata: self.child_metadata(Component::Output),
            spec: ClusterOutputSpec {
                file: Some(FileOutput {
                    path: format!("{ARCHIVE_MOUNT_PATH}/logs/${{tag}}"),
                    append: true,
                }),
            },
            status: None,
        }
    }

    /// the desired claim for the archive volume, embedded in the aggregator
    /// spec as a template: the workload controller creates the actual claim.
    /// It carries the aggregator labels the ownership-repair handler matches
    /// on, and no owner reference, so a cascade delete of the UpgradeLog
    /// leaves the archived data in place
    pub fn new_log_archive_volume(&self) -> corev1::PersistentVolumeClaim {
        let mut labels = self.common_labels();
        labels.insert(APP_NAME_LABEL.to_owned(), AGGREGATOR_APP_NAME.to_owned());
        labels.insert(
            LABEL_UPGRADE_LOG_COMPONENT.to_owned(),
            Component::Aggregator.to_string(),
        );

        corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(self.component_name(Component::LogArchive)),
                namespace: self.namespace().ok(),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                resources: Some(corev1::VolumeResourceRequirements {
                    requests: Some(
                        [(
                            "storage".to_owned(),
                            Quantity(ARCHIVE_STORAGE_REQUEST.to_owned()),
                        )]
                        .into_iter()
                        .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// a new downloader workload serving packaged archives over HTTP
    pub fn new_log_downloader(&self, image_version: &str) -> v1::Deployment {
        let labels = self.child_labels(Component::Downloader);

        let container = corev1::Container {
            name: DOWNLOADER_CONTAINER_NAME.to_owned(),
            image: Some(format!(
                "{}:{image_version}",
                images::LOG_DOWNLOADER_IMAGE_REPOSITORY
            )),
            ports: Some(vec![corev1::ContainerPort {
                container_port: DOWNLOADER_PORT,
                name: Some("http".to_owned()),
                protocol: Some("TCP".to_owned()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: ARCHIVE_VOLUME_NAME.to_owned(),
                mount_path: ARCHIVE_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        };

        v1::Deployment {
            metadata: self.child_metadata(Component::Downloader),
            spec: Some(v1::DeploymentSpec {
                replicas: Some(1),
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: vec![container],
                        volumes: Some(vec![corev1::Volume {
                            name: ARCHIVE_VOLUME_NAME.to_owned(),
                            persistent_volume_claim: Some(
                                corev1::PersistentVolumeClaimVolumeSource {
                                    claim_name: self.component_name(Component::LogArchive),
                                    read_only: Some(true),
                                },
                            ),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// a new Service in front of the downloader, named after the UpgradeLog
    pub fn new_log_downloader_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: metav1::ObjectMeta {
                name: Some(self.name()),
                namespace: self.namespace().ok(),
                labels: Some(self.common_labels()),
                owner_references: Some(vec![self.new_owner_ref()]),
                ..Default::default()
            },
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(self.child_labels(Component::Downloader)),
                ports: Some(vec![corev1::ServicePort {
                    port: 80,
                    target_port: Some(intstr::IntOrString::Int(DOWNLOADER_PORT)),
                    name: Some("http-downloader".to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{create_test_upgrade_log, test_images, TEST_UPGRADE_LOG_NAME};
    use crate::types::v1alpha1::upgrade_log::LABEL_UPGRADE_LOG;

    // Test: every built child carries the back-reference label
    #[test]
    fn test_children_carry_back_reference_label() {
        let upgrade_log = create_test_upgrade_log();

        let chart = upgrade_log.new_managed_chart();
        let flow = upgrade_log.new_cluster_flow();
        let pvc = upgrade_log.new_log_archive_volume();

        for labels in [
            chart.metadata.labels.as_ref().unwrap(),
            flow.metadata.labels.as_ref().unwrap(),
            pvc.metadata.labels.as_ref().unwrap(),
        ] {
            assert_eq!(
                labels.get(LABEL_UPGRADE_LOG).map(String::as_str),
                Some(TEST_UPGRADE_LOG_NAME),
                "child resource should point back at its UpgradeLog"
            );
        }
    }

    // Test: deterministic names follow <name>-<suffix>
    #[test]
    fn test_child_names_are_deterministic() {
        let upgrade_log = create_test_upgrade_log();

        assert_eq!(
            upgrade_log.new_managed_chart().metadata.name.unwrap(),
            format!("{TEST_UPGRADE_LOG_NAME}-operator")
        );
        assert_eq!(
            upgrade_log
                .new_logging(&test_images())
                .unwrap()
                .metadata
                .name
                .unwrap(),
            format!("{TEST_UPGRADE_LOG_NAME}-infra")
        );
        assert_eq!(
            upgrade_log.new_log_downloader_service().metadata.name.unwrap(),
            TEST_UPGRADE_LOG_NAME,
            "downloader service reuses the UpgradeLog name"
        );
    }

    // Test: the archive volume claim must survive cascade deletion
    #[test]
    fn test_archive_volume_has_no_owner_reference() {
        let upgrade_log = create_test_upgrade_log();
        let pvc = upgrade_log.new_log_archive_volume();

        assert!(
            pvc.metadata.owner_references.is_none(),
            "archive volume must not be cascade-owned by the UpgradeLog"
        );

        let chart = upgrade_log.new_managed_chart();
        let owners = chart.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, TEST_UPGRADE_LOG_NAME);
        assert_eq!(owners[0].controller, Some(true));
    }

    // Test: aggregator runs as a single replica and carries the archive
    // claim template for the workload controller to materialize
    #[test]
    fn test_aggregator_is_single_replica_with_archive_claim_template() {
        let upgrade_log = create_test_upgrade_log();
        let logging = upgrade_log.new_logging(&test_images()).unwrap();

        let fluentd = logging.spec.fluentd.unwrap();
        assert_eq!(fluentd.scaling.unwrap().replicas, 1);

        let image = fluentd.image.unwrap();
        assert_eq!(image.repository, "test/fluentd");
        assert_eq!(image.tag, "dev");

        let claim = fluentd.buffer_storage_volume.unwrap().pvc.unwrap();
        assert_eq!(
            claim.metadata.name.as_deref(),
            Some(format!("{TEST_UPGRADE_LOG_NAME}-log-archive").as_str())
        );

        let labels = claim.metadata.labels.unwrap();
        assert_eq!(
            labels.get(APP_NAME_LABEL).map(String::as_str),
            Some(AGGREGATOR_APP_NAME),
            "the materialized claim must match the ownership-repair handler"
        );
        assert_eq!(
            labels.get(LABEL_UPGRADE_LOG_COMPONENT).map(String::as_str),
            Some(Component::Aggregator.to_string().as_str())
        );
        assert_eq!(
            labels.get(LABEL_UPGRADE_LOG).map(String::as_str),
            Some(TEST_UPGRADE_LOG_NAME)
        );
    }

    // Test: missing image is a terminal error, not a silent default
    #[test]
    fn test_missing_image_is_an_error() {
        let upgrade_log = create_test_upgrade_log();
        let mut images = test_images();
        images.remove(images::IMAGE_FLUENTD);

        assert!(upgrade_log.new_logging(&images).is_err());
    }

    // Test: downloader image tag tracks the upgrade version
    #[test]
    fn test_downloader_image_tracks_upgrade_version() {
        let upgrade_log = create_test_upgrade_log();
        let deployment = upgrade_log.new_log_downloader("dev");

        let container = &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some(format!("{}:dev", images::LOG_DOWNLOADER_IMAGE_REPOSITORY).as_str())
        );

        let volume_mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(volume_mount.read_only, Some(true), "downloader mounts the archive read-only");
    }
}
