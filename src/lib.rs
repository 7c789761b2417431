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

use crate::context::KubeControlPlane;
use crate::images::HelmValuesImageGetter;
use crate::reconcile::Handler;
use crate::types::v1alpha1::logging::{ClusterFlow, ClusterOutput};
use crate::types::v1alpha1::managed_chart::ManagedChart;
use crate::types::v1alpha1::upgrade::{Addon, Upgrade};
use crate::types::v1alpha1::upgrade_log::{
    AGGREGATOR_APP_NAME, APP_NAME_LABEL, LABEL_UPGRADE_LOG, UpgradeLog,
};
use futures::{Future, StreamExt, pin_mut};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResourceExt;
use kube::runtime::{Controller, WatchStreamExt, watcher};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

mod context;
pub mod images;
pub mod reconcile;
pub mod types;

type KubeHandler = Handler<KubeControlPlane, HelmValuesImageGetter<KubeControlPlane>>;

/// Dispatches every change notification of one watched kind to its handler.
/// Ordering across kinds is deliberately not guaranteed; each handler
/// re-derives from the full persisted state.
async fn watch_and_handle<T, F, Fut>(api: Api<T>, config: watcher::Config, mut handle: F)
where
    T: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    T::DynamicType: Default + Clone,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), reconcile::Error>>,
{
    let stream = watcher(api, config).default_backoff().applied_objects();
    pin_mut!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(resource) => {
                if let Err(e) = handle(resource).await {
                    warn!("handling change failed: {e}");
                }
            }
            Err(e) => warn!("watch stream failed: {e}"),
        }
    }
}

pub async fn run(namespace: String) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let client = Client::try_default().await?;
    let images = HelmValuesImageGetter::new(namespace.clone(), KubeControlPlane::new(client.clone()));
    let handler: Arc<KubeHandler> = Arc::new(Handler::new(
        namespace.clone(),
        KubeControlPlane::new(client.clone()),
        images,
    ));

    // children carry the back-reference label; the archive volume only
    // carries the aggregator's app label
    let child_config = watcher::Config::default().labels(LABEL_UPGRADE_LOG);
    let volume_config =
        watcher::Config::default().labels(&format!("{APP_NAME_LABEL}={AGGREGATOR_APP_NAME}"));

    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<Upgrade>::namespaced(client.clone(), &namespace),
            watcher::Config::default(),
            move |upgrade| {
                let handler = handler.clone();
                async move { handler.on_upgrade_change(&upgrade).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<ClusterFlow>::namespaced(client.clone(), &namespace),
            child_config.clone(),
            move |cluster_flow| {
                let handler = handler.clone();
                async move { handler.on_cluster_flow_change(&cluster_flow).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<ClusterOutput>::namespaced(client.clone(), &namespace),
            child_config.clone(),
            move |cluster_output| {
                let handler = handler.clone();
                async move { handler.on_cluster_output_change(&cluster_output).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<appsv1::DaemonSet>::namespaced(client.clone(), &namespace),
            child_config.clone(),
            move |daemon_set| {
                let handler = handler.clone();
                async move { handler.on_daemon_set_change(&daemon_set).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<appsv1::StatefulSet>::namespaced(client.clone(), &namespace),
            child_config.clone(),
            move |stateful_set| {
                let handler = handler.clone();
                async move { handler.on_stateful_set_change(&stateful_set).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<ManagedChart>::namespaced(client.clone(), &namespace),
            child_config.clone(),
            move |managed_chart| {
                let handler = handler.clone();
                async move { handler.on_managed_chart_change(&managed_chart).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<batchv1::Job>::namespaced(client.clone(), &namespace),
            child_config.clone(),
            move |job| {
                let handler = handler.clone();
                async move { handler.on_packager_job_change(&job).await }
            },
        ));
    }
    {
        let handler = handler.clone();
        tokio::spawn(watch_and_handle(
            Api::<corev1::PersistentVolumeClaim>::namespaced(client.clone(), &namespace),
            volume_config,
            move |pvc| {
                let handler = handler.clone();
                async move { handler.on_pvc_change(&pvc).await }
            },
        ));
    }

    let upgrade_logs = Api::<UpgradeLog>::namespaced(client.clone(), &namespace);
    Controller::new(upgrade_logs, watcher::Config::default())
        .run(reconcile::reconcile, reconcile::error_policy, handler)
        .for_each(|res| async move {
            match res {
                Ok((upgrade_log, _)) => info!("reconciled upgrade log {:?}", upgrade_log.name),
                Err(e) => warn!("reconcile failed: {e}"),
            }
        })
        .await;

    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    for crd in [UpgradeLog::crd(), Upgrade::crd(), Addon::crd()] {
        writer.write_all(b"---\n").await?;
        writer
            .write_all(serde_yaml_ng::to_string(&crd)?.as_bytes())
            .await?;
    }

    Ok(())
}
