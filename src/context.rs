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

use crate::types;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{DeleteParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use std::fmt::Debug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{} {}/{} not found", kind, namespace, name))]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("{} {}/{} already exists", kind, namespace, name))]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display(
        "write to {} {}/{} conflicted with a concurrent update",
        kind,
        namespace,
        name
    ))]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Any namespaced resource object the control plane can hold.
pub trait ClusterObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
{
}

impl<T> ClusterObject for T where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
{
}

/// Narrow contract over the cluster control-plane API. Every call either
/// succeeds, fails with NotFound/AlreadyExists/Conflict, or surfaces a
/// transient API error for the redelivery mechanism to retry.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get<T: ClusterObject>(&self, namespace: &str, name: &str) -> Result<T, Error>;

    async fn create<T: ClusterObject>(&self, namespace: &str, resource: &T) -> Result<T, Error>;

    /// Replaces the resource (status excluded), rejected with Conflict when
    /// the carried resourceVersion is stale.
    async fn update<T: ClusterObject>(&self, namespace: &str, resource: &T) -> Result<T, Error>;

    /// Replaces only the status subresource.
    async fn update_status<T: ClusterObject>(
        &self,
        namespace: &str,
        resource: &T,
    ) -> Result<T, Error>;

    async fn delete<T: ClusterObject>(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// send event
    async fn record(
        &self,
        reference: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct KubeControlPlane {
    client: kube::Client,
    recorder: Recorder,
}

impl KubeControlPlane {
    pub fn new(client: kube::Client) -> Self {
        let reporter = Reporter {
            controller: "upgradelog-operator".into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }

    fn api<T: ClusterObject>(&self, namespace: &str) -> Api<T> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn classify<T: ClusterObject>(source: kube::Error, namespace: &str, name: &str) -> Error {
        let kind = T::kind(&()).to_string();
        match &source {
            kube::Error::Api(response) if response.code == 404 => Error::NotFound {
                kind,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            },
            kube::Error::Api(response)
                if response.code == 409 && response.reason == "AlreadyExists" =>
            {
                Error::AlreadyExists {
                    kind,
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                }
            }
            kube::Error::Api(response) if response.code == 409 => Error::Conflict {
                kind,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            },
            _ => Error::Kube { source },
        }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get<T: ClusterObject>(&self, namespace: &str, name: &str) -> Result<T, Error> {
        self.api::<T>(namespace)
            .get(name)
            .await
            .map_err(|e| Self::classify::<T>(e, namespace, name))
    }

    async fn create<T: ClusterObject>(&self, namespace: &str, resource: &T) -> Result<T, Error> {
        let name = resource.meta().name.clone().unwrap_or_default();
        self.api::<T>(namespace)
            .create(&PostParams::default(), resource)
            .await
            .map_err(|e| Self::classify::<T>(e, namespace, &name))
    }

    async fn update<T: ClusterObject>(&self, namespace: &str, resource: &T) -> Result<T, Error> {
        let name = resource.meta().name.clone().unwrap_or_default();
        self.api::<T>(namespace)
            .replace(&name, &PostParams::default(), resource)
            .await
            .map_err(|e| Self::classify::<T>(e, namespace, &name))
    }

    async fn update_status<T: ClusterObject>(
        &self,
        namespace: &str,
        resource: &T,
    ) -> Result<T, Error> {
        let name = resource.meta().name.clone().unwrap_or_default();
        self.api::<T>(namespace)
            .replace_status(&name, &PostParams::default(), resource)
            .await
            .map_err(|e| Self::classify::<T>(e, namespace, &name))
    }

    async fn delete<T: ClusterObject>(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.api::<T>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Self::classify::<T>(e, namespace, name))?;
        Ok(())
    }

    async fn record(
        &self,
        reference: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                reference,
            )
            .await
            .map_err(|source| Error::Record { source })
    }
}
