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

pub mod archive_volume;
pub mod logging_rule;
pub mod managed_chart;
pub mod packager;
pub mod upgrade;
pub mod upgrade_log;
pub mod workload;

use crate::context::{ClusterObject, ControlPlane};
use crate::images::ImageGetter;
use crate::types::v1alpha1::upgrade::Upgrade;
use crate::types::v1alpha1::upgrade_log::{LABEL_UPGRADE_LOG, UpgradeLog};
use crate::{context, types};
use kube::Resource as _;
use kube::runtime::controller::Action;
use snafu::Snafu;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

/// Which parts of an object a mutation touched; metadata and status persist
/// through different calls.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Delta {
    pub metadata: bool,
    pub status: bool,
}

impl Delta {
    pub(crate) fn changed(self) -> bool {
        self.metadata || self.status
    }
}

/// One handler per watched resource kind, sharing the namespace, the
/// control-plane access and the image lookup. All shared state lives in the
/// control plane and is read fresh on every invocation.
pub struct Handler<C, I> {
    pub(crate) namespace: String,
    pub(crate) api: C,
    pub(crate) images: I,
}

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    pub fn new(namespace: String, api: C, images: I) -> Self {
        Self {
            namespace,
            api,
            images,
        }
    }

    /// Resolves the back-reference label to the governing UpgradeLog.
    /// Returns None when the resource is not ours or the subsystem is
    /// already gone — both benign.
    pub(crate) async fn resolve_upgrade_log(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Option<UpgradeLog>, Error> {
        let Some(name) = labels.get(LABEL_UPGRADE_LOG) else {
            return Ok(None);
        };
        match self.api.get::<UpgradeLog>(&self.namespace, name).await {
            Ok(upgrade_log) => Ok(Some(upgrade_log)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether the resource was actually created; re-applying the
    /// same create against an existing target is a no-op.
    pub(crate) async fn create_if_absent<T: ClusterObject>(&self, resource: &T) -> Result<bool, Error> {
        match self.api.create(&self.namespace, resource).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_already_exists() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn delete_if_present<T: ClusterObject>(&self, name: &str) -> Result<(), Error> {
        match self.api.delete::<T>(&self.namespace, name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist<T, F>(&self, name: &str, apply: F) -> Result<Option<T>, Error>
    where
        T: ClusterObject,
        F: Fn(&mut T) -> Delta + Send + Sync,
    {
        let mut current = self.api.get::<T>(&self.namespace, name).await?;
        let delta = apply(&mut current);
        if !delta.changed() {
            return Ok(None);
        }

        match self.write_back(&current, delta).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e.into()),
        }

        debug!("update of {name} conflicted, retrying against the latest revision");

        let mut latest = self.api.get::<T>(&self.namespace, name).await?;
        let delta = apply(&mut latest);
        if !delta.changed() {
            return Ok(None);
        }
        Ok(Some(self.write_back(&latest, delta).await?))
    }

    async fn write_back<T: ClusterObject>(
        &self,
        resource: &T,
        delta: Delta,
    ) -> Result<T, context::Error> {
        let mut written = resource.clone();
        if delta.metadata {
            let updated = self.api.update(&self.namespace, &written).await?;
            // carry the fresh resourceVersion but keep the desired remainder
            written.meta_mut().resource_version = updated.meta().resource_version.clone();
        }
        if delta.status {
            written = self.api.update_status(&self.namespace, &written).await?;
        }
        Ok(written)
    }

    /// Read-modify-write on an UpgradeLog with a single conflict retry
    /// against freshly re-read state. The closure reports what it changed;
    /// an unchanged object is never written back.
    pub(crate) async fn persist_upgrade_log<F>(
        &self,
        name: &str,
        apply: F,
    ) -> Result<Option<UpgradeLog>, Error>
    where
        F: Fn(&mut UpgradeLog) -> Delta + Send + Sync,
    {
        self.persist(name, apply).await
    }

    pub(crate) async fn persist_upgrade<F>(
        &self,
        name: &str,
        apply: F,
    ) -> Result<Option<Upgrade>, Error>
    where
        F: Fn(&mut Upgrade) -> Delta + Send + Sync,
    {
        self.persist(name, apply).await
    }
}

/// Controller entry point for the UpgradeLog orchestrator.
pub async fn reconcile<C, I>(
    upgrade_log: Arc<UpgradeLog>,
    handler: Arc<Handler<C, I>>,
) -> Result<Action, Error>
where
    C: ControlPlane,
    I: ImageGetter,
{
    handler.on_upgrade_log_change(&upgrade_log).await?;
    Ok(Action::await_change())
}

pub fn error_policy<C, I>(
    _object: Arc<UpgradeLog>,
    error: &Error,
    _handler: Arc<Handler<C, I>>,
) -> Action {
    error!("reconcile failed: {error}");

    match error {
        Error::Context { source } if source.is_not_found() => Action::await_change(),
        _ => Action::requeue(Duration::from_secs(5)),
    }
}
