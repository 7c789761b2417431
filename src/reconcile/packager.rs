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
use crate::types::v1alpha1::upgrade_log::{ANNOTATION_ARCHIVE_NAME, ANNOTATION_ARCHIVE_SIZE};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;

pub(crate) const PACKAGING_FAILED_REASON: &str = "packaging job failed";

pub(crate) fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.succeeded)
        .unwrap_or(0)
        > 0
}

/// Outright terminal failure, as reported by the job controller's Failed
/// condition; a merely re-running job is neither succeeded nor failed.
pub(crate) fn job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Failed" && c.status == "True")
        })
}

impl<C, I> Handler<C, I>
where
    C: ControlPlane,
    I: ImageGetter,
{
    /// The packaging job is created by the external download-request flow;
    /// this controller only tracks its outcome on the archive descriptor.
    /// The result annotations on the job name the produced archive.
    pub async fn on_packager_job_change(&self, job: &Job) -> Result<(), Error> {
        if job.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        let annotations = job.annotations();
        let Some(archive_name) = annotations.get(ANNOTATION_ARCHIVE_NAME).cloned() else {
            return Ok(());
        };
        let archive_size = annotations
            .get(ANNOTATION_ARCHIVE_SIZE)
            .and_then(|size| size.parse::<i64>().ok())
            .unwrap_or(0);

        let Some(upgrade_log) = self.resolve_upgrade_log(job.labels()).await? else {
            return Ok(());
        };

        let (ready, reason) = if job_succeeded(job) {
            (true, "")
        } else if job_failed(job) {
            (false, PACKAGING_FAILED_REASON)
        } else {
            // still running; make sure the descriptor exists so progress is
            // visible, but do not touch an already-recorded outcome
            (false, "")
        };
        let terminal = job_succeeded(job) || job_failed(job);

        self.persist_upgrade_log(&upgrade_log.name(), |current| {
            let status = current.status.get_or_insert_default();
            if !terminal
                && status
                    .archive
                    .as_ref()
                    .is_some_and(|archive| archive.name == archive_name)
            {
                return Delta::default();
            }
            Delta {
                metadata: false,
                status: status.record_archive(&archive_name, archive_size, ready, reason),
            }
        })
        .await?;
        Ok(())
    }
}
