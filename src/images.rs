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

use crate::context::{self, ControlPlane};
use crate::types::error::MissingImageSnafu;
use crate::types::v1alpha1::upgrade::Addon;
use crate::types::v1alpha1::upgrade_log::ADDON_LOGGING_NAME;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;

pub const IMAGE_CONFIG_RELOADER: &str = "config-reloader";
pub const IMAGE_FLUENTBIT: &str = "fluentbit";
pub const IMAGE_FLUENTD: &str = "fluentd";

pub const LOG_DOWNLOADER_IMAGE_REPOSITORY: &str = "upgradelog/log-downloader";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub repository: String,
    pub tag: String,
}

/// Resolves the container images for the logging stack's components.
/// Lookup failure is terminal for the triggering reconciliation pass.
#[async_trait]
pub trait ImageGetter: Send + Sync {
    async fn consolidated_logging_images(
        &self,
    ) -> Result<BTreeMap<String, Image>, context::Error>;
}

/// Reads the images out of the logging add-on's chart values. Falls back to
/// the versions pinned at build time when no add-on is installed (the chart
/// this controller installs ships exactly those).
pub struct HelmValuesImageGetter<C> {
    namespace: String,
    api: C,
}

impl<C> HelmValuesImageGetter<C> {
    pub fn new(namespace: String, api: C) -> Self {
        Self { namespace, api }
    }
}

fn pinned_images() -> BTreeMap<String, Image> {
    [
        (
            IMAGE_CONFIG_RELOADER.to_owned(),
            Image {
                repository: "ghcr.io/kube-logging/config-reloader".to_owned(),
                tag: "v0.0.6".to_owned(),
            },
        ),
        (
            IMAGE_FLUENTBIT.to_owned(),
            Image {
                repository: "fluent/fluent-bit".to_owned(),
                tag: "2.1.8".to_owned(),
            },
        ),
        (
            IMAGE_FLUENTD.to_owned(),
            Image {
                repository: "ghcr.io/kube-logging/fluentd".to_owned(),
                tag: "v1.16-full".to_owned(),
            },
        ),
    ]
    .into_iter()
    .collect()
}

/// Extracts `{"images": {"<component>": {"repository": ..., "tag": ...}}}`
/// from the chart values document. Any missing or malformed entry surfaces
/// as an error rather than a silent default.
fn images_from_values(values: &serde_json::Value) -> Result<BTreeMap<String, Image>, context::Error> {
    let mut images = BTreeMap::new();
    for component in [IMAGE_CONFIG_RELOADER, IMAGE_FLUENTBIT, IMAGE_FLUENTD] {
        let image = values
            .pointer(&format!("/images/{component}"))
            .and_then(|entry| serde_json::from_value::<Image>(entry.clone()).ok())
            .context(MissingImageSnafu {
                component: component.to_owned(),
            })?;
        images.insert(component.to_owned(), image);
    }
    Ok(images)
}

#[async_trait]
impl<C: ControlPlane> ImageGetter for HelmValuesImageGetter<C> {
    async fn consolidated_logging_images(
        &self,
    ) -> Result<BTreeMap<String, Image>, context::Error> {
        let addon = match self
            .api
            .get::<Addon>(&self.namespace, ADDON_LOGGING_NAME)
            .await
        {
            Ok(addon) => addon,
            Err(e) if e.is_not_found() => return Ok(pinned_images()),
            Err(e) => return Err(e),
        };

        match addon.spec.values_content.as_deref() {
            Some(content) => {
                let values: serde_json::Value =
                    serde_json::from_str(content).map_err(crate::types::error::Error::from)?;
                images_from_values(&values)
            }
            None => Ok(pinned_images()),
        }
    }
}
