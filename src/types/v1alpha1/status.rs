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

use crate::types::v1alpha1::condition::Condition;
use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeLogStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Where the logging operator came from: the pre-enabled addon or the
    /// chart this controller installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_source: Option<String>,

    /// The packaged-log artifact of the current download cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<Archive>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Archive {
    pub name: String,

    #[serde(default)]
    pub size: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generated_time: String,

    #[serde(default)]
    pub ready: bool,

    /// Non-empty only when the packaging process failed outright.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl UpgradeLogStatus {
    /// Records the observed outcome of a packaging run. Returns whether the
    /// persisted descriptor actually changed, so unchanged observations do
    /// not trigger a write-back.
    pub fn record_archive(&mut self, name: &str, size: i64, ready: bool, reason: &str) -> bool {
        let generated_time = match &self.archive {
            Some(existing) if existing.name == name => existing.generated_time.clone(),
            _ => Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let desired = Archive {
            name: name.to_owned(),
            size,
            generated_time,
            ready,
            reason: reason.to_owned(),
        };

        if self.archive.as_ref() == Some(&desired) {
            return false;
        }
        self.archive = Some(desired);
        true
    }
}
