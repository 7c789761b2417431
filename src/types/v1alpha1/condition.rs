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

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

/// A named, timestamped status field used to gate dependent automation.
///
/// The type is stored as a plain string so that conditions written by other
/// controllers (e.g. the chart manager's `Ready`) deserialize without loss.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_time: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Display, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Conditions of the UpgradeLog resource, in dependency order. A later
/// condition is never True while an earlier one is False or absent.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum UpgradeLogCondition {
    OperatorDeployed,
    InfraReady,
    UpgradeLogReady,
    UpgradeEnded,
    DownloadReady,
}

/// Conditions this controller maintains on the parent Upgrade resource.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum UpgradeCondition {
    LogReady,
    Completed,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn status_of(conditions: &[Condition], type_: &str) -> Option<ConditionStatus> {
    get(conditions, type_).map(|c| c.status)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    status_of(conditions, type_) == Some(ConditionStatus::True)
}

/// Sets a condition, stamping lastTransitionTime only on a status change and
/// lastUpdateTime on any change. Returns whether anything was modified, so
/// callers can skip the write-back when the persisted state already matches.
pub fn set(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let stamp = now();
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status && existing.reason == reason && existing.message == message
            {
                return false;
            }
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = stamp.clone();
            }
            existing.reason = reason.to_owned();
            existing.message = message.to_owned();
            existing.last_update_time = stamp;
            true
        }
        None => {
            conditions.push(Condition {
                type_: type_.to_owned(),
                status,
                reason: reason.to_owned(),
                message: message.to_owned(),
                last_transition_time: stamp.clone(),
                last_update_time: stamp,
            });
            true
        }
    }
}
