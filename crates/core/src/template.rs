// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool templates: the declared shape of a sandbox family.
//!
//! Maintained by the fleet controller; read-only here. The claim engine
//! only consults a template when synthesising a sandbox on empty stock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declares the workload spec and replica target for a family of
/// sandboxes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolTemplate {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Primary container image stamped onto new sandboxes.
    #[serde(default)]
    pub image: String,
    /// Desired number of warm replicas; maintained by the fleet
    /// controller, not by this process.
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}
