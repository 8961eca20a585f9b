use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Desired state of a deployable workload.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "rokku.io",
    version = "v1",
    kind = "Application",
    plural = "applications",
    status = "ApplicationStatus",
    derive = "PartialEq",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub image: String,
    /// Unset means running; only start/stop ever write it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deploy_params: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceBinding>,
}

/// Observed state, written by the control plane.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointBinding {
    pub target: String,
    pub hostname: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBinding {
    pub target: String,
    pub service: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBinding {
    pub volume_request: String,
    pub volume: String,
    #[serde(default = "zero_quantity")]
    pub capacity: Quantity,
}

impl VolumeBinding {
    pub fn new(volume_request: impl Into<String>, volume: impl Into<String>) -> Self {
        Self {
            volume_request: volume_request.into(),
            volume: volume.into(),
            capacity: zero_quantity(),
        }
    }
}

impl Default for VolumeBinding {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBinding {
    pub secret_request: String,
    pub secret: String,
}

pub fn zero_quantity() -> Quantity {
    Quantity("0".to_string())
}

/// Options for creating a fresh application. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub name: Option<String>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub endpoints: Vec<EndpointBinding>,
    pub volumes: Vec<VolumeBinding>,
    pub secrets: Vec<SecretBinding>,
    pub services: Vec<ServiceBinding>,
    pub deploy_params: BTreeMap<String, serde_json::Value>,
}

/// Sparse set of changes applied to an existing application.
/// Absent fields leave the current value untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateRequest {
    pub image: Option<String>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub endpoints: Vec<EndpointBinding>,
    pub volumes: Vec<VolumeBinding>,
    pub secrets: Vec<SecretBinding>,
    pub services: Vec<ServiceBinding>,
    pub deploy_params: BTreeMap<String, serde_json::Value>,
}
