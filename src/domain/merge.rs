use std::collections::{BTreeMap, HashMap};

use super::model::{
    Application, EndpointBinding, SecretBinding, ServiceBinding, UpdateRequest, VolumeBinding,
};

/// A (request identifier, resolution) pair.
///
/// The request identifier is chosen by the application author and never
/// changes; the resolution names whatever currently satisfies it.
pub trait Binding: Clone {
    fn request(&self) -> &str;

    /// Overwrites the resolution fields with the ones of `other`.
    fn resolve_from(&mut self, other: &Self);
}

impl Binding for EndpointBinding {
    fn request(&self) -> &str {
        &self.target
    }

    fn resolve_from(&mut self, other: &Self) {
        self.hostname.clone_from(&other.hostname);
    }
}

impl Binding for ServiceBinding {
    fn request(&self) -> &str {
        &self.target
    }

    fn resolve_from(&mut self, other: &Self) {
        self.service.clone_from(&other.service);
    }
}

impl Binding for VolumeBinding {
    fn request(&self) -> &str {
        &self.volume_request
    }

    fn resolve_from(&mut self, other: &Self) {
        self.volume.clone_from(&other.volume);
        self.capacity.clone_from(&other.capacity);
    }
}

impl Binding for SecretBinding {
    fn request(&self) -> &str {
        &self.secret_request
    }

    fn resolve_from(&mut self, other: &Self) {
        self.secret.clone_from(&other.secret);
    }
}

/// Merges `update` into `existing`, keyed by request identifier.
///
/// Known identifiers keep their position and take the update's resolution,
/// new identifiers are appended in the order the update lists them.
pub fn merge_bindings<B: Binding>(existing: &[B], update: &[B]) -> Vec<B> {
    let mut merged: Vec<B> = Vec::with_capacity(existing.len() + update.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for binding in existing.iter().chain(update) {
        match positions.get(binding.request()).copied() {
            Some(position) => merged[position].resolve_from(binding),
            None => {
                positions.insert(binding.request(), merged.len());
                merged.push(binding.clone());
            }
        }
    }
    merged
}

fn merge_map<V: Clone>(existing: &mut BTreeMap<String, V>, update: &BTreeMap<String, V>) {
    existing.extend(update.iter().map(|(key, value)| (key.clone(), value.clone())));
}

// An unset map stays unset unless the update brings keys.
fn merge_metadata_map(existing: &mut Option<BTreeMap<String, String>>, update: &BTreeMap<String, String>) {
    if !update.is_empty() {
        merge_map(existing.get_or_insert_with(BTreeMap::new), update);
    }
}

/// Builds the new desired state of `existing` with `request` applied.
///
/// `stop` is left alone, maps only ever gain or overwrite keys.
pub fn apply_update(existing: &Application, request: &UpdateRequest) -> Application {
    let mut updated = existing.clone();

    if let Some(image) = request.image.as_deref().filter(|image| !image.is_empty()) {
        updated.spec.image = image.to_string();
    }

    merge_metadata_map(&mut updated.metadata.annotations, &request.annotations);
    merge_metadata_map(&mut updated.metadata.labels, &request.labels);
    merge_map(&mut updated.spec.deploy_params, &request.deploy_params);

    updated.spec.endpoints = merge_bindings(&existing.spec.endpoints, &request.endpoints);
    updated.spec.services = merge_bindings(&existing.spec.services, &request.services);
    updated.spec.volumes = merge_bindings(&existing.spec.volumes, &request.volumes);
    updated.spec.secrets = merge_bindings(&existing.spec.secrets, &request.secrets);

    updated
}
