use std::collections::BTreeMap;
use std::sync::Arc;

use crate::profile::ExternalProfile;

/// Field -> value mapping applied to the local user. Iteration order is
/// deterministic.
pub type UserAttributes = BTreeMap<String, String>;

/// Injectable strategy replacing or extending the default profile mapping.
///
/// The override is invoked with the profile and the already-computed default
/// mapping. If it returns an empty mapping, the default wins; the engine
/// must always have at least one attribute to create a user from.
pub type AttributeMapper =
    Arc<dyn Fn(&ExternalProfile, UserAttributes) -> UserAttributes + Send + Sync>;

/// Default mapping: {name, email}, with absent fields omitted.
///
/// A profile with neither falls back to naming the user after the provider
/// subject id, so the mapping is never empty.
pub fn default_mapping(profile: &ExternalProfile) -> UserAttributes {
    let mut attrs = UserAttributes::new();

    if let Some(name) = profile.name.as_deref().filter(|n| !n.trim().is_empty()) {
        attrs.insert("name".to_string(), name.trim().to_string());
    }
    if let Some(email) = profile.email.as_deref().filter(|e| !e.trim().is_empty()) {
        attrs.insert("email".to_string(), email.trim().to_string());
    }

    if attrs.is_empty() {
        attrs.insert("name".to_string(), profile.subject_id.clone());
    }

    attrs
}

/// Apply the configured mapper, falling back to the default mapping when the
/// override produces an empty (invalid) result.
pub fn map_attributes(profile: &ExternalProfile, mapper: Option<&AttributeMapper>) -> UserAttributes {
    let default = default_mapping(profile);

    match mapper {
        Some(mapper) => {
            let mapped = mapper(profile, default.clone());
            if mapped.is_empty() {
                default
            } else {
                mapped
            }
        }
        None => default,
    }
}
