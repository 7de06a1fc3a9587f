//! Addressing of a ConfigMap or Secret value.

use confwire_core::{CommonConfig, Error, QueryParams, Result};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Kind of cluster resource holding the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `ConfigMap`: `data` and `binaryData`
    ConfigMap,
    /// `Secret`: decoded `data`
    Secret,
}

impl ResourceKind {
    /// Lowercase name used in URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `k8s://<kind>/<namespace>/<name>[/<key>]` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sTarget {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
    /// Key within the resource data
    pub key: Option<String>,
    /// API timeout and retry policy
    pub common: CommonConfig,
}

impl K8sTarget {
    /// Parse the target from a `k8s://` URI.
    pub fn from_url(url: &Url) -> Result<Self> {
        let format_hint = "expected k8s://<configmap|secret>/<namespace>/<name>[/<key>]";
        let kind = match url.host_str().unwrap_or_default() {
            k if k.eq_ignore_ascii_case("configmap") => ResourceKind::ConfigMap,
            k if k.eq_ignore_ascii_case("secret") => ResourceKind::Secret,
            other => {
                return Err(Error::invalid_uri(
                    url.as_str(),
                    format!("unsupported resource type '{}', {}", other, format_hint),
                ))
            }
        };

        let segments: Vec<&str> = url.path().trim_start_matches('/').split('/').collect();
        let (namespace, name, key) = match segments.as_slice() {
            [namespace, name] => (*namespace, *name, None),
            [namespace, name, key] => (*namespace, *name, Some(*key).filter(|k| !k.is_empty())),
            _ => return Err(Error::invalid_uri(url.as_str(), format_hint)),
        };
        if namespace.is_empty() || name.is_empty() {
            return Err(Error::invalid_uri(url.as_str(), format_hint));
        }

        Ok(Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.map(str::to_string),
            common: CommonConfig::from_query(&QueryParams::from_url(url))?,
        })
    }

    /// `configmap default/app` style description.
    pub fn describe(&self) -> String {
        format!("{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Pick the configured value out of a resource's data.
///
/// With a key, that key's value. Without one, the only value, failing when
/// the resource is empty or holds several keys.
pub fn resolve_value(
    resource: &str,
    data: &BTreeMap<String, Vec<u8>>,
    key: Option<&str>,
) -> Result<Vec<u8>> {
    if let Some(key) = key {
        return data
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("key '{}' in {}", key, resource)));
    }

    match data.len() {
        0 => Err(Error::NotFound(format!("{} is empty", resource))),
        1 => data
            .values()
            .next()
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} is empty", resource))),
        _ => Err(Error::Ambiguous {
            resource: resource.to_string(),
            keys: data.keys().cloned().collect(),
        }),
    }
}
