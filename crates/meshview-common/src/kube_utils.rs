//! Shared Kubernetes helpers using kube-rs

use kube::discovery::ApiResource;
use serde_json::Value;

/// Split an apiVersion into (group, version); core types have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from a known apiVersion, kind and plural
///
/// Istio and Mixer kinds do not follow English pluralization (e.g.
/// `prometheus` → `prometheuses`), so the plural is always passed in
/// rather than derived.
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: plural.to_string(),
    }
}

/// Recursively drop `null` members from every JSON object in `value`
///
/// Array elements that are `null` are kept; only object members are removed,
/// so positional meaning inside arrays is preserved.
pub fn remove_null_values(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                remove_null_values(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                remove_null_values(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_api_version_splits_group() {
        assert_eq!(
            parse_api_version("networking.istio.io/v1alpha3"),
            ("networking.istio.io".to_string(), "v1alpha3".to_string())
        );
        assert_eq!(
            parse_api_version("v1"),
            (String::new(), "v1".to_string())
        );
    }

    #[test]
    fn build_api_resource_uses_given_plural() {
        let ar = build_api_resource("config.istio.io/v1alpha2", "prometheus", "prometheuses");
        assert_eq!(ar.group, "config.istio.io");
        assert_eq!(ar.version, "v1alpha2");
        assert_eq!(ar.plural, "prometheuses");
        assert_eq!(ar.api_version, "config.istio.io/v1alpha2");
    }

    #[test]
    fn remove_null_values_is_recursive() {
        let mut body = json!({
            "metadata": { "name": "reviews", "labels": null },
            "spec": {
                "hosts": ["reviews", null],
                "http": [{ "route": null, "timeout": "2s" }]
            },
            "status": null
        });

        remove_null_values(&mut body);

        assert_eq!(
            body,
            json!({
                "metadata": { "name": "reviews" },
                "spec": {
                    "hosts": ["reviews", null],
                    "http": [{ "timeout": "2s" }]
                }
            })
        );
    }
}
