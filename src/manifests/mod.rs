//! Manifest producers
//!
//! Pure functions from the cluster model to manifest text. Kubernetes
//! objects are built as JSON (a subset of YAML that kubectl accepts) and
//! wrapped in a single `List` so each file applies in one call.

pub mod ark;
pub mod kubeadm;
pub mod machine_controller;
pub mod workers;

use serde_json::{Value, json};

/// Wrap objects in a `v1/List`
pub(crate) fn list(items: Vec<Value>) -> String {
    let list = json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": items,
    });
    // Serializing a Value cannot fail
    serde_json::to_string_pretty(&list).unwrap_or_default()
}

/// A namespaced CustomResourceDefinition
pub(crate) fn crd(group: &str, kind: &str, plural: &str, short_names: &[&str]) -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1beta1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": format!("{plural}.{group}") },
        "spec": {
            "group": group,
            "version": "v1alpha1",
            "scope": "Namespaced",
            "names": {
                "kind": kind,
                "plural": plural,
                "shortNames": short_names,
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_wraps_items() {
        let text = list(vec![crd("cluster.k8s.io", "Machine", "machines", &["ma"])]);
        let parsed: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed["kind"], "List");
        assert_eq!(
            parsed["items"][0]["metadata"]["name"],
            "machines.cluster.k8s.io"
        );
    }
}
