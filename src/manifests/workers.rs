//! Worker MachineDeployments

use serde_json::{Value, json};

use super::list;
use crate::cluster::{Cluster, WorkerConfig};
use crate::kube::MACHINE_NAMESPACE;

pub fn manifest(cluster: &Cluster) -> anyhow::Result<String> {
    let version = cluster.kubernetes_version()?;
    Ok(list(
        cluster
            .workers
            .iter()
            .map(|w| machine_deployment(cluster, w, &version.to_string()))
            .collect(),
    ))
}

fn machine_deployment(cluster: &Cluster, worker: &WorkerConfig, kubelet: &str) -> Value {
    let labels = json!({ "workerset": worker.name });
    let os = if worker.operating_system.is_empty() {
        "ubuntu"
    } else {
        worker.operating_system.as_str()
    };

    json!({
        "apiVersion": "cluster.k8s.io/v1alpha1",
        "kind": "MachineDeployment",
        "metadata": {
            "name": worker.name,
            "namespace": MACHINE_NAMESPACE,
        },
        "spec": {
            "replicas": worker.replicas,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "versions": { "kubelet": kubelet },
                    "providerSpec": {
                        "value": {
                            "cloudProvider": cluster.machine_controller.provider,
                            "cloudProviderSpec": worker.cloud_provider_spec,
                            "operatingSystem": os,
                        },
                    },
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::cluster;

    #[test]
    fn test_one_deployment_per_worker_set() {
        let mut c = cluster(&["h0"], "v1.14.1");
        c.machine_controller.provider = "aws".to_string();
        for (name, replicas) in [("pool-a", 3), ("pool-b", 0)] {
            c.workers.push(WorkerConfig {
                name: name.to_string(),
                replicas,
                cloud_provider_spec: json!({ "instanceType": "t3.medium" }),
                operating_system: String::new(),
            });
        }

        let parsed: Value = serde_json::from_str(&manifest(&c).unwrap()).unwrap();
        let items = parsed["items"].as_array().unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["spec"]["replicas"], 3);
        assert_eq!(items[1]["metadata"]["name"], "pool-b");
        let spec = &items[0]["spec"]["template"]["spec"];
        assert_eq!(spec["versions"]["kubelet"], "1.14.1");
        assert_eq!(spec["providerSpec"]["value"]["cloudProvider"], "aws");
        assert_eq!(
            spec["providerSpec"]["value"]["cloudProviderSpec"]["instanceType"],
            "t3.medium"
        );
    }
}
