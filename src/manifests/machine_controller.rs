//! machine-controller deployment

use serde_json::{Value, json};

use super::{crd, list};
use crate::cluster::Cluster;
use crate::kube::MACHINE_NAMESPACE;

pub const IMAGE: &str = "docker.io/kubermatic/machine-controller:v1.1.2";
pub const APP_LABEL: &str = "machine-controller";
const GROUP: &str = "cluster.k8s.io";

pub fn manifest(cluster: &Cluster) -> String {
    list(vec![
        crd(GROUP, "Cluster", "clusters", &["cl"]),
        crd(GROUP, "Machine", "machines", &["ma"]),
        crd(GROUP, "MachineSet", "machinesets", &["ms"]),
        crd(GROUP, "MachineDeployment", "machinedeployments", &["md"]),
        service_account(),
        cluster_role_binding(),
        credentials_secret(cluster),
        deployment(cluster),
    ])
}

fn service_account() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": { "name": APP_LABEL, "namespace": MACHINE_NAMESPACE },
    })
}

fn cluster_role_binding() -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": { "name": APP_LABEL },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": "cluster-admin",
        },
        "subjects": [{
            "kind": "ServiceAccount",
            "name": APP_LABEL,
            "namespace": MACHINE_NAMESPACE,
        }],
    })
}

fn credentials_secret(cluster: &Cluster) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": { "name": "machine-controller-credentials", "namespace": MACHINE_NAMESPACE },
        "stringData": cluster.machine_controller.credentials,
    })
}

fn deployment(cluster: &Cluster) -> Value {
    let env: Vec<Value> = cluster
        .machine_controller
        .credentials
        .keys()
        .map(|key| {
            json!({
                "name": key,
                "valueFrom": {
                    "secretKeyRef": { "name": "machine-controller-credentials", "key": key },
                },
            })
        })
        .collect();

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": APP_LABEL,
            "namespace": MACHINE_NAMESPACE,
            "labels": { "app": APP_LABEL },
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": APP_LABEL } },
            "template": {
                "metadata": { "labels": { "app": APP_LABEL } },
                "spec": {
                    "serviceAccountName": APP_LABEL,
                    "tolerations": [{
                        "key": "node-role.kubernetes.io/master",
                        "operator": "Exists",
                        "effect": "NoSchedule",
                    }],
                    "containers": [{
                        "name": APP_LABEL,
                        "image": IMAGE,
                        "command": ["/usr/local/bin/machine-controller"],
                        "args": [
                            "-logtostderr",
                            "-v", "3",
                            "-cluster-dns", "10.96.0.10",
                            "-internal-listen-address", "0.0.0.0:8085",
                        ],
                        "env": env,
                    }],
                },
            },
        },
    })
}
