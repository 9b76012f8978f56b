//! Ark backup agent

use serde_json::{Value, json};

use super::{crd, list};
use crate::cluster::Cluster;

pub const NAMESPACE: &str = "heptio-ark";
pub const IMAGE: &str = "gcr.io/heptio-images/ark:v0.10.1";
const GROUP: &str = "ark.heptio.com";

pub fn manifest(cluster: &Cluster) -> String {
    let backup = &cluster.backup;
    let provider = if backup.provider.is_empty() {
        "aws"
    } else {
        backup.provider.as_str()
    };

    let mut items: Vec<Value> = vec![json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": NAMESPACE },
    })];
    items.extend(
        [
            ("Backup", "backups"),
            ("Schedule", "schedules"),
            ("Restore", "restores"),
            ("Config", "configs"),
            ("DownloadRequest", "downloadrequests"),
            ("DeleteBackupRequest", "deletebackuprequests"),
            ("PodVolumeBackup", "podvolumebackups"),
            ("PodVolumeRestore", "podvolumerestores"),
            ("ResticRepository", "resticrepositories"),
            ("BackupStorageLocation", "backupstoragelocations"),
            ("VolumeSnapshotLocation", "volumesnapshotlocations"),
        ]
        .into_iter()
        .map(|(kind, plural)| crd(GROUP, kind, plural, &[])),
    );
    items.extend([
        json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": { "name": "ark", "namespace": NAMESPACE },
        }),
        json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": { "name": "ark" },
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": "cluster-admin",
            },
            "subjects": [{ "kind": "ServiceAccount", "name": "ark", "namespace": NAMESPACE }],
        }),
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": { "name": "cloud-credentials", "namespace": NAMESPACE },
            "stringData": {
                "cloud": format!(
                    "[default]\naws_access_key_id={}\naws_secret_access_key={}\n",
                    backup.s3_access_key, backup.s3_secret_access_key
                ),
            },
        }),
        json!({
            "apiVersion": "ark.heptio.com/v1",
            "kind": "BackupStorageLocation",
            "metadata": { "name": "default", "namespace": NAMESPACE },
            "spec": {
                "provider": provider,
                "objectStorage": { "bucket": backup.bucket },
                "config": { "region": backup.region },
            },
        }),
        deployment(),
    ]);

    list(items)
}

fn deployment() -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "ark", "namespace": NAMESPACE },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "component": "ark" } },
            "template": {
                "metadata": { "labels": { "component": "ark" } },
                "spec": {
                    "serviceAccountName": "ark",
                    "restartPolicy": "Always",
                    "containers": [{
                        "name": "ark",
                        "image": IMAGE,
                        "command": ["/ark"],
                        "args": ["server"],
                        "env": [{
                            "name": "AWS_SHARED_CREDENTIALS_FILE",
                            "value": "/credentials/cloud",
                        }],
                        "volumeMounts": [{ "name": "cloud-credentials", "mountPath": "/credentials" }],
                    }],
                    "volumes": [{
                        "name": "cloud-credentials",
                        "secret": { "secretName": "cloud-credentials" },
                    }],
                },
            },
        },
    })
}
