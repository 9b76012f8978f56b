//! Per-distribution scripts
//!
//! Each supported distribution maps to one [`OsScripts`] entry. Adding a
//! distribution means adding a variant and a table entry.
//!
//! Scripts are templates rendered by the runner; they may use
//! `{{ .KUBERNETES_VERSION }}` (without the leading `v`) and
//! `{{ .CNI_VERSION }}`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Ubuntu,
    Debian,
    CoreOs,
    CentOs,
}

/// Scripts for one distribution
#[derive(Debug)]
pub struct OsScripts {
    /// Container runtime, kubelet, kubeadm and kubectl
    pub install: &'static str,
    pub upgrade_kubeadm: &'static str,
    pub upgrade_kubelet: &'static str,
    pub remove_binaries: &'static str,
}

impl OperatingSystem {
    pub const ALL: [Self; 4] = [Self::Ubuntu, Self::Debian, Self::CoreOs, Self::CentOs];

    /// Map the `ID` field of `/etc/os-release`
    pub fn from_os_release_id(id: &str) -> Option<Self> {
        match id.trim().trim_matches('"').to_lowercase().as_str() {
            "ubuntu" => Some(Self::Ubuntu),
            "debian" => Some(Self::Debian),
            "coreos" | "flatcar" => Some(Self::CoreOs),
            "centos" | "rhel" => Some(Self::CentOs),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::CoreOs => "coreos",
            Self::CentOs => "centos",
        }
    }

    pub fn scripts(self) -> &'static OsScripts {
        match self {
            Self::Ubuntu | Self::Debian => &APT,
            Self::CoreOs => &COREOS,
            Self::CentOs => &YUM,
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_os_release_id(s).ok_or_else(|| {
            let supported: Vec<&str> = Self::ALL.iter().map(|os| os.name()).collect();
            format!(
                "unsupported operating system {s:?} (supported: {})",
                supported.join(", ")
            )
        })
    }
}

static APT: OsScripts = OsScripts {
    install: r#"
export DEBIAN_FRONTEND=noninteractive
sudo swapoff -a
sudo sed -i '/\sswap\s/d' /etc/fstab

sudo apt-get update
sudo apt-get install -y --no-install-recommends \
  apt-transport-https ca-certificates curl gnupg lsb-release

curl -fsSL https://packages.cloud.google.com/apt/doc/apt-key.gpg | sudo apt-key add -
echo "deb http://apt.kubernetes.io/ kubernetes-xenial main" |
  sudo tee /etc/apt/sources.list.d/kubernetes.list

sudo apt-get update
kube_ver=$(apt-cache madison kubelet | grep "{{ .KUBERNETES_VERSION }}" | head -1 | awk '{print $3}')
sudo apt-mark unhold kubelet kubeadm kubectl || true
sudo apt-get install -y --no-install-recommends \
  docker.io \
  kubelet=${kube_ver} \
  kubeadm=${kube_ver} \
  kubectl=${kube_ver}
sudo apt-mark hold kubelet kubeadm kubectl

sudo systemctl enable --now docker
sudo systemctl enable --now kubelet
"#,
    upgrade_kubeadm: r#"
export DEBIAN_FRONTEND=noninteractive
sudo apt-get update
kube_ver=$(apt-cache madison kubeadm | grep "{{ .KUBERNETES_VERSION }}" | head -1 | awk '{print $3}')
sudo apt-mark unhold kubeadm
sudo apt-get install -y --no-install-recommends kubeadm=${kube_ver}
sudo apt-mark hold kubeadm
"#,
    upgrade_kubelet: r#"
export DEBIAN_FRONTEND=noninteractive
kube_ver=$(apt-cache madison kubelet | grep "{{ .KUBERNETES_VERSION }}" | head -1 | awk '{print $3}')
sudo apt-mark unhold kubelet kubectl
sudo apt-get install -y --no-install-recommends kubelet=${kube_ver} kubectl=${kube_ver}
sudo apt-mark hold kubelet kubectl
sudo systemctl daemon-reload
sudo systemctl restart kubelet
"#,
    remove_binaries: r#"
export DEBIAN_FRONTEND=noninteractive
sudo apt-mark unhold kubelet kubeadm kubectl || true
sudo apt-get remove --purge -y kubelet kubeadm kubectl
"#,
};

static YUM: OsScripts = OsScripts {
    install: r#"
sudo swapoff -a
sudo sed -i '/\sswap\s/d' /etc/fstab
sudo setenforce 0 || true
sudo sed -i 's/^SELINUX=enforcing$/SELINUX=permissive/' /etc/selinux/config

cat <<EOF | sudo tee /etc/yum.repos.d/kubernetes.repo
[kubernetes]
name=Kubernetes
baseurl=https://packages.cloud.google.com/yum/repos/kubernetes-el7-x86_64
enabled=1
gpgcheck=1
repo_gpgcheck=1
gpgkey=https://packages.cloud.google.com/yum/doc/yum-key.gpg https://packages.cloud.google.com/yum/doc/rpm-package-key.gpg
exclude=kube*
EOF

cat <<EOF | sudo tee /etc/sysctl.d/k8s.conf
net.bridge.bridge-nf-call-ip6tables = 1
net.bridge.bridge-nf-call-iptables = 1
EOF
sudo sysctl --system

sudo yum install -y --disableexcludes=kubernetes \
  docker \
  kubelet-{{ .KUBERNETES_VERSION }}-0 \
  kubeadm-{{ .KUBERNETES_VERSION }}-0 \
  kubectl-{{ .KUBERNETES_VERSION }}-0

sudo systemctl enable --now docker
sudo systemctl enable --now kubelet
"#,
    upgrade_kubeadm: r#"
sudo yum install -y --disableexcludes=kubernetes kubeadm-{{ .KUBERNETES_VERSION }}-0
"#,
    upgrade_kubelet: r#"
sudo yum install -y --disableexcludes=kubernetes \
  kubelet-{{ .KUBERNETES_VERSION }}-0 \
  kubectl-{{ .KUBERNETES_VERSION }}-0
sudo systemctl daemon-reload
sudo systemctl restart kubelet
"#,
    remove_binaries: r#"
sudo yum remove -y kubelet kubeadm kubectl
"#,
};

static COREOS: OsScripts = OsScripts {
    install: r#"
sudo mkdir -p /opt/cni/bin /opt/bin /etc/systemd/system/kubelet.service.d

curl -L "https://github.com/containernetworking/plugins/releases/download/{{ .CNI_VERSION }}/cni-plugins-amd64-{{ .CNI_VERSION }}.tgz" |
  sudo tar -C /opt/cni/bin -xz

RELEASE="v{{ .KUBERNETES_VERSION }}"
cd /opt/bin
sudo curl -L --remote-name-all \
  https://storage.googleapis.com/kubernetes-release/release/${RELEASE}/bin/linux/amd64/{kubeadm,kubelet,kubectl}
sudo chmod +x {kubeadm,kubelet,kubectl}

curl -sSL "https://raw.githubusercontent.com/kubernetes/kubernetes/${RELEASE}/build/debs/kubelet.service" |
  sed "s:/usr/bin:/opt/bin:g" |
  sudo tee /etc/systemd/system/kubelet.service
curl -sSL "https://raw.githubusercontent.com/kubernetes/kubernetes/${RELEASE}/build/debs/10-kubeadm.conf" |
  sed "s:/usr/bin:/opt/bin:g" |
  sudo tee /etc/systemd/system/kubelet.service.d/10-kubeadm.conf

sudo systemctl daemon-reload
sudo systemctl enable --now docker
sudo systemctl enable --now kubelet
"#,
    upgrade_kubeadm: r#"
RELEASE="v{{ .KUBERNETES_VERSION }}"
cd /opt/bin
sudo curl -L --remote-name-all \
  https://storage.googleapis.com/kubernetes-release/release/${RELEASE}/bin/linux/amd64/kubeadm
sudo chmod +x kubeadm
"#,
    upgrade_kubelet: r#"
RELEASE="v{{ .KUBERNETES_VERSION }}"
sudo systemctl stop kubelet
cd /opt/bin
sudo curl -L --remote-name-all \
  https://storage.googleapis.com/kubernetes-release/release/${RELEASE}/bin/linux/amd64/{kubelet,kubectl}
sudo chmod +x {kubelet,kubectl}
sudo systemctl daemon-reload
sudo systemctl start kubelet
"#,
    remove_binaries: r#"
sudo systemctl disable --now kubelet || true
sudo rm -f /opt/bin/{kubeadm,kubelet,kubectl}
sudo rm -rf /opt/cni /etc/systemd/system/kubelet.service /etc/systemd/system/kubelet.service.d
sudo systemctl daemon-reload
"#,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Vars, render};

    #[test]
    fn test_from_os_release_id() {
        assert_eq!(
            OperatingSystem::from_os_release_id("ubuntu"),
            Some(OperatingSystem::Ubuntu)
        );
        assert_eq!(
            OperatingSystem::from_os_release_id("\"centos\""),
            Some(OperatingSystem::CentOs)
        );
        assert_eq!(
            OperatingSystem::from_os_release_id("flatcar"),
            Some(OperatingSystem::CoreOs)
        );
        assert_eq!(OperatingSystem::from_os_release_id("arch"), None);
        assert!("arch".parse::<OperatingSystem>().is_err());
    }

    #[test]
    fn test_every_script_renders() {
        let vars = Vars::new()
            .set("KUBERNETES_VERSION", "1.14.1")
            .set("CNI_VERSION", "v0.7.5");

        for os in OperatingSystem::ALL {
            let scripts = os.scripts();
            for script in [
                scripts.install,
                scripts.upgrade_kubeadm,
                scripts.upgrade_kubelet,
                scripts.remove_binaries,
            ] {
                let rendered = render(script, &vars).unwrap();
                assert!(!rendered.contains("{{"), "{os}: unrendered action");
            }
        }
    }

    #[test]
    fn test_debian_shares_apt_scripts() {
        assert!(std::ptr::eq(
            OperatingSystem::Debian.scripts(),
            OperatingSystem::Ubuntu.scripts()
        ));
        assert!(
            OperatingSystem::CentOs
                .scripts()
                .install
                .contains("kubeadm-{{ .KUBERNETES_VERSION }}-0")
        );
    }
}
