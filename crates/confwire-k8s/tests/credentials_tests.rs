//! Credential discovery through KUBECONFIG.

use confwire_core::Error;
use confwire_k8s::backend::SERVICE_ACCOUNT_TOKEN;
use confwire_k8s::{K8sReader, KubeBackend};
use serial_test::serial;
use std::path::Path;
use tempfile::TempDir;

const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: test
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: test
  context:
    cluster: test
    user: test
current-context: test
users:
- name: test
  user:
    token: not-a-real-token
"#;

fn in_cluster() -> bool {
    Path::new(SERVICE_ACCOUNT_TOKEN).exists()
}

/// Test a kubeconfig named by KUBECONFIG is loaded without contacting the cluster
#[test]
#[serial]
fn test_kubeconfig_from_env() {
    if in_cluster() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config");
    std::fs::write(&path, KUBECONFIG).unwrap();
    std::env::set_var("KUBECONFIG", &path);

    assert!(KubeBackend::new().is_ok());
    let reader = K8sReader::new("k8s://configmap/default/app/config.yaml").unwrap();
    assert_eq!(reader.target().name, "app");

    std::env::remove_var("KUBECONFIG");
}

/// Test an unreadable kubeconfig fails reader construction
#[test]
#[serial]
fn test_missing_kubeconfig() {
    if in_cluster() {
        return;
    }
    let dir = TempDir::new().unwrap();
    std::env::set_var("KUBECONFIG", dir.path().join("absent"));

    let err = KubeBackend::new().err().expect("missing kubeconfig should fail");
    assert!(matches!(err, Error::InvalidConfig { ref param, .. } if param == "kubeconfig"));

    std::env::remove_var("KUBECONFIG");
}
