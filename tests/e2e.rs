//! End-to-end cluster lifecycle tests
//!
//! These need Docker and network access to pull node images and release
//! binaries. Run manually:
//!
//! ```sh
//! cargo test --test e2e -- --ignored --nocapture
//! ```

use kindling::{ClusterSettings, KindCluster, PortForwardOptions};

#[tokio::test]
#[ignore] // Requires docker
async fn test_cluster_lifecycle_end_to_end() {
    kindling::telemetry::init_logging();

    let mut cluster = KindCluster::new("kindling-e2e-t1");
    cluster.create(None).await.expect("failed to create cluster");
    assert!(cluster.kubeconfig_path().exists());

    // kubectl reports the release it was pinned to.
    let version = cluster.kubectl(&["version", "--client"]).await.unwrap();
    assert!(
        version.contains("v1.28"),
        "unexpected kubectl version output: {version}"
    );

    // The API client built from the generated kubeconfig reaches the
    // server.
    let server = cluster.server_version().await.unwrap();
    assert!(server.starts_with('v'), "odd server version: {server}");

    cluster.delete().await.expect("failed to delete cluster");

    let clusters = kindling::command::run(&cluster.kind_path(), &["get", "clusters"])
        .await
        .unwrap()
        .expect_success("kind")
        .unwrap();
    assert!(
        !clusters.lines().any(|line| line.trim() == "kindling-e2e-t1"),
        "cluster still listed after delete: {clusters}"
    );
}

#[tokio::test]
#[ignore] // Requires docker
async fn test_delete_then_create_regenerates_credentials() {
    let mut cluster = KindCluster::new("kindling-e2e-fresh");

    cluster.create(None).await.unwrap();
    let first = std::fs::read(cluster.kubeconfig_path()).unwrap();
    assert!(!first.is_empty());

    cluster.delete().await.unwrap();
    cluster.create(None).await.unwrap();

    let second = std::fs::read(cluster.kubeconfig_path()).unwrap();
    assert!(!second.is_empty());
    assert_ne!(first, second, "credentials were not regenerated");

    cluster.delete().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires docker
async fn test_port_forward_to_cluster_dns() {
    kindling::telemetry::init_logging();

    let mut cluster = KindCluster::new("kindling-e2e-forward");
    cluster.create(None).await.unwrap();

    cluster
        .kubectl(&["rollout", "status", "deploy/coredns", "-n", "kube-system"])
        .await
        .unwrap();

    // High retry count, the DNS pod can stay pending for a while.
    let pf = cluster
        .port_forward_with(
            "service/kube-dns",
            53,
            PortForwardOptions::new()
                .arg("-n")
                .arg("kube-system")
                .retries(20),
        )
        .await
        .unwrap();

    assert!(pf.local_port() >= 1024);
    std::net::TcpStream::connect(("127.0.0.1", pf.local_port()))
        .expect("tunnel not connectable");
    pf.terminate().await.unwrap();

    cluster.delete().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires docker
async fn test_load_docker_image() {
    kindling::command::run("docker", &["pull", "busybox"])
        .await
        .unwrap()
        .expect_success("docker")
        .unwrap();

    let mut cluster = KindCluster::new("kindling-e2e-image");
    cluster.create(None).await.unwrap();
    cluster.load_docker_image("busybox").await.unwrap();
    cluster.delete().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires docker
async fn test_create_with_custom_node_image() {
    let settings =
        ClusterSettings::new("kindling-e2e-image-pin").image("kindest/node:v1.30.0");
    let mut cluster = KindCluster::with_settings(settings);

    cluster.create(None).await.unwrap();
    let server = cluster.server_version().await.unwrap();
    assert!(server.contains("1.30"), "wrong node image: {server}");

    cluster.delete().await.unwrap();
}
