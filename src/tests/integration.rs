//! Live-cluster smoke tests, read-only and opt-in.
//!
//! Run with `cargo test -- --ignored` after exporting `VIRTSHIFT_HOST`,
//! `VIRTSHIFT_PORT` and `VIRTSHIFT_TOKEN` (or putting them in `.env`).

use crate::{OpsResult, VirtshiftClient};
use dotenvy::dotenv;
use std::env;

fn setup() -> VirtshiftClient {
    dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let host = env::var("VIRTSHIFT_HOST").expect("VIRTSHIFT_HOST not set");
    let port: u16 = env::var("VIRTSHIFT_PORT")
        .expect("VIRTSHIFT_PORT not set")
        .parse()
        .expect("invalid port");
    let token = env::var("VIRTSHIFT_TOKEN").expect("VIRTSHIFT_TOKEN not set");

    VirtshiftClient::builder()
        .host(host)
        .port(port)
        .token(token)
        .secure(true)
        .accept_invalid_certs(true) // lab clusters run self-signed
        .build()
        .expect("client should build from environment")
}

#[tokio::test]
#[ignore = "requires a running cluster and environment variables"]
async fn test_integration_cluster_capacity() -> OpsResult<()> {
    let client = setup();
    let capacity = client.capacity().cluster_capacity(false).await?;
    assert!(capacity.nodes >= 1);
    assert!(capacity.online_nodes <= capacity.nodes);
    assert!(capacity.allocated_cores <= capacity.total_cores * 8);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running cluster and environment variables"]
async fn test_integration_largest_vm_report() -> OpsResult<()> {
    let client = setup();
    let report = client
        .placement()
        .largest_possible_vm(&crate::ResourceRequirements::default())
        .await?;
    assert!(!report.alternatives.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running cluster, environment variables and VIRTSHIFT_TEST_VMID"]
async fn test_integration_migration_check_is_read_only() -> OpsResult<()> {
    let client = setup();
    let vmid: u32 = env::var("VIRTSHIFT_TEST_VMID")
        .expect("VIRTSHIFT_TEST_VMID not set")
        .parse()
        .expect("invalid vmid");

    let vm = client.migration().find_vm(vmid).await?;
    // Checking against the VM's own node must report infeasible
    // without creating any record.
    let check = client
        .migration()
        .check(vmid, &crate::MigrateRequest::to(vm.node.clone()))
        .await?;
    assert!(!check.feasible);
    assert!(client.migration().history(vmid).await.is_empty());
    Ok(())
}
