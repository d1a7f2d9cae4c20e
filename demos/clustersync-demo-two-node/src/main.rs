//! Two-node smoke test: brings up two `Cluster`s on loopback, has them
//! exchange membership (spec §8 scenario S1), then publishes one message
//! unicast from node 1 to node 2 and prints the resulting `SyncResult`.
//!
//! Not part of the published crate; a manual exercise for development, not a
//! CLI surface of the library (spec §6: "None in the core").

use std::net::SocketAddr;
use std::time::Duration;

use clustersync::{ClusterBuilder, DispatchPolicy, TargetSelector};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    clustersync::telemetry::init_tracing();

    let addr1: SocketAddr = "127.0.0.1:17801".parse()?;
    let addr2: SocketAddr = "127.0.0.1:17802".parse()?;

    let node1 = ClusterBuilder::new()
        .local_id(1)
        .listen_addr(addr1)
        .peer(2, addr2)
        .default_channel("demo")
        .build()
        .await?;

    let node2 = ClusterBuilder::new()
        .local_id(2)
        .listen_addr(addr2)
        .peer(1, addr1)
        .default_channel("demo")
        .build()
        .await?;

    // Give both listeners a moment to be accepting before dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let bootstrap = node1.bootstrap_membership(TargetSelector::all()).await?;
    println!("node1 bootstrap_membership: {bootstrap:?}");
    node1.leave_startup();
    node2.leave_startup();

    let result = node1
        .publish(
            "demo",
            "greeting",
            1,
            b"hello from node 1".to_vec(),
            DispatchPolicy::UnicastPlain,
            TargetSelector::all(),
        )
        .await?;
    println!("node1 publish result: {result:?}");

    Ok(())
}
