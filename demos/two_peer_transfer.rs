//! Shares a file from one node and downloads it from another over a real
//! loopback TCP connection.
//!
//! ```text
//! cargo run --example two_peer_transfer
//! ```

use chunkswarm_core::{Node, NodeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let shared_a = tempfile::tempdir()?;
    let downloads_a = tempfile::tempdir()?;
    let shared_b = tempfile::tempdir()?;
    let downloads_b = tempfile::tempdir()?;

    tokio::fs::write(
        shared_a.path().join("greeting.txt"),
        b"hello from node-a, shared over chunkswarm\n",
    )
    .await?;

    let node_a = Node::new(NodeConfig::new(
        "node-a",
        "127.0.0.1:0",
        shared_a.path(),
        downloads_a.path(),
    ));
    let addr_a = node_a.start().await?;
    println!("node-a listening on {addr_a}");

    let node_b = Node::new(NodeConfig::new(
        "node-b",
        "127.0.0.1:0",
        shared_b.path(),
        downloads_b.path(),
    ));
    node_b.start().await?;

    node_b.connect_peer(&addr_a.to_string()).await?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let manifest = node_b
        .list_available()
        .into_iter()
        .next()
        .expect("node-a should have announced its shared file by now");
    println!("node-b sees {} ({} bytes)", manifest.filename, manifest.file_size);

    let outcome = node_b.download_file(&manifest.file_hash).await?;
    println!("download finished: {outcome:?}");

    let downloaded = tokio::fs::read(downloads_b.path().join("greeting.txt")).await?;
    println!("{}", String::from_utf8_lossy(&downloaded));

    node_a.stop().await?;
    node_b.stop().await?;
    Ok(())
}
