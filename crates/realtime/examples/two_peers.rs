//! Two participants joining the same room over the in-process hub.
//!
//! Run with `RUST_LOG=studymesh_realtime=debug cargo run --example two_peers`
//! to watch the negotiation.

use std::sync::Arc;
use std::time::Duration;
use studymesh_realtime::{
    Identity, LinkPhase, MemoryHub, ParticipantId, RoomConfig, RoomSession, SilentMediaSource,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let hub = MemoryHub::new();
    let alice = RoomSession::new(
        RoomConfig::new("demo"),
        Identity::new(ParticipantId::authenticated("alice"), "Alice"),
        Arc::new(hub.clone()),
        Arc::new(SilentMediaSource),
    );
    let bob = RoomSession::new(
        RoomConfig::new("demo"),
        Identity::anonymous("Bob"),
        Arc::new(hub.clone()),
        Arc::new(SilentMediaSource),
    );

    alice.enter_room("maths").await?;
    bob.enter_room("physics").await?;

    // Wait for the direct link to come up.
    loop {
        let phases = alice.link_phases().await;
        if phases.get(bob.local_id()) == Some(&LinkPhase::Connected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("alice <-> bob connected");

    alice.set_studying(true).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(peers) = bob.peers().await {
        for (id, record) in peers.borrow().iter() {
            println!(
                "{id}: {} ({}) active={}",
                record.display_name, record.activity_label, record.is_active
            );
        }
    }

    alice.leave_room().await;
    bob.leave_room().await;
    Ok(())
}
