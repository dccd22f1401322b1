//! Demo binary: scan for hubs, connect to the first one found and send a
//! test payload once it is ready for control.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use hublink::bluetooth::{profile_for, BluestRadio};
use hublink::{
    ConnectionState, HubDescriptor, HubEvent, HubManager, LinkConfig, NoAutoReconnect,
    PlatformGate, RadioPreconditions,
};

#[tokio::main]
async fn main() -> Result<()> {
    hublink::logging::init();

    let radio = Arc::new(BluestRadio::new().await?);
    let gate = Arc::new(PlatformGate::new(RadioPreconditions::granted()));
    let policy = Arc::new(NoAutoReconnect);
    let config = LinkConfig::default();
    let (mut manager, mut events) = HubManager::new(radio, gate, policy, &config);

    if !manager.start_scan().await {
        anyhow::bail!("radio preconditions not satisfied");
    }
    info!("Scanning for hubs, ctrl-c to quit");

    let mut target: Option<String> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(HubEvent::HubFound { address, name, feature_group, .. }) if target.is_none() => {
                    // HubFound only fires for recognized feature groups.
                    let Some(profile) = profile_for(feature_group) else {
                        continue;
                    };
                    info!("Found {name} at {address}, connecting");
                    target = Some(address.clone());
                    manager.stop_scan().await;
                    manager.connect(HubDescriptor::new(address, name, profile))?;
                }
                Some(HubEvent::ConnectionChanged {
                    address,
                    state: ConnectionState::Ready,
                    available: true,
                }) => {
                    info!("{address} is ready, sending test payload");
                    if let Err(e) = manager.send(&address, &[0x01, 0x00]) {
                        warn!("Test write failed: {e}");
                    }
                }
                Some(event) => info!("{event:?}"),
                None => break,
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
