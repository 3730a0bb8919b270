/// Two controller instances sharing a link inventory
///
/// Each instance runs its own logical clock, link store, event dispatcher
/// and gossip service over an in-memory network. Mastership is decided by
/// one shared authoritative role store.
use anyhow::Result;
use netsync_core::config::Config;
use netsync_core::core_clock::{ClockError, LogicalClock};
use netsync_core::core_event::{EventDispatcher, EventListener};
use netsync_core::core_mastership::{
    InMemoryMastershipStore, MastershipCoordinator, MastershipRole, MastershipStore,
};
use netsync_core::core_store::link_store::link_timestamps;
use netsync_core::core_store::{
    ConnectPoint, LinkDescription, LinkEvent, LinkEventType, LinkStore, LinkType,
    ReplicatedStore, StoreError,
};
use netsync_core::core_sync::{GossipService, GossipSettings, MemoryNetwork};
use netsync_core::metrics;
use netsync_core::shutdown::ShutdownCoordinator;
use netsync_core::{DeviceId, NodeId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Controller {
    links: LinkStore,
    mastership: MastershipCoordinator,
    dispatcher: EventDispatcher<LinkEvent>,
    seen: Arc<Mutex<Vec<LinkEventType>>>,
    task: JoinHandle<()>,
}

fn node_config() -> Config {
    let mut config = Config::default();
    config.anti_entropy.interval = Duration::from_millis(500);
    config.anti_entropy.initial_delay = Duration::from_millis(500);
    config.anti_entropy.tombstone_purge_interval = Duration::from_secs(3600);
    config.accumulator.max_events = 100;
    config.events.queue_capacity = 128;
    config
}

fn start_controller(
    name: &str,
    network: &MemoryNetwork,
    roles: Arc<dyn MastershipStore>,
    shutdown: &ShutdownCoordinator,
) -> Result<Controller> {
    let config = node_config();
    config.validate()?;
    metrics::init_from_config(&config.metrics);
    let node = NodeId::new(name);
    let clock = Arc::new(LogicalClock::new());
    let mastership = MastershipCoordinator::new(node.clone(), roles).with_clock(clock.clone());

    let dispatcher = EventDispatcher::from_config(format!("{}-links", name), &config.events)?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn EventListener<LinkEvent>> = Arc::new(move |e: &LinkEvent| {
        sink.lock().unwrap().push(*e.kind());
    });
    dispatcher.add_listener(listener)?;

    let (tx, rx) = mpsc::channel(128);
    let store = ReplicatedStore::new("links", link_timestamps(clock))
        .with_event_poster(dispatcher.poster())
        .with_update_channel(tx);
    let links = LinkStore::with_store(store);

    let (transport, inbound) = network.join(node.clone());
    let settings = GossipSettings::from(&config);
    let gossip = Arc::new(GossipService::new(node, links.replica(), Arc::new(transport), settings)?);
    let task = tokio::spawn(gossip.run(rx, Some(inbound), shutdown.subscribe()));

    Ok(Controller {
        links,
        mastership,
        dispatcher,
        seen,
        task,
    })
}

fn cp(device: &str, port: u64) -> ConnectPoint {
    ConnectPoint::new(DeviceId::new(device), port)
}

#[tokio::test(start_paused = true)]
async fn test_link_inventory_converges_across_mastership_handover() -> Result<()> {
    let network = MemoryNetwork::new();
    let shutdown = ShutdownCoordinator::new(Duration::from_millis(10));
    let roles: Arc<dyn MastershipStore> = Arc::new(InMemoryMastershipStore::new());
    let c1 = start_controller("c1", &network, roles.clone(), &shutdown)?;
    let c2 = start_controller("c2", &network, roles.clone(), &shutdown)?;

    let device = DeviceId::new("of:2");
    assert_eq!(c1.mastership.request_role_for(&device)?, MastershipRole::Master);
    assert_eq!(c2.mastership.request_role_for(&device)?, MastershipRole::Standby);

    // Only the master of the destination device can stamp a link.
    let desc = LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Direct);
    assert!(c1.links.create_or_update_link("lldp", desc.clone())?.is_some());
    assert!(matches!(
        c2.links.create_or_update_link("lldp", desc.clone()),
        Err(StoreError::Clock(ClockError::TermUnavailable(_)))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let replicated = c2.links.get_link(&cp("of:1", 1), &cp("of:2", 1));
    assert_eq!(replicated, c1.links.get_link(&cp("of:1", 1), &cp("of:2", 1)));
    assert_eq!(c2.links.ingress_links(&device).len(), 1);

    // c2 takes over; c1 has not heard yet and keeps writing under the old term.
    c2.mastership.set_role(&NodeId::new("c2"), &device, MastershipRole::Master)?;
    assert!(c2.links.remove_link(&cp("of:1", 1), &cp("of:2", 1))?.is_some());
    let stale = desc.with_annotation("latency", "5ms");
    assert!(c1.links.create_or_update_link("lldp", stale)?.is_some());

    // Anti-entropy rounds settle both replicas on the newer term's removal.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(c1.links.get_link(&cp("of:1", 1), &cp("of:2", 1)).is_none());
    assert!(c2.links.get_link(&cp("of:1", 1), &cp("of:2", 1)).is_none());
    assert_eq!(c1.links.replica().entries(), c2.links.replica().entries());
    assert_eq!(roles.master(&device)?, Some(NodeId::new("c2")));

    shutdown.shutdown().await;
    c1.task.await?;
    c2.task.await?;
    c1.dispatcher.shutdown().await;
    c2.dispatcher.shutdown().await;

    assert_eq!(
        *c2.seen.lock().unwrap(),
        vec![LinkEventType::Added, LinkEventType::Removed]
    );
    let c1_seen = c1.seen.lock().unwrap().clone();
    assert_eq!(c1_seen.first(), Some(&LinkEventType::Added));
    assert_eq!(c1_seen.last(), Some(&LinkEventType::Removed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_catches_up_through_anti_entropy() -> Result<()> {
    let network = MemoryNetwork::new();
    let shutdown = ShutdownCoordinator::new(Duration::from_millis(10));
    let roles: Arc<dyn MastershipStore> = Arc::new(InMemoryMastershipStore::new());
    let c1 = start_controller("c1", &network, roles.clone(), &shutdown)?;

    for port in 1..=5 {
        let device = DeviceId::new(format!("of:{}", port + 10));
        c1.mastership.request_role_for(&device)?;
        let desc = LinkDescription::new(cp("of:1", port), ConnectPoint::new(device, 1), LinkType::Direct);
        c1.links.create_or_update_link("lldp", desc)?;
    }

    let c2 = start_controller("c2", &network, roles, &shutdown)?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(c2.links.link_count(), 5);
    assert_eq!(c2.links.egress_links(&DeviceId::new("of:1")).len(), 5);
    assert_eq!(c1.links.replica().entries(), c2.links.replica().entries());

    shutdown.shutdown().await;
    c1.task.await?;
    c2.task.await?;
    c2.dispatcher.shutdown().await;
    assert_eq!(c2.seen.lock().unwrap().len(), 5);
    Ok(())
}
