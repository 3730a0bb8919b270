/*
    gossip.rs - Background replication for one store

    Two paths keep replicas in step:

    - Push: every accepted local write is queued for every active peer.
      One accumulator per peer batches the writes; a released batch keeps
      only the newest version per key and goes out as a suggestion-only
      reply.
    - Pull: every interval the service advertises its digest to one random
      active peer and reconciles through the anti-entropy exchange. This
      repairs anything the push path lost.

    Send failures are logged and counted but never retried; the next
    round covers them.
*/

use super::anti_entropy::AntiEntropyEngine;
use super::errors::{SyncError, SyncResult};
use super::messages::{Reply, SyncMessage};
use super::transport::ClusterTransport;
use super::wire;
use super::{SyncKey, SyncValue};
use crate::config::Config;
use crate::core_event::event::now_millis;
use crate::core_event::{AccumulatorLimits, EventAccumulator, EventError};
use crate::core_store::{LocalUpdate, ReplicatedStore, Versioned};
use crate::ids::NodeId;
use crate::metrics::{self, names};
use crate::shutdown::ShutdownSignal;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GossipSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub purge_interval: Duration,
    pub push_limits: AccumulatorLimits,
}

impl From<&Config> for GossipSettings {
    fn from(config: &Config) -> Self {
        GossipSettings {
            interval: config.anti_entropy.interval,
            initial_delay: config.anti_entropy.initial_delay,
            purge_interval: config.anti_entropy.tombstone_purge_interval,
            push_limits: config.accumulator.limits(),
        }
    }
}

impl Default for GossipSettings {
    fn default() -> Self {
        GossipSettings::from(&Config::default())
    }
}

type PushQueue<K, V> = EventAccumulator<LocalUpdate<K, V>>;

pub struct GossipService<K, V> {
    local: NodeId,
    store: Arc<ReplicatedStore<K, V>>,
    engine: AntiEntropyEngine<K, V>,
    transport: Arc<dyn ClusterTransport>,
    settings: GossipSettings,
    runtime: Handle,
    push_queues: Mutex<HashMap<NodeId, PushQueue<K, V>>>,
}

/// Keep only the newest version of each key in a batch
pub(crate) fn collapse<K: SyncKey, V: SyncValue>(
    batch: Vec<LocalUpdate<K, V>>,
) -> HashMap<K, Versioned<V>> {
    let mut newest: HashMap<K, Versioned<V>> = HashMap::with_capacity(batch.len());
    for update in batch {
        let replace = newest
            .get(&update.key)
            .map_or(true, |held| update.value.is_newer(held));
        if replace {
            newest.insert(update.key, update.value);
        }
    }
    newest
}

async fn next_frame(inbound: &mut Option<mpsc::UnboundedReceiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<K: SyncKey, V: SyncValue> GossipService<K, V> {
    /// Create a service on the current Tokio runtime
    pub fn new(
        local: NodeId,
        store: Arc<ReplicatedStore<K, V>>,
        transport: Arc<dyn ClusterTransport>,
        settings: GossipSettings,
    ) -> SyncResult<Self> {
        settings.push_limits.validate()?;
        let runtime = Handle::try_current().map_err(|_| EventError::NoRuntime)?;
        let engine = AntiEntropyEngine::new(local.clone(), store.clone());
        Ok(GossipService {
            local,
            store,
            engine,
            transport,
            settings,
            runtime,
            push_queues: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn engine(&self) -> &AntiEntropyEngine<K, V> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<ReplicatedStore<K, V>> {
        &self.store
    }

    /// Advertise to one random active peer; returns the peer chosen
    pub async fn run_round(&self) -> SyncResult<Option<NodeId>> {
        let peers = self.transport.active_peers();
        if peers.is_empty() {
            return Ok(None);
        }
        let peer = peers[rand::rng().random_range(0..peers.len())].clone();

        let timer = metrics::Timer::new(names::AE_ROUND_DURATION);
        let ad = self.engine.create_advertisement();
        let entries = ad.digest.len();
        self.send(&peer, &SyncMessage::Advertisement(ad)).await?;
        timer.stop();

        metrics::record_counter(names::AE_ADVERTISEMENTS_SENT, 1);
        debug!(peer = %peer, entries, "Sent anti-entropy advertisement");
        Ok(Some(peer))
    }

    /// Handle one inbound frame
    pub async fn on_receive(&self, frame: &[u8]) -> SyncResult<()> {
        match wire::decode::<K, V>(frame)? {
            SyncMessage::Advertisement(ad) => {
                let started = now_millis();
                let reply = self.engine.handle_advertisement(&ad);
                if !reply.is_empty() {
                    self.send(&ad.sender, &SyncMessage::Reply(reply)).await?;
                    metrics::record_counter(names::AE_REPLIES_SENT, 1);
                }
                self.engine.record_sync(&ad.sender, started);
            }
            SyncMessage::Reply(reply) => {
                let sender = reply.sender.clone();
                let outcome = self.engine.apply_reply(reply)?;
                if let Some(follow_up) = outcome.follow_up {
                    self.send(&sender, &SyncMessage::Reply(follow_up)).await?;
                    metrics::record_counter(names::AE_REPLIES_SENT, 1);
                }
            }
        }
        Ok(())
    }

    async fn send(&self, peer: &NodeId, message: &SyncMessage<K, V>) -> SyncResult<()> {
        let frame = wire::encode(message)?;
        if let Err(e) = self.transport.send(peer, frame).await {
            self.engine.record_failure(peer);
            metrics::record_counter(names::AE_SEND_FAILURES, 1);
            debug!(peer = %peer, error = %e, "Failed to send sync message");
            return Err(e);
        }
        Ok(())
    }

    /// Queue a local write for every active peer
    pub fn queue_update(&self, update: LocalUpdate<K, V>) -> SyncResult<()> {
        let peers = self.transport.active_peers();
        let mut queues = self.push_queues.lock().unwrap_or_else(PoisonError::into_inner);
        for peer in peers {
            let queue = match queues.get(&peer) {
                Some(queue) => queue.clone(),
                None => {
                    let queue = self.push_queue(peer.clone())?;
                    queues.insert(peer, queue.clone());
                    queue
                }
            };
            queue.add(update.clone())?;
        }
        Ok(())
    }

    fn push_queue(&self, peer: NodeId) -> SyncResult<PushQueue<K, V>> {
        let local = self.local.clone();
        let transport = Arc::clone(&self.transport);
        let runtime = self.runtime.clone();

        let processor = move |batch: Vec<LocalUpdate<K, V>>| {
            let mut reply = Reply::new(local.clone());
            reply.suggestion = collapse(batch);
            let frame = match wire::encode(&SyncMessage::Reply(reply)) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to encode pushed updates");
                    return;
                }
            };
            let transport = Arc::clone(&transport);
            let peer = peer.clone();
            runtime.spawn(async move {
                match transport.send(&peer, frame).await {
                    Ok(()) => metrics::record_counter(names::AE_REPLIES_SENT, 1),
                    Err(e) => {
                        metrics::record_counter(names::AE_SEND_FAILURES, 1);
                        debug!(peer = %peer, error = %e, "Failed to push updates");
                    }
                }
            });
        };

        Ok(EventAccumulator::with_handle(
            self.settings.push_limits,
            processor,
            self.runtime.clone(),
        )?)
    }

    /// Purge tombstones every member, partitioned or not, is known to have seen
    pub fn purge_tombstones(&self) -> SyncResult<usize> {
        self.engine.purge_tombstones(&self.transport.members())
    }

    /// Run gossip rounds, pushes and inbound handling until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<LocalUpdate<K, V>>,
        mut inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) {
        let now = Instant::now();
        let mut rounds = interval_at(now + self.settings.initial_delay, self.settings.interval);
        rounds.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purges = interval_at(now + self.settings.purge_interval, self.settings.purge_interval);
        purges.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut updates_open = true;
        let mut inbound_open = inbound.is_some();
        info!(
            node = %self.local,
            store = %self.store.name(),
            interval_ms = self.settings.interval.as_millis() as u64,
            "Gossip service started"
        );

        let signal = loop {
            tokio::select! {
                signal = shutdown.recv() => break signal.unwrap_or(ShutdownSignal::Immediate),
                _ = rounds.tick() => {
                    // Failures are already logged; the next round retries with a fresh peer.
                    let _ = self.run_round().await;
                }
                _ = purges.tick() => {
                    if let Err(e) = self.purge_tombstones() {
                        warn!(error = %e, "Tombstone purge failed");
                    }
                }
                update = updates.recv(), if updates_open => match update {
                    Some(update) => {
                        if let Err(e) = self.queue_update(update) {
                            debug!(error = %e, "Failed to queue update for peers");
                        }
                    }
                    None => updates_open = false,
                },
                frame = next_frame(&mut inbound), if inbound_open => match frame {
                    Some(frame) => {
                        if let Err(e) = self.on_receive(&frame).await {
                            match e {
                                SyncError::Store(_) => warn!(error = %e, "Failed to apply sync message"),
                                _ => debug!(error = %e, "Dropped sync message"),
                            }
                        }
                    }
                    None => inbound_open = false,
                },
            }
        };

        self.stop(signal);
    }

    fn stop(&self, signal: ShutdownSignal) {
        let queues: Vec<_> = self
            .push_queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let mut discarded = 0;
        for (_, queue) in queues {
            if signal == ShutdownSignal::Graceful {
                queue.flush();
            }
            discarded += queue.shutdown();
        }
        info!(node = %self.local, ?signal, discarded, "Gossip service stopped");
    }
}
