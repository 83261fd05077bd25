//! libp2p host for the MeshComm mesh.
//!
//! TCP transport with Noise encryption and Yamux multiplexing, GossipSub for
//! the per-category topics, optional mDNS LAN discovery and Identify. The
//! swarm lives in one background tokio task; [`Libp2pTransport`] and the
//! handles it gives out talk to that task over a command channel.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    Multiaddr, PeerId, Swarm, gossipsub, identify, mdns, noise,
    swarm::{NetworkBehaviour, SwarmEvent, behaviour::toggle::Toggle},
    tcp, yamux,
};
use meshcomm_core::{MeshCommError, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::transport::{Delivery, TopicPublisher, TopicSubscription, Transport};

/// Identify protocol version advertised to peers.
pub const PROTOCOL_VERSION: &str = "/meshcomm/1.0.0";

/// Largest payload GossipSub will carry.
pub const MAX_TRANSMIT_SIZE: usize = 256 * 1024;

const COMMAND_BUFFER: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 256;

/// How the host listens and finds peers.
#[derive(Debug, Clone)]
pub struct SwarmOptions {
    /// Listen multiaddr, e.g. `/ip4/0.0.0.0/tcp/4001`.
    pub listen_addr: String,
    /// Multiaddrs to dial once listening.
    pub bootstrap_peers: Vec<String>,
    /// Discover peers on the LAN via mDNS.
    pub mdns: bool,
}

impl Default for SwarmOptions {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".into(),
            bootstrap_peers: vec![],
            mdns: true,
        }
    }
}

/// Commands sent from the handles to the background swarm task.
#[derive(Debug)]
enum SwarmCommand {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<mpsc::Receiver<Delivery>>>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A subscription went away; leave the topic once nobody listens.
    Unsubscribe {
        topic: String,
    },
    ListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    Topics {
        reply: oneshot::Sender<Vec<String>>,
    },
    Dial(Multiaddr),
    Shutdown,
}

/// Combined network behaviour for a MeshComm node.
#[derive(NetworkBehaviour)]
pub struct MeshBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    pub identify: identify::Behaviour,
}

/// A running libp2p host.
pub struct Libp2pTransport {
    peer_id: PeerId,
    command_tx: mpsc::Sender<SwarmCommand>,
}

impl Libp2pTransport {
    /// Build the swarm, start listening, dial bootstrap peers and spawn the
    /// event loop.
    pub async fn start(options: SwarmOptions) -> Result<Self> {
        let mut swarm = build_swarm(options.mdns)?;
        let peer_id = *swarm.local_peer_id();
        info!(peer_id = %peer_id, "node started");

        let addr: Multiaddr = options.listen_addr.parse().map_err(|e| {
            MeshCommError::Transport(format!(
                "invalid listen address '{}': {e}",
                options.listen_addr
            ))
        })?;
        swarm
            .listen_on(addr)
            .map_err(|e| MeshCommError::Transport(format!("failed to listen: {e}")))?;

        for peer_addr in &options.bootstrap_peers {
            match peer_addr.parse::<Multiaddr>() {
                Ok(addr) => {
                    info!(addr = %addr, "dialing bootstrap peer");
                    if let Err(e) = swarm.dial(addr) {
                        warn!(error = %e, "failed to dial bootstrap peer");
                    }
                }
                Err(e) => {
                    warn!(addr = %peer_addr, error = %e, "invalid bootstrap peer address, skipping");
                }
            }
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_swarm_loop(swarm, command_rx));

        Ok(Self {
            peer_id,
            command_tx,
        })
    }

    /// Addresses the swarm is currently listening on. Empty until the
    /// listener is up.
    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(SwarmCommand::ListenAddrs { reply })
            .await
            .map_err(|_| MeshCommError::Transport("swarm task not running".into()))?;
        response
            .await
            .map_err(|_| MeshCommError::Transport("swarm task not running".into()))
    }

    /// GossipSub topics this node is a member of.
    pub async fn subscribed_topics(&self) -> Result<Vec<String>> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(SwarmCommand::Topics { reply })
            .await
            .map_err(|_| MeshCommError::Transport("swarm task not running".into()))?;
        response
            .await
            .map_err(|_| MeshCommError::Transport("swarm task not running".into()))
    }

    /// Dial a peer at a specific multiaddr.
    pub async fn dial(&self, addr: &str) -> Result<()> {
        let multiaddr: Multiaddr = addr
            .parse()
            .map_err(|e| MeshCommError::Transport(format!("invalid multiaddr '{addr}': {e}")))?;
        self.command_tx
            .send(SwarmCommand::Dial(multiaddr))
            .await
            .map_err(|_| MeshCommError::Transport("swarm task not running".into()))
    }

    /// Stop the swarm. Every open subscription ends with an error.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SwarmCommand::Shutdown).await;
    }
}

#[async_trait]
impl Transport for Libp2pTransport {
    fn local_id(&self) -> String {
        self.peer_id.to_string()
    }

    async fn join_topic(&self, topic: &str) -> Result<Arc<dyn TopicPublisher>> {
        if topic.is_empty() {
            return Err(MeshCommError::Join {
                topic: topic.to_string(),
                reason: "empty topic name".into(),
            });
        }
        if self.command_tx.is_closed() {
            return Err(MeshCommError::Join {
                topic: topic.to_string(),
                reason: "swarm task not running".into(),
            });
        }
        Ok(Arc::new(Libp2pPublisher {
            topic: topic.to_string(),
            command_tx: self.command_tx.clone(),
        }))
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicSubscription>> {
        let not_running = || MeshCommError::Join {
            topic: topic.to_string(),
            reason: "swarm task not running".into(),
        };
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(SwarmCommand::Subscribe {
                topic: topic.to_string(),
                reply,
            })
            .await
            .map_err(|_| not_running())?;
        let rx = response.await.map_err(|_| not_running())??;
        Ok(Box::new(Libp2pSubscription {
            topic: topic.to_string(),
            rx,
            command_tx: self.command_tx.clone(),
        }))
    }
}

struct Libp2pPublisher {
    topic: String,
    command_tx: mpsc::Sender<SwarmCommand>,
}

#[async_trait]
impl TopicPublisher for Libp2pPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<()> {
        let not_running = || MeshCommError::Publish {
            topic: self.topic.clone(),
            reason: "swarm task not running".into(),
        };
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(SwarmCommand::Publish {
                topic: self.topic.clone(),
                data,
                reply,
            })
            .await
            .map_err(|_| not_running())?;
        response.await.map_err(|_| not_running())?
    }
}

struct Libp2pSubscription {
    topic: String,
    rx: mpsc::Receiver<Delivery>,
    command_tx: mpsc::Sender<SwarmCommand>,
}

impl Drop for Libp2pSubscription {
    fn drop(&mut self) {
        // Close first so the swarm task already sees the sender as closed.
        self.rx.close();
        let _ = self.command_tx.try_send(SwarmCommand::Unsubscribe {
            topic: self.topic.clone(),
        });
    }
}

#[async_trait]
impl TopicSubscription for Libp2pSubscription {
    async fn next(&mut self) -> Result<Delivery> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| MeshCommError::SubscriptionClosed(self.topic.clone()))
    }
}

/// Build the libp2p Swarm with all sub-protocols configured.
fn build_swarm(enable_mdns: bool) -> Result<Swarm<MeshBehaviour>> {
    build_swarm_inner(enable_mdns)
        .map_err(|e| MeshCommError::Transport(format!("failed to build libp2p swarm: {e}")))
}

/// Inner builder that uses `Box<dyn Error>` for `?` across the various
/// libp2p builder error types.
fn build_swarm_inner(
    enable_mdns: bool,
) -> std::result::Result<Swarm<MeshBehaviour>, Box<dyn std::error::Error + Send + Sync>> {
    let swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|key| {
            // Content-address messages so duplicates are suppressed.
            let message_id_fn = |message: &gossipsub::Message| {
                let mut s = DefaultHasher::new();
                message.data.hash(&mut s);
                gossipsub::MessageId::from(s.finish().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(1))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .message_id_fn(message_id_fn)
                .max_transmit_size(MAX_TRANSMIT_SIZE)
                .build()
                .map_err(|e| std::io::Error::other(e.to_string()))?;

            let gossipsub = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| std::io::Error::other(e.to_string()))?;

            let mdns = if enable_mdns {
                Some(mdns::tokio::Behaviour::new(
                    mdns::Config::default(),
                    key.public().to_peer_id(),
                )?)
            } else {
                None
            };

            let identify = identify::Behaviour::new(
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_agent_version(format!("meshcomm/{}", env!("CARGO_PKG_VERSION"))),
            );

            Ok(MeshBehaviour {
                gossipsub,
                mdns: Toggle::from(mdns),
                identify,
            })
        })?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    Ok(swarm)
}

/// Per-topic delivery channels, keyed by gossipsub topic hash.
type Subscribers = HashMap<gossipsub::TopicHash, Vec<mpsc::Sender<Delivery>>>;

/// The swarm event loop. Runs as a background tokio task until `Shutdown`
/// or until every handle is dropped.
async fn run_swarm_loop(
    mut swarm: Swarm<MeshBehaviour>,
    mut command_rx: mpsc::Receiver<SwarmCommand>,
) {
    let mut subscribers: Subscribers = HashMap::new();

    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(&mut swarm, &mut subscribers, event).await;
            }

            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    info!("all transport handles dropped, swarm shutting down");
                    break;
                };
                match cmd {
                    SwarmCommand::Subscribe { topic, reply } => {
                        let ident = gossipsub::IdentTopic::new(&topic);
                        let result = match swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                            Ok(_) => {
                                let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
                                subscribers.entry(ident.hash()).or_default().push(tx);
                                info!(topic = %topic, "subscribed to topic");
                                Ok(rx)
                            }
                            Err(e) => Err(MeshCommError::Join {
                                topic: topic.clone(),
                                reason: e.to_string(),
                            }),
                        };
                        let _ = reply.send(result);
                    }
                    SwarmCommand::Publish { topic, data, reply } => {
                        let bytes = data.len();
                        let result = swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(gossipsub::IdentTopic::new(&topic), data)
                            .map(|id| debug!(topic = %topic, id = %id, bytes, "published message"))
                            .map_err(|e| MeshCommError::Publish {
                                topic: topic.clone(),
                                reason: e.to_string(),
                            });
                        let _ = reply.send(result);
                    }
                    SwarmCommand::Unsubscribe { topic } => {
                        let hash = gossipsub::IdentTopic::new(&topic).hash();
                        prune_subscribers(&mut swarm, &mut subscribers, &hash);
                    }
                    SwarmCommand::ListenAddrs { reply } => {
                        let _ = reply.send(swarm.listeners().cloned().collect());
                    }
                    SwarmCommand::Topics { reply } => {
                        let topics = swarm
                            .behaviour()
                            .gossipsub
                            .topics()
                            .map(|hash| hash.to_string())
                            .collect();
                        let _ = reply.send(topics);
                    }
                    SwarmCommand::Dial(addr) => {
                        if let Err(e) = swarm.dial(addr) {
                            warn!(error = %e, "failed to dial peer");
                        }
                    }
                    SwarmCommand::Shutdown => {
                        info!("swarm shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle a single swarm event.
async fn handle_swarm_event(
    swarm: &mut Swarm<MeshBehaviour>,
    subscribers: &mut Subscribers,
    event: SwarmEvent<MeshBehaviourEvent>,
) {
    match event {
        // ── mDNS: discovered new peers on the LAN ──────────────
        SwarmEvent::Behaviour(MeshBehaviourEvent::Mdns(mdns::Event::Discovered(list))) => {
            for (peer_id, addr) in list {
                info!(peer = %peer_id, addr = %addr, "mDNS discovered peer");
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                if let Err(e) = swarm.dial(addr) {
                    debug!(peer = %peer_id, error = %e, "dial after mDNS discovery failed");
                }
            }
        }

        SwarmEvent::Behaviour(MeshBehaviourEvent::Mdns(mdns::Event::Expired(list))) => {
            for (peer_id, _addr) in list {
                info!(peer = %peer_id, "mDNS peer expired");
                swarm
                    .behaviour_mut()
                    .gossipsub
                    .remove_explicit_peer(&peer_id);
            }
        }

        // ── GossipSub: route the payload to its topic's subscribers ──
        SwarmEvent::Behaviour(MeshBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message_id,
            message,
        })) => {
            debug!(
                source = %propagation_source,
                id = %message_id,
                topic = %message.topic,
                bytes = message.data.len(),
                "received gossipsub message"
            );
            let Some(senders) = subscribers.get(&message.topic) else {
                debug!(topic = %message.topic, "no local subscription for topic");
                return;
            };
            let delivery = Delivery {
                data: message.data,
                origin: propagation_source.to_string(),
            };
            for tx in senders.iter() {
                if tx.send(delivery.clone()).await.is_err() {
                    debug!(topic = %message.topic, "subscription dropped");
                }
            }
            prune_subscribers(swarm, subscribers, &message.topic);
        }

        SwarmEvent::Behaviour(MeshBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => {
            debug!(peer = %peer_id, topic = %topic, "peer subscribed to topic");
        }

        SwarmEvent::Behaviour(MeshBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            info!(peer = %peer_id, agent = %info.agent_version, "identified peer");
        }

        // ── Connection lifecycle ───────────────────────────────
        SwarmEvent::NewListenAddr { address, .. } => {
            info!(addr = %format!("{address}/p2p/{}", swarm.local_peer_id()), "listening");
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            info!(peer = %peer_id, "connection established");
        }
        SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
            info!(peer = %peer_id, cause = ?cause, "connection closed");
        }
        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            warn!(peer = ?peer_id, error = %error, "outgoing connection error");
        }
        SwarmEvent::IncomingConnectionError {
            local_addr,
            send_back_addr,
            error,
            ..
        } => {
            warn!(local = %local_addr, remote = %send_back_addr, error = %error, "incoming connection error");
        }

        _ => {}
    }
}

/// Drop closed delivery channels for `topic`. Once none remain the node
/// leaves the gossipsub topic.
fn prune_subscribers(
    swarm: &mut Swarm<MeshBehaviour>,
    subscribers: &mut Subscribers,
    topic: &gossipsub::TopicHash,
) {
    let Some(senders) = subscribers.get_mut(topic) else {
        return;
    };
    senders.retain(|tx| !tx.is_closed());
    if senders.is_empty() {
        subscribers.remove(topic);
        let _ = swarm
            .behaviour_mut()
            .gossipsub
            .unsubscribe(&gossipsub::IdentTopic::new(topic.as_str()));
        info!(topic = %topic, "left topic");
    }
}
