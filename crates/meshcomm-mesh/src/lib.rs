//! # meshcomm-mesh
//!
//! Chat message distribution over a gossip mesh.
//!
//! A [`MeshNetwork`] joins one gossip topic per [`Category`], runs one
//! dispatch loop per topic that drops our own echoes and decodes payloads,
//! keeps every accepted message in an in-memory [`MessageStore`], and fans
//! them out to registered observers.
//!
//! The network talks to the wire only through the [`Transport`] seam.
//! [`Libp2pTransport`] is the real one (TCP + Noise + Yamux + GossipSub);
//! [`memory::MemoryHub`] wires nodes together inside one process.
//!
//! [`Category`]: meshcomm_core::Category

pub mod dispatch;
pub mod memory;
pub mod network;
pub mod observers;
pub mod store;
pub mod swarm;
pub mod topics;
pub mod transport;

pub use dispatch::{LoopState, StopReason, TopicHealth};
pub use network::{MeshNetwork, NetworkOptions, PublishOutcome};
pub use observers::{ObserverId, ObserverRegistry};
pub use store::MessageStore;
pub use swarm::{Libp2pTransport, SwarmOptions};
pub use topics::TopicTable;
pub use transport::{Delivery, TopicPublisher, TopicSubscription, Transport};
