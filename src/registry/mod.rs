//! Stream registry for producer/subscriber routing
//!
//! The registry owns the map from stream key to stream entry. It starts
//! exactly one upstream producer per distinct `(source URL, liveness)`
//! pair, fans its messages out to every subscriber through
//! `tokio::sync::broadcast`, and tears entries down once they are
//! unreferenced, not kept alive, and past their idle grace period.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<StreamRegistry>
//!                   ┌───────────────────────────┐
//!                   │ streams: HashMap<Key,     │
//!                   │   StreamEntry {           │
//!                   │     replay, tx,           │
//!                   │     ref_count, producer,  │
//!                   │     idle_teardown,        │
//!                   │   }                       │
//!                   │ >                         │
//!                   └─────────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Producer]             [Subscriber]            [Subscriber]
//!    publisher.publish()    handle.recv()           handle.recv()
//!         │                       │                       │
//!         └──► broadcast fan-out ─┴──► WebSocket ─────────┘
//! ```
//!
//! # Backpressure
//!
//! Publishing never blocks. Each entry's channel holds a bounded window;
//! a subscriber that falls behind loses the oldest messages (surfaced once
//! as a lag error) while the producer and the other subscribers continue
//! unaffected.

pub mod config;
pub mod entry;
pub mod error;
pub mod message;
pub mod replay;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ProducerHandle, ProducerStarter, ProducerState, StreamEntry, StreamPublisher, StreamStats};
pub use error::{RegistryError, StreamRecvError};
pub use message::{OutgoingMessage, StreamKey};
pub use replay::ReplayBuffer;
pub use store::{StreamHandle, StreamRegistry};
