//! # Relay Worker
//!
//! Session-oriented producer and consumer loops over the relay-runtime
//! broker abstraction, plus the background lock-renewal helper that keeps
//! message and session leases alive while application processing is in
//! flight.
//!
//! The three components cooperate only through the broker:
//!
//! - [`producer::SessionProducer`] pushes work messages into a named
//!   session and can send a designated shutdown sentinel as a one-shot.
//! - [`consumer::SessionConsumer`] drains a session as an explicit state
//!   machine, settling every message through a single configurable
//!   [`settlement::SettlementPolicy`] and recording lifecycle markers in
//!   broker-persisted session state.
//! - [`renewal::LockRenewer`] runs one background task per registered
//!   lockable, decoupling renewal cadence from processing time.

pub mod consumer;
pub mod producer;
pub mod renewal;
pub mod settlement;

pub use consumer::{
    ConsumerPhase, ConsumerReport, SessionConsumer, SessionConsumerConfig, SessionMarkers,
};
pub use producer::{ProducerReport, SessionProducer, SessionProducerConfig};
pub use renewal::{LockRenewer, RenewalError, RenewalFailure};
pub use settlement::SettlementPolicy;

/// Default payload convention signaling consumer-loop termination
pub const DEFAULT_SENTINEL: &str = "shutdown";
