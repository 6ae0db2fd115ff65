//! Domain layer: connection identity, wire envelopes and the cached state.
//!
//! These types carry no behaviour beyond construction and serialization;
//! the registry, cache and fan-out logic live in `persistence` and
//! `service`.

pub mod connection_id;
pub mod envelope;
pub mod last_state;

pub use connection_id::ConnectionId;
pub use envelope::{Envelope, InboundFrame};
pub use last_state::LastState;
