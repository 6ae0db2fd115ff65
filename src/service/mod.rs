//! Service layer: fan-out engine and lifecycle handlers.

pub mod fanout;
pub mod relay_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use fanout::{BroadcastReport, FanoutEngine};
pub use relay_service::RelayService;
