//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ClientSessionTable`: per-client leg bindings and subscribe/sync flows
//! - `FanoutDispatcher`: per-client payloads on every tick batch
//! - `SessionConnector`: upstream connect with identity-conflict recovery

pub mod connector;
pub mod dispatcher;
pub mod sessions;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{ConnectorError, ConnectorSettings, ConnectorState, SessionConnector};
pub use dispatcher::{FanoutDispatcher, build_payload};
pub use sessions::{
    ClientBindings, ClientId, ClientSessionTable, DEFAULT_SYNC_GRACE, SubscribeError,
    SubscribeReport,
};
