#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Distributed leadership election on top of an exclusive lease service
//! and a cluster broadcast fabric.
//!
//! Every node contests topics through a [`LeadershipManager`], gossips the
//! leadership events it originates, and merges local and remote events
//! into a [`LeaderTable`] ordered by lease epoch.

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod gossip;
pub mod lease;
pub mod listener;
pub mod membership;
pub mod messaging;
pub mod scheduler;
pub mod table;

pub mod test_utils;

pub use config::LeadershipConfig;
pub use coordinator::{ContestState, LeadershipManager};
pub use error::{Error, Result};
pub use event::{Epoch, Leadership, LeadershipEvent, LeadershipEventType, NodeId};
pub use listener::{LeadershipEventListener, ListenerRegistry};
pub use table::{LeaderTable, MergeOutcome};
