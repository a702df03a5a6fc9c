//! State management for stackplan.
//!
//! This module tracks provisioned resources per stage and group, and
//! persists the whole document through a [`StateStore`].

mod local;
mod manager;
mod resource;
mod resource_list;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use manager::{DEFAULT_PRESERVED_KEYS, State};
pub use resource::{Resource, ResourceKey};
pub use resource_list::ResourceList;
pub use store::StateStore;
pub use types::{Facts, ResourcePatch, STATE_VERSION, StageResources, StateDocument};
