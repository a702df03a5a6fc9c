// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # stackplan
//!
//! A declarative, idempotent reconciliation planner for multi-tier
//! application stacks.
//!
//! ## Overview
//!
//! Given a project's desired configuration (services, software dependencies
//! and cross-cutting utilities) and the persisted record of what was
//! provisioned before, stackplan computes the minimal set of provision,
//! modify and terminate actions that converge reality to the desired state,
//! and hands that changeset to an external executor.
//!
//! ## Architecture
//!
//! 1. **Desired state**: deployables built from the project file and the
//!    capability tables ([`deployable`]).
//! 2. **Known state**: resources recorded per stage and group ([`state`]).
//! 3. **Planner**: per-group changesets ([`planner`]).
//! 4. **Reconciler**: walks groups in dependency order, cascades changes,
//!    applies facts reported by the executor ([`reconciler`]).
//!
//! ## Modules
//!
//! - [`config`]: Capability tables, project file parsing and hashing
//! - [`deployable`]: Deployable model, schemas and factory
//! - [`state`]: Resources, resource lists and state storage
//! - [`planner`]: Parameter diffs, changesets and the provisioner
//! - [`reconciler`]: Group-by-group reconciliation driver
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! framework: rails
//! repository: git@github.com:acme/shop.git
//! provider: aws
//! region: eu-central-1
//!
//! production:
//!   domain: shop.example.com
//!   services:
//!     - type: application
//!       name: shop-app
//!       size: t2.medium
//!       storage: 30
//!       nodes: 2
//!     - type: mysql
//!       name: shop-db
//!       size: db.t2.micro
//!       storage: 100
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployable;
pub mod error;
pub mod params;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Capabilities, ConfigHasher, ConfigParser, ProjectConfig};
pub use deployable::{Deployable, DeployableFactory, DeployableSet};
pub use error::{Result, StackplanError};
pub use params::Params;
pub use planner::{ChangeCategory, Changeset, ChangesetExecutor, GroupGraph, Provisioner};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, Resource, ResourceList, State, StateDocument, StateStore};
