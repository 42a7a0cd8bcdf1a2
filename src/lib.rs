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
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Terrace
//!
//! A declarative, dependency-aware infrastructure provisioning engine with
//! plan/apply semantics.
//!
//! ## Overview
//!
//! Terrace reads a desired-state description of typed resources, builds a
//! dependency graph from the references between them, compares it with the
//! last recorded state, and converges the two through a provider:
//!
//! - Declare resources and their cross-references in a YAML file
//! - Preview every create, update, replace and delete before it happens
//! - Apply independent changes concurrently, dependent ones in order
//! - Keep durable state so re-running an unchanged configuration does nothing
//!
//! ## Architecture
//!
//! 1. **Graph**: resources and `${type.name.key}` references form a DAG
//! 2. **Planner**: per-attribute diffs against the snapshot, classified by
//!    per-type policies into an ordered plan
//! 3. **Executor**: runs the plan on a bounded worker pool, resolving
//!    references from completed operations and recording each success
//! 4. **State**: a snapshot persisted locally or in S3, guarded by a lock
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`graph`]: Resource identities, references and the dependency graph
//! - [`planner`]: Diff policies, planning and plan execution
//! - [`provider`]: Provider capability, retries, simulated and HTTP providers
//! - [`state`]: State storage backends (local, S3)
//! - [`reconciler`]: Run orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: web-stack
//!
//! resources:
//!   - type: network
//!     name: main
//!     attributes:
//!       cidr_block: "10.0.0.0/16"
//!   - type: subnet
//!     name: public
//!     attributes:
//!       network_id: "${network.main.id}"
//!       cidr_block: "10.0.1.0/24"
//!
//! outputs:
//!   subnet_id: "${subnet.public.id}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, TerraceConfig};
pub use error::{Result, TerraceError};
pub use graph::{GraphBuilder, ResourceGraph, ResourceId, ResourceNode};
pub use planner::{ExecutionReport, Executor, Plan, Planner};
pub use provider::{HttpProvider, Provider, SimulatedProvider};
pub use reconciler::{Reconciler, RunReport};
pub use state::{LocalStateStore, S3StateStore, StateSnapshot, StateStore};
