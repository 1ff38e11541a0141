//! # treeguard-core
//!
//! A boundary-margin defense for served axis-aligned decision-tree
//! classifiers against black-box model-extraction attacks.
//!
//! The engine learns, per leaf, a security margin around every decision
//! threshold on the leaf's root-to-leaf path, derived from the leaf-local
//! training-sample distribution. Queries landing inside a margin are
//! counted as boundary probes; once the aggregate in-margin ratio crosses
//! a configured threshold the guard latches and reacts (blocks the caller
//! or serves decoy leaves).

pub mod config;
pub mod density;
pub mod error;
pub mod export;
pub mod feature;
pub mod guard;
pub mod margin;
pub mod paths;
pub mod tree;

pub use error::{GuardError, Result};
