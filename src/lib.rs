//! Browse a remote hierarchical data store, mirror files into a local
//! cache, and launch viewer applications against them — natively or in
//! managed containers — with each launch recorded as a committable
//! analysis.

pub mod analysis;
pub mod apps;
pub mod cache;
pub mod error;
pub mod hierarchy;
pub mod launch;
pub mod model;
pub mod remote;
pub mod runtime;
pub mod template;

pub use error::{Error, Result};
