//! protoquery-core
//!
//! Domain types, the error taxonomy, configuration, collaborator traits and
//! the protocol chunker shared by every other crate in the workspace.

pub mod answer;
pub mod chunker;
pub mod config;
pub mod criteria;
pub mod error;
pub mod extract;
pub mod traits;
pub mod types;

pub use error::{CollaboratorError, Error, ErrorKind, Result};
