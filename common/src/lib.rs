//! SimpleBank Common Types
//!
//! Identifiers, currency codes and the error taxonomy shared by the ledger
//! store, the transfer engine and the simulator.

pub mod identifiers;
pub mod monetary;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
