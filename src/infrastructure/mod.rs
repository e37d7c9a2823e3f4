//! Infrastructure layer: the in-memory resource store plus sandbox
//! implementations of the ledger and transport ports.

pub mod in_memory;
pub mod ledger;
pub mod transport;
