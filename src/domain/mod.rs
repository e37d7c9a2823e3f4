//! Domain layer: wallet entities, the compliance negotiation protocol and the
//! ports the application core talks to the outside world through.

pub mod account;
pub mod identifier;
pub mod kyc;
pub mod negotiation;
pub mod ports;
pub mod transaction;
