//! Interface adapters exposing the wallet to the outside world.

pub mod http;
