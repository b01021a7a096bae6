//! # Attack Simulations
//!
//! Each module plays one attacker against a live relay fleet and asserts
//! that nothing reaches a socket.

pub mod clock;
pub mod forgery;
pub mod replay;
pub mod store_outage;
