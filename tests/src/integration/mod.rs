//! # Integration Flows
//!
//! Producer → bus → relay fleet → sockets, with two or three relay
//! processes sharing one bus and one nonce store.

pub mod membership;
