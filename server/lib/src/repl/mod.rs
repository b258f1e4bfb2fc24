//! Replication. Change sequence numbers order every committed mutation,
//! and the consumer pulls newer changes from a provider replica through
//! the ordinary session interface.

pub mod consumer;
pub mod csn;
