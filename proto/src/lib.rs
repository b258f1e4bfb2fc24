//! Protocol-facing types shared between the Atrium server core and its
//! front-ends. Everything here is serialisable and free of server logic so
//! that wire handlers, tools and tests can all speak the same taxonomy.
#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

pub mod attribute;
pub mod constants;
pub mod error;
pub mod message;

pub use crate::attribute::AttrString;
pub use crate::error::{ConsistencyError, OperationError, ResultCode, SchemaError};
