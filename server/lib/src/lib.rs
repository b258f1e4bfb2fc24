//! The Atrium server library. This implements the internal components of the
//! directory: the naming and entry model, the schema registry, the
//! interceptor chain every operation runs through, partition storage, access
//! control evaluation, sessions and replication.

#![deny(warnings)]
#![recursion_limit = "512"]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod macros;

pub mod constants;
pub mod dn;
pub mod entry;
pub mod event;
pub mod filter;
pub mod interceptor;
pub mod matching;
pub mod modify;
pub mod partition;
pub mod repl;
pub mod schema;
pub mod server;
pub mod session;
pub mod testkit;
pub(crate) mod utils;
pub mod value;
pub mod valueset;

/// A prelude of imports that should be imported by all other Atrium modules
/// to help make imports cleaner.
pub mod prelude {
    pub use atrium_proto::attribute::{attr_fold, AttrString};
    pub use atrium_proto::constants::*;
    pub use atrium_proto::{ConsistencyError, OperationError, SchemaError};
    pub use sketching::{
        admin_debug, admin_error, admin_info, admin_warn, filter_error, filter_info, filter_trace,
        filter_warn, perf_trace, request_error, request_info, request_trace, request_warn,
        security_access, security_critical, security_debug, security_error, security_info,
        tagged_event, EventTag,
    };
    pub use std::time::Duration;
    pub use uuid::{uuid, Uuid};

    pub use crate::constants::*;
    pub use crate::dn::{Ava, Dn, Rdn};
    pub use crate::entry::Entry;
    pub use crate::filter::{Filter, SearchScope, SubFilter};
    pub use crate::modify::{m_pres, m_purge, m_remove, Modify, ModifyList};
    pub use crate::repl::csn::Csn;
    pub use crate::schema::{Schema, SchemaReadTransaction, SchemaTransaction};
    pub use crate::server::access::AccessControlsTransaction;
    pub use crate::server::identity::{IdentType, IdentUser, Identity, Limits};
    pub use crate::server::{DirectoryConfig, DirectoryServer};
    pub use crate::session::Session;
    pub use crate::utils::duration_from_epoch_now;
    pub use crate::value::{PartialValue, SyntaxType, Value};
    pub use crate::valueset::ValueSet;
}
