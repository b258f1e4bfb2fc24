//! Shared scaffolding for test cases.

use crate::prelude::*;

/// Stand up a fully bootstrapped in-memory server. Most tests reach this
/// through the `run_test!` macro, which also verifies consistency on the
/// way out; tests that need several servers or special configuration call
/// it directly.
#[allow(clippy::expect_used)]
pub fn setup_test(config: DirectoryConfig) -> DirectoryServer {
    sketching::test_init();

    DirectoryServer::new(config).expect("Failed to set up directory server")
}
