//! Collection literals and the test harness entry point. Declared before
//! every other module in `lib.rs` so the import order works.

macro_rules! btreeset {
    () => {
        std::collections::BTreeSet::new()
    };
    ( $($x:expr),* $(,)? ) => {{
        let mut set = std::collections::BTreeSet::new();
        $(set.insert($x);)*
        set
    }};
}

macro_rules! smolset {
    ( $($x:expr),* $(,)? ) => {{
        let mut set = smolset::SmolSet::new();
        $(set.insert($x);)*
        set
    }};
}

/// Run a test body against a freshly bootstrapped default server, then
/// assert the post-run consistency checks come back clean.
#[cfg(test)]
macro_rules! run_test {
    ($test_fn:expr) => {{
        let server = crate::testkit::setup_test(crate::server::DirectoryConfig::default());
        $test_fn(&server);
        let errs: Vec<_> = server
            .verify()
            .into_iter()
            .filter(|r| r.is_err())
            .collect();
        assert!(errs.is_empty(), "server verification failed: {:?}", errs);
    }};
}
