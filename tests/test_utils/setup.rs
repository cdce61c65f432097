use small_gist::utils;

/// # Conduct the initialization
///
/// - Setting up log configurations.
///
/// Tests share the process-wide database, so there is deliberately no
/// global reset here; every test works on its own index file.
pub fn setup() {
    utils::init_log();
}
