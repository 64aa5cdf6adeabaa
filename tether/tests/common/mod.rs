use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Installs a test subscriber once per test binary.
pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("tether_container=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
