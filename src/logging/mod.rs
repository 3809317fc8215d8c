//! Console and log-file output built on `tracing`.

mod logger;
mod subscriber;
mod types;
mod utils;

pub use logger::Logger;
pub use subscriber::init_subscriber;
pub use types::{Log, StepEntry, StepStatus};

/// Serializes log directory overrides across parallel test threads.
#[cfg(test)]
pub(crate) static TEST_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// A [`Logger`] whose file lives in a fresh temp dir, with a thread-local
/// subscriber feeding that file.
///
/// Keep the guard alive for the whole test.
#[cfg(test)]
#[allow(clippy::expect_used, unsafe_code)]
pub(crate) fn isolated_logger() -> (Logger, tempfile::TempDir, tracing::dispatcher::DefaultGuard) {
    use tracing_subscriber::{Layer as _, filter::LevelFilter, layer::SubscriberExt as _};
    let tmp = tempfile::tempdir().expect("temp dir");
    let (file_layer, log) = {
        let _env = TEST_ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // SAFETY: TEST_ENV_MUTEX serializes every test touching this variable.
        unsafe { std::env::set_var(utils::LOG_DIR_ENV, tmp.path()) };
        let layer = subscriber::FileLayer::new("test");
        let log = Logger::new("test");
        // SAFETY: as above; removed before the mutex is released.
        unsafe { std::env::remove_var(utils::LOG_DIR_ENV) };
        (layer.expect("file layer in temp dir"), log)
    };
    let subscriber =
        tracing_subscriber::registry().with(file_layer.with_filter(LevelFilter::DEBUG));
    let guard = tracing::dispatcher::set_default(&tracing::Dispatch::new(subscriber));
    (log, tmp, guard)
}
