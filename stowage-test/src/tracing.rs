use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Crates whose events are captured at the test level.
const CRATE_NAMES: &[&str] = &["stowage_cli", "stowage_service", "stowage_types"];

/// Dependencies that stay at `error` even though everything else is logged from `warn`.
///
/// The SDK clients report every retry and credential lookup as a warning.
const QUIET_DEPENDENCIES: &[&str] = &["aws_config", "aws_smithy_runtime", "hyper_util"];

/// Environment variable that lowers the level of the stowage crates, for example to `debug`.
pub const LEVEL_ENV: &str = "STOWAGE_TEST_LOG";

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner. Events of the stowage crates are
/// captured at `TRACE`, or at the level set in `STOWAGE_TEST_LOG`.
///
/// # Example
///
/// ```
/// stowage_test::tracing::init();
/// ```
pub fn init() {
    let level = level_from(std::env::var(LEVEL_ENV).ok());

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

fn level_from(value: Option<String>) -> LevelFilter {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(LevelFilter::TRACE)
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    let quiet = QUIET_DEPENDENCIES.iter().map(|name| format!("{name}=error"));
    let ours = CRATE_NAMES.iter().map(|name| format!("{name}={level}"));

    let directives: Vec<_> = std::iter::once("warn".to_owned())
        .chain(quiet)
        .chain(ours)
        .collect();
    EnvFilter::new(directives.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_trace() {
        assert_eq!(level_from(None), LevelFilter::TRACE);
        assert_eq!(level_from(Some("nonsense".into())), LevelFilter::TRACE);
        assert_eq!(level_from(Some(" debug ".into())), LevelFilter::DEBUG);
    }

    #[test]
    fn filter_follows_level() {
        assert_eq!(
            env_filter(LevelFilter::TRACE).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
        assert_eq!(
            env_filter(LevelFilter::INFO).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }
}
