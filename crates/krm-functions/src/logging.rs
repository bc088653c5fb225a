//! Sets up `tracing` for function runs.
//!
//! Standard output carries the resulting ResourceList, so console logs are
//! written to standard error.
use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt};

/// The environment variable holding the log filter, e.g.
/// `KRM_FN_LOG=krm_fieldspec=debug`.
pub const LOG_ENV: &str = "KRM_FN_LOG";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// Logging related command line arguments.
#[derive(clap::Args, Debug, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Disable console logs.
    #[arg(long, env)]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[arg(long, env, value_name = "DIRECTORY", group = "file_log")]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[arg(long, env, value_name = "PERIOD", requires = "file_log")]
    pub file_log_rotation_period: Option<RotationPeriod>,
}

/// Supported periods when the log file is rolled over.
#[derive(clap::ValueEnum, Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

/// Installs the global subscriber.
///
/// The filter is read from the environment variable `env` and defaults to
/// `INFO`. File logs are written as JSON to `{app_name}.*.log` files inside
/// the configured directory.
pub fn initialize_logging(
    env: &str,
    app_name: &str,
    options: &LoggingOptions,
) -> Result<(), Error> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if !options.console_log_disabled {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter(env))
                .boxed(),
        );
    }

    if let Some(directory) = &options.file_log_directory {
        let rotation = options
            .file_log_rotation_period
            .clone()
            .unwrap_or_default();
        let file_appender = RollingFileAppender::builder()
            .rotation(rotation.into())
            .filename_prefix(app_name)
            .filename_suffix("log")
            .max_log_files(6)
            .build(directory)
            .context(InitRollingFileAppenderSnafu)?;

        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_filter(env_filter(env))
                .boxed(),
        );
    }

    if !layers.is_empty() {
        tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
            .context(SetGlobalDefaultSubscriberSnafu)?;
    }

    // need to delay logging until after tracing is initialized
    match &options.file_log_directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

fn env_filter(env: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env)
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        logging: LoggingOptions,
    }

    #[rstest]
    #[case("minutely", RotationPeriod::Minutely)]
    #[case("daily", RotationPeriod::Daily)]
    #[case("never", RotationPeriod::Never)]
    fn parse_rotation_period(#[case] input: &str, #[case] expected: RotationPeriod) {
        assert_eq!(input.parse::<RotationPeriod>(), Ok(expected));
    }

    #[test]
    fn rotation_period_requires_directory() {
        assert!(Cli::try_parse_from(["krm-fn", "--file-log-rotation-period", "hourly"]).is_err());

        let cli = Cli::try_parse_from([
            "krm-fn",
            "--file-log-directory",
            "/tmp/logs",
            "--file-log-rotation-period",
            "hourly",
        ])
        .expect("arguments are valid");
        assert_eq!(
            cli.logging.file_log_rotation_period,
            Some(RotationPeriod::Hourly)
        );
    }

    #[test]
    fn file_logging_creates_log_files() {
        let directory = tempfile::tempdir().expect("temporary directory can be created");
        let options = LoggingOptions {
            console_log_disabled: true,
            file_log_directory: Some(directory.path().to_owned()),
            file_log_rotation_period: None,
        };

        initialize_logging("KRM_FN_LOGGING_TEST", "krm-fn-test", &options)
            .expect("logging can be initialized once");
        tracing::info!("written to the log file");

        let files = std::fs::read_dir(directory.path())
            .expect("log directory is readable")
            .count();
        assert_eq!(files, 1);
    }
}
