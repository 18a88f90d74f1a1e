// netatmo_exporter - Prometheus metrics exporter for Netatmo weather stations
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use std::error;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_REFRESH_INTERVAL: &str = "8m";
const DEFAULT_AGE_STALE: &str = "1h";

#[derive(Debug)]
pub enum ConfigError {
    Args(clap::Error),
    MissingClientId,
    MissingClientSecret,
    StaleBelowRefresh { stale: Duration, refresh: Duration },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Args(e) => write!(f, "{}", e),
            Self::MissingClientId => write!(f, "need a Netatmo client ID"),
            Self::MissingClientSecret => write!(f, "need a Netatmo client secret"),
            Self::StaleBelowRefresh { stale, refresh } => write!(
                f,
                "stale duration smaller than refresh interval: {}s < {}s",
                stale.as_secs(),
                refresh.as_secs()
            ),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Args(e) => Some(e),
            _ => None,
        }
    }
}

/// Settings for the exporter, from command line flags or the environment.
#[derive(Debug, Clone, Parser)]
#[clap(name = "netatmo_exporter", version = clap::crate_version!())]
pub struct ExporterConfig {
    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "NETATMO_LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    pub log_level: Level,

    /// Fetch sensor data from the Netatmo API at most this often, e.g. '8m' or '90s'.
    /// Scrapes in between are served from cached data.
    #[clap(
        long,
        env = "NETATMO_REFRESH_INTERVAL",
        value_parser = humantime::parse_duration,
        default_value = DEFAULT_REFRESH_INTERVAL
    )]
    pub refresh_interval: Duration,

    /// Sensor data older than this is considered stale and not exported. Must not be
    /// smaller than the refresh interval.
    #[clap(
        long,
        env = "NETATMO_AGE_STALE",
        value_parser = humantime::parse_duration,
        default_value = DEFAULT_AGE_STALE
    )]
    pub age_stale: Duration,

    /// Path to token file for loading and persisting the authentication token
    #[clap(long, env = "NETATMO_EXPORTER_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Client ID of the Netatmo app
    #[clap(long, env = "NETATMO_CLIENT_ID")]
    pub client_id: String,

    /// Client secret of the Netatmo app
    #[clap(long, env = "NETATMO_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,
}

impl ExporterConfig {
    /// Parse and validate settings from the given command line arguments, falling
    /// back to environment variables for anything not set by a flag.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::try_parse_from(args).map_err(ConfigError::Args)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }

        if self.client_secret.trim().is_empty() {
            return Err(ConfigError::MissingClientSecret);
        }

        if self.stale_threshold() < self.refresh_interval() {
            return Err(ConfigError::StaleBelowRefresh {
                stale: self.stale_threshold(),
                refresh: self.refresh_interval(),
            });
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn stale_threshold(&self) -> Duration {
        self.age_stale
    }
}

/// Install a global `tracing` subscriber writing events at `level` and above.
pub fn init_logging(level: Level) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    )
}
