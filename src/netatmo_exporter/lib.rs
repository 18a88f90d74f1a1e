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

//! Prometheus metrics exporter for Netatmo weather stations
//!
//! ## Features
//!
//! `netatmo_exporter` reads sensor data of [Netatmo weather stations] and their modules
//! from the Netatmo API and emits it as Prometheus metrics. Data is fetched in the background
//! at most once per refresh interval (the API is rate limited) and scrapes are always answered
//! from cached data, so a slow or failing API never slows down a scrape.
//!
//! The following metrics are emitted for each station and module when available (not all
//! modules measure everything). Stations or modules that haven't reported in longer than the
//! stale threshold are left out entirely.
//!
//! * `netatmo_sensor_updated{module=$MODULE, station=$STATION}` - UNIX timestamp of the last measurement.
//! * `netatmo_sensor_temperature_celsius{module=$MODULE, station=$STATION}` - Temperature, in degrees celsius.
//! * `netatmo_sensor_humidity_percent{module=$MODULE, station=$STATION}` - Relative humidity (0-100).
//! * `netatmo_sensor_co2_ppm{module=$MODULE, station=$STATION}` - Carbon dioxide, in parts per million.
//! * `netatmo_sensor_noise_db{module=$MODULE, station=$STATION}` - Noise, in decibels.
//! * `netatmo_sensor_pressure_mb{module=$MODULE, station=$STATION}` - Atmospheric pressure, in millibar.
//! * `netatmo_sensor_wind_strength_kph{module=$MODULE, station=$STATION}` - Wind strength, in km/h.
//! * `netatmo_sensor_wind_direction_degrees{module=$MODULE, station=$STATION}` - Wind direction, in degrees.
//! * `netatmo_sensor_rain_amount_mm{module=$MODULE, station=$STATION}` - Rain amount, in millimeters.
//! * `netatmo_sensor_battery_percent{module=$MODULE, station=$STATION}` - Remaining battery life.
//! * `netatmo_sensor_wifi_signal_strength{module=$MODULE, station=$STATION}` - Wifi signal strength.
//! * `netatmo_sensor_rf_signal_strength{module=$MODULE, station=$STATION}` - RF signal strength.
//!
//! The exporter also reports on itself.
//!
//! * `netatmo_up` - Zero if no data has been fetched yet or the last refresh failed.
//! * `netatmo_refresh_interval_seconds` - Configured refresh interval, in seconds.
//! * `netatmo_last_refresh_time` - UNIX timestamp of the last refresh attempt, successful or not.
//! * `netatmo_last_refresh_duration_seconds` - Duration of the last refresh attempt, in seconds.
//! * `netatmo_cache_updated_time` - UNIX timestamp of the cached data, zero if there is none.
//! * `netatmo_exporter_token_valid` - One if the exporter has a valid API token.
//! * `netatmo_exporter_token_expiry_time` - UNIX timestamp when the API token expires.
//!
//! [Netatmo weather stations]: https://dev.netatmo.com/apidocumentation/weather
//!
//! ## Usage
//!
//! The exporter doesn't talk to the Netatmo API itself. Any async function returning a
//! [`device::DeviceCollection`] can be used to fetch data. Build a [`cache::RefreshCache`] around
//! it and register a [`collector::NetatmoCollector`] with a `prometheus_client` registry.
//!
//! ```no_run
//! use netatmo_exporter::cache::{ReadError, RefreshCache};
//! use netatmo_exporter::clock::SystemClock;
//! use netatmo_exporter::collector::NetatmoCollector;
//! use netatmo_exporter::config::ExporterConfig;
//! use netatmo_exporter::device::DeviceCollection;
//! use netatmo_exporter::sensor::SensorMapper;
//! use prometheus_client::registry::Registry;
//! use std::sync::Arc;
//!
//! async fn read_stations() -> Result<DeviceCollection, ReadError> {
//!     // Call the Netatmo station data API here
//!     Ok(DeviceCollection::default())
//! }
//!
//! let config = ExporterConfig::from_args(std::env::args_os()).unwrap();
//! let clock = Arc::new(SystemClock);
//! let cache = RefreshCache::new(read_stations, clock.clone(), config.refresh_interval());
//! let collector = NetatmoCollector::new(cache, SensorMapper::new(config.stale_threshold()), clock);
//!
//! let mut registry = Registry::default();
//! registry.register_collector(Box::new(collector));
//! ```
//!
//! ### Configuration
//!
//! Every setting can be given as a flag or an environment variable.
//!
//! * `--log-level` / `NETATMO_LOG_LEVEL` - Logging verbosity, default `info`.
//! * `--refresh-interval` / `NETATMO_REFRESH_INTERVAL` - Minimum time between API reads, default `8m`.
//! * `--age-stale` / `NETATMO_AGE_STALE` - Maximum age of exported data, default `1h`. Must not be
//!   smaller than the refresh interval.
//!
//! Durations are written with units, like `90s`, `8m` or `1h 30m`.
//! * `--token-file` / `NETATMO_EXPORTER_TOKEN_FILE` - Where to persist the API token.
//! * `--client-id` / `NETATMO_CLIENT_ID` - Client ID of the Netatmo app.
//! * `--client-secret` / `NETATMO_CLIENT_SECRET` - Client secret of the Netatmo app.
//!

pub mod cache;
pub mod clock;
pub mod collector;
pub mod config;
pub mod device;
pub mod sensor;
pub mod token;
