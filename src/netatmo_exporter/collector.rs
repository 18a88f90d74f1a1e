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

use crate::cache::RefreshCache;
use crate::clock::{unix_secs, Clock};
use crate::sensor::{SensorMapper, SensorMetric, SensorValue};
use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::metrics::MetricType;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const UP: (&str, &str) = ("netatmo_up", "Zero if there was an error during the last refresh try.");
const REFRESH_INTERVAL: (&str, &str) = (
    "netatmo_refresh_interval_seconds",
    "Contains the configured refresh interval in seconds. This is provided as a convenience for calculations with the cache update time.",
);
const LAST_REFRESH_TIME: (&str, &str) = (
    "netatmo_last_refresh_time",
    "Contains the time of the last refresh try, successful or not.",
);
const LAST_REFRESH_DURATION: (&str, &str) = (
    "netatmo_last_refresh_duration_seconds",
    "Contains the time it took for the last refresh to complete, even if it was unsuccessful.",
);
const CACHE_UPDATED_TIME: (&str, &str) = ("netatmo_cache_updated_time", "Contains the time of the cached data.");

/// Everything reported by a single scrape of the `NetatmoCollector`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scrape {
    pub up: bool,
    pub refresh_interval: Duration,
    pub last_refresh: Option<SystemTime>,
    pub last_refresh_duration: Duration,
    pub cache_updated: Option<SystemTime>,
    pub sensors: Vec<SensorValue>,
}

/// Prometheus collector for Netatmo sensor values.
///
/// Each scrape starts a background refresh of the underlying cache when one is due
/// and then reports whatever data is currently cached, without waiting for the
/// refresh. Sensor values are only reported for stations and modules that have
/// reported recently, see `SensorMapper`.
pub struct NetatmoCollector {
    cache: RefreshCache,
    mapper: SensorMapper,
    clock: Arc<dyn Clock>,
}

impl NetatmoCollector {
    pub fn new(cache: RefreshCache, mapper: SensorMapper, clock: Arc<dyn Clock>) -> Self {
        NetatmoCollector { cache, mapper, clock }
    }

    pub fn cache(&self) -> &RefreshCache {
        &self.cache
    }

    /// Refresh cached data if due and build the values to report.
    pub fn scrape(&self) -> Scrape {
        let now = self.clock.now();
        if self.cache.maybe_refresh(now) {
            tracing::debug!(message = "started background refresh");
        }

        let state = self.cache.state();
        let sensors: Vec<SensorValue> = state
            .snapshot()
            .map(|snapshot| {
                snapshot
                    .devices()
                    .iter()
                    .flat_map(|station| self.mapper.station(station, now))
                    .collect()
            })
            .unwrap_or_default();

        Scrape {
            up: state.is_up(),
            refresh_interval: self.cache.refresh_interval(),
            last_refresh: state.last_refresh(),
            last_refresh_duration: state.last_duration(),
            cache_updated: state.snapshot().map(|s| s.captured_at()),
            sensors,
        }
    }
}

impl fmt::Debug for NetatmoCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetatmoCollector")
            .field("cache", &self.cache)
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}

impl Collector for NetatmoCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let scrape = self.scrape();

        encode_gauge(&mut encoder, UP, if scrape.up { 1.0 } else { 0.0 })?;
        encode_gauge(&mut encoder, REFRESH_INTERVAL, scrape.refresh_interval.as_secs_f64())?;
        encode_gauge(&mut encoder, LAST_REFRESH_TIME, unix_secs(scrape.last_refresh))?;
        encode_gauge(
            &mut encoder,
            LAST_REFRESH_DURATION,
            scrape.last_refresh_duration.as_secs_f64(),
        )?;
        encode_gauge(&mut encoder, CACHE_UPDATED_TIME, unix_secs(scrape.cache_updated))?;

        for metric in SensorMetric::ALL {
            let mut values = scrape.sensors.iter().filter(|v| v.metric == metric).peekable();
            if values.peek().is_none() {
                continue;
            }

            let mut family = encoder.encode_descriptor(metric.name(), metric.help(), None, MetricType::Gauge)?;
            for v in values {
                let metric_encoder = family.encode_family(&v.labels)?;
                ConstGauge::new(v.value).encode(metric_encoder)?;
            }
        }

        Ok(())
    }
}

/// Encode a gauge without any labels.
pub(crate) fn encode_gauge(
    encoder: &mut DescriptorEncoder,
    (name, help): (&'static str, &'static str),
    value: f64,
) -> Result<(), fmt::Error> {
    let metric_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
    ConstGauge::new(value).encode(metric_encoder)
}

#[cfg(test)]
mod tests {
    use super::{NetatmoCollector, Scrape};
    use crate::cache::{ReadError, RefreshCache};
    use crate::clock::{Clock, ManualClock};
    use crate::device::{DeviceCollection, DeviceReading, SensorSample};
    use crate::sensor::{SensorLabels, SensorMapper, SensorMetric, SensorValue};
    use std::io;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    const HOUR: Duration = Duration::from_secs(3600);

    fn living_room() -> DeviceReading {
        DeviceReading {
            id: "aa:bb:cc:dd:ee:f0".to_owned(),
            module_name: "Living Room".to_owned(),
            station_name: "Home (Living Room)".to_owned(),
            dashboard_data: SensorSample {
                last_measured: Some(3500),
                temperature: Some(23.0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn collector(devices: Vec<DeviceReading>, stale: Duration, clock: Arc<ManualClock>) -> NetatmoCollector {
        let cache = RefreshCache::new(
            move || {
                let devices = devices.clone();
                async move { Ok::<_, ReadError>(DeviceCollection::new(devices)) }
            },
            clock.clone(),
            HOUR,
        );

        NetatmoCollector::new(cache, SensorMapper::new(stale), clock)
    }

    #[tokio::test]
    async fn test_scrape_empty_devices() {
        let clock = Arc::new(ManualClock::at_secs(3600));
        let collector = collector(Vec::new(), HOUR, clock.clone());
        collector.cache().refresh(clock.now()).await;

        let scrape = collector.scrape();
        assert_eq!(
            Scrape {
                up: true,
                refresh_interval: HOUR,
                last_refresh: Some(UNIX_EPOCH + HOUR),
                last_refresh_duration: Duration::ZERO,
                cache_updated: Some(UNIX_EPOCH + HOUR),
                sensors: Vec::new(),
            },
            scrape
        );
        assert!(!collector.cache().is_refreshing());
    }

    #[tokio::test]
    async fn test_scrape_fresh_station() {
        let clock = Arc::new(ManualClock::at_secs(3600));
        let collector = collector(vec![living_room()], Duration::from_secs(120), clock.clone());
        collector.cache().refresh(clock.now()).await;

        let labels = SensorLabels {
            module: "Living Room".to_owned(),
            station: "Home (Living Room)".to_owned(),
        };

        let scrape = collector.scrape();
        assert!(scrape.up);
        assert_eq!(
            vec![
                SensorValue {
                    metric: SensorMetric::Updated,
                    labels: labels.clone(),
                    value: 3500.0,
                },
                SensorValue {
                    metric: SensorMetric::Temperature,
                    labels,
                    value: 23.0,
                },
            ],
            scrape.sensors
        );
    }

    #[tokio::test]
    async fn test_scrape_stale_station() {
        let clock = Arc::new(ManualClock::at_secs(3600));
        let collector = collector(vec![living_room()], Duration::from_secs(30), clock.clone());
        collector.cache().refresh(clock.now()).await;

        let scrape = collector.scrape();
        assert!(scrape.up);
        assert!(scrape.sensors.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_before_first_refresh() {
        let clock = Arc::new(ManualClock::at_secs(3600));
        let cache = RefreshCache::new(
            || async {
                let e: ReadError = Box::new(io::Error::new(io::ErrorKind::Other, "test error"));
                Err::<DeviceCollection, _>(e)
            },
            clock.clone(),
            HOUR,
        );
        let collector = NetatmoCollector::new(cache, SensorMapper::new(HOUR), clock.clone());

        // Starts a refresh in the background but reports the empty cache right away
        let scrape = collector.scrape();
        assert!(!scrape.up);
        assert_eq!(None, scrape.cache_updated);
        assert!(scrape.sensors.is_empty());

        while collector.cache().is_refreshing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let scrape = collector.scrape();
        assert!(!scrape.up);
        assert_eq!(Some(UNIX_EPOCH + HOUR), scrape.last_refresh);
        assert_eq!(None, scrape.cache_updated);
        assert_eq!("test error", collector.cache().state().last_error().unwrap().to_string());
    }

    #[tokio::test]
    async fn test_scrape_serves_stale_cache() {
        let clock = Arc::new(ManualClock::at_secs(3600));
        let collector = collector(vec![living_room()], HOUR * 2, clock.clone());
        collector.cache().refresh(clock.now()).await;

        clock.advance(HOUR);
        let scrape = collector.scrape();

        // Refresh is due and started, old data is still reported in the meantime
        assert_eq!(Some(UNIX_EPOCH + HOUR), scrape.cache_updated);
        assert_eq!(2, scrape.sensors.len());

        while collector.cache().is_refreshing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let scrape = collector.scrape();
        assert_eq!(Some(UNIX_EPOCH + HOUR * 2), scrape.cache_updated);
        assert_eq!(Some(UNIX_EPOCH + HOUR * 2), scrape.last_refresh);
    }
}
