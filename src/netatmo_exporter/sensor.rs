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

use crate::device::DeviceReading;
use prometheus_client::encoding::EncodeLabelSet;
use std::time::{Duration, SystemTime};

/// Gauges emitted for each station or module with recent enough data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorMetric {
    Updated,
    Temperature,
    Humidity,
    Co2,
    Noise,
    Pressure,
    WindStrength,
    WindDirection,
    Rain,
    Battery,
    WifiSignal,
    RfSignal,
}

impl SensorMetric {
    pub const ALL: [SensorMetric; 12] = [
        SensorMetric::Updated,
        SensorMetric::Temperature,
        SensorMetric::Humidity,
        SensorMetric::Co2,
        SensorMetric::Noise,
        SensorMetric::Pressure,
        SensorMetric::WindStrength,
        SensorMetric::WindDirection,
        SensorMetric::Rain,
        SensorMetric::Battery,
        SensorMetric::WifiSignal,
        SensorMetric::RfSignal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Updated => "netatmo_sensor_updated",
            Self::Temperature => "netatmo_sensor_temperature_celsius",
            Self::Humidity => "netatmo_sensor_humidity_percent",
            Self::Co2 => "netatmo_sensor_co2_ppm",
            Self::Noise => "netatmo_sensor_noise_db",
            Self::Pressure => "netatmo_sensor_pressure_mb",
            Self::WindStrength => "netatmo_sensor_wind_strength_kph",
            Self::WindDirection => "netatmo_sensor_wind_direction_degrees",
            Self::Rain => "netatmo_sensor_rain_amount_mm",
            Self::Battery => "netatmo_sensor_battery_percent",
            Self::WifiSignal => "netatmo_sensor_wifi_signal_strength",
            Self::RfSignal => "netatmo_sensor_rf_signal_strength",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Self::Updated => "Timestamp of last update",
            Self::Temperature => "Temperature measurement in celsius",
            Self::Humidity => "Relative humidity measurement in percent",
            Self::Co2 => "Carbondioxide measurement in parts per million",
            Self::Noise => "Noise measurement in decibels",
            Self::Pressure => "Atmospheric pressure measurement in millibar",
            Self::WindStrength => "Wind strength in kilometers per hour",
            Self::WindDirection => "Wind direction in degrees",
            Self::Rain => "Rain amount in millimeters",
            Self::Battery => "Battery remaining life (10: low)",
            Self::WifiSignal => "Wifi signal strength (86: bad, 71: avg, 56: good)",
            Self::RfSignal => "RF signal strength (90: lowest, 60: highest)",
        }
    }
}

/// Labels attached to every sensor gauge.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SensorLabels {
    pub module: String,
    pub station: String,
}

/// A single value for one of the `SensorMetric` gauges.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorValue {
    pub metric: SensorMetric,
    pub labels: SensorLabels,
    pub value: f64,
}

/// Turns station and module readings into sensor gauge values.
///
/// Readings older than the stale threshold produce no values at all. The threshold
/// is expected to be at least as long as the refresh interval of the cache feeding
/// this mapper, otherwise data can go missing between two successful refreshes.
#[derive(Debug, Clone, Copy)]
pub struct SensorMapper {
    stale_threshold: Duration,
}

impl SensorMapper {
    pub fn new(stale_threshold: Duration) -> Self {
        SensorMapper { stale_threshold }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Values for a station and each of its modules. Modules are labeled with the
    /// station name of the station they belong to.
    pub fn station(&self, station: &DeviceReading, now: SystemTime) -> Vec<SensorValue> {
        let station_name = &station.station_name;
        let mut out = Vec::new();

        self.device(station, station_name, now, &mut out);
        for module in &station.modules {
            self.device(module, station_name, now, &mut out);
        }

        out
    }

    /// Append values for a single station or module, ignoring any linked modules.
    pub fn device(&self, device: &DeviceReading, station_name: &str, now: SystemTime, out: &mut Vec<SensorValue>) {
        let data = &device.dashboard_data;
        let (last_measured, measured_at) = match (data.last_measured, data.measured_at()) {
            (Some(secs), Some(t)) => (secs, t),
            _ => {
                tracing::debug!(message = "no data available", module = %device.module_name);
                return;
            }
        };

        // Measurements from the future (clock skew) are not stale
        if let Ok(age) = now.duration_since(measured_at) {
            if age > self.stale_threshold {
                tracing::debug!(
                    message = "data is stale",
                    module = %device.module_name,
                    age_secs = age.as_secs(),
                    stale_secs = self.stale_threshold.as_secs(),
                );
                return;
            }
        }

        let labels = SensorLabels {
            module: device.module_name.clone(),
            station: station_name.to_owned(),
        };

        let mut push = |metric: SensorMetric, value: Option<f64>| {
            if let Some(value) = value {
                out.push(SensorValue {
                    metric,
                    labels: labels.clone(),
                    value,
                });
            }
        };

        push(SensorMetric::Updated, Some(last_measured as f64));
        push(SensorMetric::Temperature, data.temperature.map(f64::from));
        push(SensorMetric::Humidity, data.humidity.map(f64::from));
        push(SensorMetric::Co2, data.co2.map(f64::from));
        push(SensorMetric::Noise, data.noise.map(f64::from));
        push(SensorMetric::Pressure, data.pressure.map(f64::from));
        push(SensorMetric::WindStrength, data.wind_strength.map(f64::from));
        push(SensorMetric::WindDirection, data.wind_angle.map(f64::from));
        push(SensorMetric::Rain, data.rain.map(f64::from));
        push(SensorMetric::Battery, device.battery_percent.map(f64::from));
        push(SensorMetric::WifiSignal, device.wifi_status.map(f64::from));
        push(SensorMetric::RfSignal, device.rf_status.map(f64::from));
    }
}
