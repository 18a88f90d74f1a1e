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

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// All stations returned by a single read of the Netatmo station data API.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeviceCollection {
    #[serde(default)]
    pub devices: Vec<DeviceReading>,
}

impl DeviceCollection {
    pub fn new(devices: Vec<DeviceReading>) -> Self {
        DeviceCollection { devices }
    }
}

/// A station or one of the modules linked to it.
///
/// Stations carry their modules in `modules`. Modules are never expected to have
/// modules of their own and any that do are ignored when building metrics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeviceReading {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub station_name: String,
    pub battery_percent: Option<i32>,
    pub wifi_status: Option<i32>,
    pub rf_status: Option<i32>,
    #[serde(default)]
    pub dashboard_data: SensorSample,
    #[serde(default)]
    pub modules: Vec<DeviceReading>,
}

/// Latest measurements of a station or module. Fields that the hardware doesn't
/// support are omitted by the API and stay `None` here.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SensorSample {
    #[serde(rename = "time_utc")]
    pub last_measured: Option<i64>,
    #[serde(rename = "Temperature")]
    pub temperature: Option<f32>,
    #[serde(rename = "Humidity")]
    pub humidity: Option<i32>,
    #[serde(rename = "CO2")]
    pub co2: Option<i32>,
    #[serde(rename = "Noise")]
    pub noise: Option<i32>,
    #[serde(rename = "Pressure")]
    pub pressure: Option<f32>,
    #[serde(rename = "WindStrength")]
    pub wind_strength: Option<i32>,
    #[serde(rename = "WindAngle")]
    pub wind_angle: Option<i32>,
    #[serde(rename = "Rain")]
    pub rain: Option<f32>,
}

impl SensorSample {
    /// Time of the last measurement, `None` if the module has never reported or the
    /// timestamp can't be represented.
    pub fn measured_at(&self) -> Option<SystemTime> {
        let secs = self.last_measured?;
        if secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_secs(secs.unsigned_abs()))
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
        }
    }
}

/// Devices from one successful read along with the time they were read.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    devices: DeviceCollection,
    captured_at: SystemTime,
}

impl Snapshot {
    pub fn new(devices: DeviceCollection, captured_at: SystemTime) -> Self {
        Snapshot { devices, captured_at }
    }

    pub fn devices(&self) -> &[DeviceReading] {
        &self.devices.devices
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }
}
