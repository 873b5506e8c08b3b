//! In-memory device model.
//!
//! Built once from an accepted CONFIG and owned by the session task; nothing
//! else mutates it. Sensor and control indices are positional and frozen --
//! `sensor_id` in DATA and `cmd_id` in CONTROL are indices into these tables.

use crate::timesync::TimeSync;
use stand_protocol::{ControlDef, ControlState, DeviceConfig, DeviceStatus, Reading, SensorDef};
use std::collections::VecDeque;
use std::net::SocketAddr;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// One sensor channel plus its rolling sample history.
#[derive(Debug, Clone)]
pub struct Sensor {
    pub def: SensorDef,
    /// `(t_server_seconds, value)`, oldest first, bounded.
    samples: VecDeque<(f64, f32)>,
}

impl Sensor {
    pub fn last_sample(&self) -> Option<(f64, f32)> {
        self.samples.back().copied()
    }

    pub fn samples(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.samples.iter().copied()
    }
}

/// One control channel plus the state the server last commanded.
#[derive(Debug, Clone)]
pub struct Control {
    pub def: ControlDef,
    pub last_commanded: ControlState,
}

/// Stream state of the device's DATA flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Off,
    Streaming { freq_hz: u16 },
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Device {
    pub addr: SocketAddr,
    pub name: String,
    pub kind: String,
    pub sensors: Vec<Sensor>,
    pub controls: Vec<Control>,
    /// Last STATUS reply, if any.
    pub status: Option<DeviceStatus>,
    pub stream: StreamState,
    pub sync: TimeSync,
    /// Server time of the most recent DATA packet.
    pub last_data_at: Option<f64>,
    /// Server time of the most recent heartbeat ACK.
    pub last_heartbeat_reply: Option<f64>,
    sample_capacity: usize,
}

impl Device {
    pub fn from_config(
        addr: SocketAddr,
        config: DeviceConfig,
        sample_capacity: usize,
        strict_timestamps: bool,
    ) -> Self {
        let sensors = config
            .sensors
            .into_iter()
            .map(|def| Sensor {
                def,
                samples: VecDeque::new(),
            })
            .collect();
        let controls = config
            .controls
            .into_iter()
            .map(|def| Control {
                last_commanded: def.default_state,
                def,
            })
            .collect();
        Device {
            addr,
            name: config.name,
            kind: config.kind,
            sensors,
            controls,
            status: None,
            stream: StreamState::Off,
            sync: TimeSync::new(strict_timestamps),
            last_data_at: None,
            last_heartbeat_reply: None,
            sample_capacity,
        }
    }

    /// Resolve a control name to its wire `cmd_id`.
    pub fn control_id(&self, name: &str) -> Option<u8> {
        self.controls
            .iter()
            .position(|c| c.def.name == name)
            .map(|i| i as u8)
    }

    /// Append a projected reading to its sensor's rolling buffer.
    ///
    /// Returns the sensor definition, or `None` for an out-of-range
    /// `sensor_id` (logged and dropped by the caller).
    pub fn record_reading(&mut self, reading: &Reading, t_server_seconds: f64) -> Option<&SensorDef> {
        let sensor = self.sensors.get_mut(reading.sensor_id as usize)?;
        if sensor.samples.len() == self.sample_capacity {
            sensor.samples.pop_front();
        }
        sensor.samples.push_back((t_server_seconds, reading.value));
        Some(&sensor.def)
    }

    /// ESTOP bookkeeping: every control is commanded to its default state.
    pub fn mark_controls_default(&mut self) {
        for control in &mut self.controls {
            control.last_commanded = control.def.default_state;
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            addr: self.addr,
            name: self.name.clone(),
            kind: self.kind.clone(),
            status: self.status,
            stream: self.stream,
            synced: self.sync.established(),
            last_data_at: self.last_data_at,
            last_heartbeat_reply: self.last_heartbeat_reply,
            sensors: self
                .sensors
                .iter()
                .map(|s| SensorSnapshot {
                    name: s.def.name.clone(),
                    units: s.def.units.clone(),
                    last_sample: s.last_sample(),
                    sample_count: s.samples.len(),
                })
                .collect(),
            controls: self
                .controls
                .iter()
                .map(|c| ControlSnapshot {
                    name: c.def.name.clone(),
                    last_commanded: c.last_commanded,
                })
                .collect(),
        }
    }

    /// Copy out the full sample history for CSV export.
    pub fn sample_dump(&self) -> SampleDump {
        SampleDump {
            device_name: self.name.clone(),
            sensors: self
                .sensors
                .iter()
                .map(|s| (s.def.name.clone(), s.samples().collect()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time view of a device for registry queries.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub addr: SocketAddr,
    pub name: String,
    pub kind: String,
    pub status: Option<DeviceStatus>,
    pub stream: StreamState,
    pub synced: bool,
    pub last_data_at: Option<f64>,
    pub last_heartbeat_reply: Option<f64>,
    pub sensors: Vec<SensorSnapshot>,
    pub controls: Vec<ControlSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SensorSnapshot {
    pub name: String,
    pub units: String,
    pub last_sample: Option<(f64, f32)>,
    pub sample_count: usize,
}

#[derive(Debug, Clone)]
pub struct ControlSnapshot {
    pub name: String,
    pub last_commanded: ControlState,
}

/// Full sample history of one device, for CSV export.
#[derive(Debug, Clone)]
pub struct SampleDump {
    pub device_name: String,
    /// `(sensor name, samples oldest-first)` in sensor-id order.
    pub sensors: Vec<(String, Vec<(f64, f32)>)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stand_protocol::Unit;

    fn test_device(sample_capacity: usize) -> Device {
        let config = DeviceConfig::parse(
            br#"{
                "deviceName": "D",
                "deviceType": "Sensor Monitor",
                "sensorInfo": {
                    "pressureTransducers": {"PT1": {"units": "psi"}},
                    "thermocouples": {"TC1": {"units": "C"}}
                },
                "controls": {
                    "AVFILL": {"pin": 4, "type": "solenoid", "defaultState": "CLOSED"},
                    "AVVENT": {"pin": 5, "type": "solenoid", "defaultState": "OPEN"}
                }
            }"#,
        )
        .unwrap();
        Device::from_config(
            "192.168.2.60:49152".parse().unwrap(),
            config,
            sample_capacity,
            false,
        )
    }

    #[test]
    fn control_ids_are_positional() {
        let device = test_device(16);
        assert_eq!(device.control_id("AVFILL"), Some(0));
        assert_eq!(device.control_id("AVVENT"), Some(1));
        assert_eq!(device.control_id("NONEXISTENT"), None);
    }

    #[test]
    fn controls_start_at_their_default_state() {
        let device = test_device(16);
        assert_eq!(device.controls[0].last_commanded, ControlState::Closed);
        assert_eq!(device.controls[1].last_commanded, ControlState::Open);
    }

    #[test]
    fn readings_land_in_the_right_buffer() {
        let mut device = test_device(16);
        // sensor_id 0 is TC1 (thermocouples iterate first).
        let def = device
            .record_reading(
                &Reading {
                    sensor_id: 0,
                    unit: Unit::Celsius,
                    value: 21.5,
                },
                1.0,
            )
            .unwrap();
        assert_eq!(def.name, "TC1");
        assert_eq!(device.sensors[0].last_sample(), Some((1.0, 21.5)));
        assert_eq!(device.sensors[1].last_sample(), None);
    }

    #[test]
    fn out_of_range_sensor_id_is_dropped() {
        let mut device = test_device(16);
        let def = device.record_reading(
            &Reading {
                sensor_id: 9,
                unit: Unit::Psi,
                value: 1.0,
            },
            1.0,
        );
        assert!(def.is_none());
    }

    #[test]
    fn sample_buffer_drops_oldest_at_capacity() {
        let mut device = test_device(3);
        for i in 0..5 {
            device.record_reading(
                &Reading {
                    sensor_id: 0,
                    unit: Unit::Celsius,
                    value: i as f32,
                },
                f64::from(i),
            );
        }
        let samples: Vec<(f64, f32)> = device.sensors[0].samples().collect();
        assert_eq!(samples, vec![(2.0, 2.0), (3.0, 3.0), (4.0, 4.0)]);
    }

    #[test]
    fn estop_returns_controls_to_defaults() {
        let mut device = test_device(16);
        device.controls[0].last_commanded = ControlState::Open;
        device.controls[1].last_commanded = ControlState::Closed;
        device.mark_controls_default();
        assert_eq!(device.controls[0].last_commanded, ControlState::Closed);
        assert_eq!(device.controls[1].last_commanded, ControlState::Open);
    }
}
