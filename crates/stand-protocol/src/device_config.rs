//! CONFIG handshake JSON.
//!
//! The device describes itself with a schema-light JSON object. Only the
//! essential shape is validated (`deviceName`, `deviceType`, per-sensor
//! `units`, per-control `defaultState`); every other descriptor field is
//! retained verbatim so that adapter layers can surface hardware metadata
//! the core does not interpret.
//!
//! Sensor indices are positional: thermocouples first, then pressure
//! transducers, then load cells, each in document order. The resulting index
//! is the `sensor_id` used in DATA packets; control indices are `cmd_id` in
//! CONTROL packets. Both are frozen once the CONFIG is accepted.

use crate::packet::ControlState;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Sensor category; iteration order here is the wire index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCategory {
    Thermocouple,
    PressureTransducer,
    LoadCell,
}

impl SensorCategory {
    /// All categories, in wire index order.
    pub const ORDERED: [SensorCategory; 3] = [
        SensorCategory::Thermocouple,
        SensorCategory::PressureTransducer,
        SensorCategory::LoadCell,
    ];

    /// The `sensorInfo` key this category is parsed from.
    pub fn json_key(self) -> &'static str {
        match self {
            SensorCategory::Thermocouple => "thermocouples",
            SensorCategory::PressureTransducer => "pressureTransducers",
            SensorCategory::LoadCell => "loadCells",
        }
    }
}

/// One sensor channel as declared in the CONFIG JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDef {
    pub name: String,
    pub category: SensorCategory,
    pub units: String,
    /// The full descriptor object, retained verbatim.
    pub extras: Map<String, Value>,
}

/// One control channel as declared in the CONFIG JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlDef {
    pub name: String,
    pub pin: Option<u32>,
    pub kind: String,
    pub default_state: ControlState,
    /// The full descriptor object, retained verbatim.
    pub extras: Map<String, Value>,
}

/// Parsed and validated device self-description.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: String,
    pub sensors: Vec<SensorDef>,
    pub controls: Vec<ControlDef>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceConfigError {
    #[error("CONFIG payload is not valid UTF-8")]
    Utf8,
    #[error("CONFIG JSON parse: {0}")]
    Json(String),
    #[error("CONFIG JSON is not an object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl DeviceConfig {
    /// Parse raw CONFIG payload bytes.
    ///
    /// Any error here fails the handshake: the caller closes the connection
    /// without sending an ACK.
    pub fn parse(json: &[u8]) -> Result<Self, DeviceConfigError> {
        let text = std::str::from_utf8(json).map_err(|_| DeviceConfigError::Utf8)?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| DeviceConfigError::Json(e.to_string()))?;
        let root = value.as_object().ok_or(DeviceConfigError::NotAnObject)?;

        let name = require_string(root, "deviceName")?;
        let kind = require_string(root, "deviceType")?;

        let mut sensors = Vec::new();
        if let Some(sensor_info) = root.get("sensorInfo") {
            let sensor_info = sensor_info
                .as_object()
                .ok_or_else(|| invalid("sensorInfo", "an object"))?;
            for category in SensorCategory::ORDERED {
                let Some(group) = sensor_info.get(category.json_key()) else {
                    continue;
                };
                let group = group
                    .as_object()
                    .ok_or_else(|| invalid(category.json_key(), "an object"))?;
                for (sensor_name, descriptor) in group {
                    sensors.push(parse_sensor(sensor_name, category, descriptor)?);
                }
            }
        }

        let mut controls = Vec::new();
        if let Some(control_map) = root.get("controls") {
            let control_map = control_map
                .as_object()
                .ok_or_else(|| invalid("controls", "an object"))?;
            for (control_name, descriptor) in control_map {
                controls.push(parse_control(control_name, descriptor)?);
            }
        }

        Ok(DeviceConfig {
            name,
            kind,
            sensors,
            controls,
        })
    }
}

fn parse_sensor(
    name: &str,
    category: SensorCategory,
    descriptor: &Value,
) -> Result<SensorDef, DeviceConfigError> {
    let obj = descriptor
        .as_object()
        .ok_or_else(|| invalid(name, "an object"))?;
    let units = obj
        .get("units")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(&format!("{name}.units"), "a string"))?;
    Ok(SensorDef {
        name: name.to_owned(),
        category,
        units: units.to_owned(),
        extras: obj.clone(),
    })
}

fn parse_control(name: &str, descriptor: &Value) -> Result<ControlDef, DeviceConfigError> {
    let obj = descriptor
        .as_object()
        .ok_or_else(|| invalid(name, "an object"))?;
    let default_state = match obj.get("defaultState").and_then(Value::as_str) {
        Some("OPEN") => ControlState::Open,
        Some("CLOSED") => ControlState::Closed,
        _ => {
            return Err(invalid(
                &format!("{name}.defaultState"),
                "\"OPEN\" or \"CLOSED\"",
            ));
        }
    };
    let pin = obj
        .get("pin")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok());
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Ok(ControlDef {
        name: name.to_owned(),
        pin,
        kind,
        default_state,
        extras: obj.clone(),
    })
}

fn require_string(
    root: &Map<String, Value>,
    field: &str,
) -> Result<String, DeviceConfigError> {
    match root.get(field) {
        None => Err(DeviceConfigError::MissingField(field.to_owned())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid(field, "a string")),
    }
}

fn invalid(field: &str, expected: &'static str) -> DeviceConfigError {
    DeviceConfigError::InvalidField {
        field: field.to_owned(),
        expected,
    }
}
