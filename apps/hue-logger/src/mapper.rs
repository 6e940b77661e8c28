use crate::bridge::{Light, LightState, Room};
use crate::metric::MetricRecord;
use chrono::{DateTime, Utc};
use std::num::ParseIntError;
use std::str::FromStr;

const COLOR_MODE_WHITE: &str = "white";
const STATE_UNREACHABLE: &str = "unreachable";
const STATE_ON: &str = "on";
const STATE_OFF: &str = "off";
const MIRED_TO_KELVIN: u32 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("no room found for light {light_id} ({light_name})")]
    NoRoom { light_id: String, light_name: String },
    #[error("unable to parse light id '{id}' as int: {source}")]
    InvalidLightId {
        id: String,
        #[source]
        source: ParseIntError,
    },
    #[error("unable to parse room id '{id}' as int: {source}")]
    InvalidRoomId {
        id: String,
        #[source]
        source: ParseIntError,
    },
}

/// How the 16-bit hue is rescaled before it is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HueScale {
    /// Integer `hue / 255`, matching series written by earlier loggers.
    #[default]
    Truncated,
    /// `hue / 255.0` stored as a float field.
    Fractional,
}

impl FromStr for HueScale {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "truncated" | "integer" => Ok(HueScale::Truncated),
            "fractional" | "float" => Ok(HueScale::Fractional),
            other => Err(format!("unknown hue scale '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricMapper {
    measurement: String,
    hue_scale: HueScale,
}

impl MetricMapper {
    pub fn new(measurement: impl Into<String>, hue_scale: HueScale) -> Self {
        Self {
            measurement: measurement.into(),
            hue_scale,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn map_light(
        &self,
        rooms: &[Room],
        light: &Light,
        state: &LightState,
        timestamp: DateTime<Utc>,
    ) -> Result<MetricRecord, MappingError> {
        let room = find_room(rooms, light)?;

        // Ids go in as fields, not tags, so `select distinct(light_id)` works.
        let light_id = parse_id(&light.id).map_err(|source| MappingError::InvalidLightId {
            id: light.id.clone(),
            source,
        })?;
        let room_id = parse_id(&room.id).map_err(|source| MappingError::InvalidRoomId {
            id: room.id.clone(),
            source,
        })?;

        let mut record = MetricRecord::new(self.measurement.clone(), timestamp);
        record
            .tag("light_name", light.name.clone())
            .tag("room_name", room.name.clone())
            .tag("color_mode", color_mode_tag(state))
            .tag("state", state_tag(state))
            .field("light_id", light_id)
            .field("room_id", room_id);

        if !state.reachable {
            return Ok(record);
        }

        if state.on {
            record.field("brightness", i64::from(state.brightness));
        }

        if state.mired > 0 {
            let kelvin = MIRED_TO_KELVIN / u32::from(state.mired);
            record.field("color_temperature", i64::from(kelvin));
        }

        if state.color_mode == "xy" || state.color_mode == "hs" {
            match self.hue_scale {
                HueScale::Truncated => record.field("hue", i64::from(state.hue / 255)),
                HueScale::Fractional => record.field("hue", f64::from(state.hue) / 255.0),
            };
            record.field("saturation", i64::from(state.saturation));

            if let [x, y] = state.xy.as_slice() {
                record.field("color_x", *x).field("color_y", *y);
            }
        }

        Ok(record)
    }
}

/// First room listing the light wins. Rooms are not expected to overlap.
pub fn find_room<'a>(rooms: &'a [Room], light: &Light) -> Result<&'a Room, MappingError> {
    rooms
        .iter()
        .find(|room| room.lights.iter().any(|id| *id == light.id))
        .ok_or_else(|| MappingError::NoRoom {
            light_id: light.id.clone(),
            light_name: light.name.clone(),
        })
}

fn parse_id(raw: &str) -> Result<i64, ParseIntError> {
    raw.trim().parse::<i64>()
}

fn color_mode_tag(state: &LightState) -> &str {
    if state.color_mode.is_empty() {
        COLOR_MODE_WHITE
    } else {
        &state.color_mode
    }
}

fn state_tag(state: &LightState) -> &'static str {
    if !state.reachable {
        STATE_UNREACHABLE
    } else if state.on {
        STATE_ON
    } else {
        STATE_OFF
    }
}
