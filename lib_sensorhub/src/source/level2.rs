//! # Level II Radial Decoder
//!
//! Archive II volumes are decoded with the `nexrad` crate, which handles the
//! volume header, bzip2-compressed LDM records and every message type. This
//! module maps its radials onto `Radial` / `MomentBlock`.
//!
//! A moment block whose gate geometry or values cannot be used is dropped
//! with a warning and noted on its radial. The other moments of that radial,
//! and every other radial of the file, are kept.

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use nexrad::model::data::{DataMoment, MomentValue as GateValue};

use crate::errors::ProtocolError;

use super::file::RadialDecoder;

const VOLUME_HEADER_LEN: usize = 24;
const ICAO_OFFSET: usize = 20;

/// The moment types the radial assembler recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MomentKind {
    Reflectivity,
    Velocity,
    SpectrumWidth,
}

impl MomentKind {
    /// Data block name used by Level II message 31.
    pub fn block_name(self) -> &'static str {
        match self {
            MomentKind::Reflectivity => "REF",
            MomentKind::Velocity => "VEL",
            MomentKind::SpectrumWidth => "SW",
        }
    }
}

/// Header fields of one radial.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialHeader {
    /// Four-letter site id from the volume header, empty when absent.
    pub radar_id: String,
    /// Collection time in milliseconds since the Unix epoch.
    pub collection_ms: i64,
    pub azimuth_angle: f32,
    pub elevation_angle: f32,
}

impl RadialHeader {
    /// Collection time of the radial, `None` when out of range.
    pub fn collection_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.collection_ms).single()
    }
}

/// One moment data block: gate values for a single product.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentBlock {
    pub kind: MomentKind,
    /// Range to the center of the first gate, in meters.
    pub first_gate_m: f32,
    pub gate_spacing_m: f32,
    /// Physical values, NaN below threshold or range folded.
    pub data: Vec<f32>,
}

impl MomentBlock {
    /// Checks the geometry and values handed over by the decoder.
    pub fn new(kind: MomentKind, first_gate_km: f64, gate_interval_km: f64, data: Vec<f32>) -> Result<Self, ProtocolError> {
        let name = kind.block_name();
        if data.is_empty() {
            return Err(ProtocolError::Malformed(format!("{} block has no gates", name)));
        }
        if !first_gate_km.is_finite() || first_gate_km < 0.0 {
            return Err(ProtocolError::Malformed(format!("{} block starts at {} km", name, first_gate_km)));
        }
        if !gate_interval_km.is_finite() || gate_interval_km <= 0.0 {
            return Err(ProtocolError::Malformed(format!(
                "{} block has a gate interval of {} km",
                name, gate_interval_km
            )));
        }
        if data.iter().any(|v| v.is_infinite()) {
            return Err(ProtocolError::Malformed(format!("{} block holds infinite values", name)));
        }
        Ok(Self {
            kind,
            first_gate_m: (first_gate_km * 1000.0) as f32,
            gate_spacing_m: (gate_interval_km * 1000.0) as f32,
            data,
        })
    }
}

/// A decoded radial: header plus its usable moment blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Radial {
    pub header: RadialHeader,
    pub moments: Vec<MomentBlock>,
    /// Blocks of this radial that failed their checks.
    pub dropped: Vec<ProtocolError>,
}

impl Radial {
    /// Keeps the blocks that passed their checks and notes the others.
    pub fn from_blocks(header: RadialHeader, blocks: impl IntoIterator<Item = Result<MomentBlock, ProtocolError>>) -> Self {
        let mut moments = Vec::new();
        let mut dropped = Vec::new();
        for block in blocks {
            match block {
                Ok(block) => moments.push(block),
                Err(e) => {
                    warn!(
                        "radial at azimuth {} elevation {}: block dropped: {}",
                        header.azimuth_angle, header.elevation_angle, e
                    );
                    dropped.push(e);
                }
            }
        }
        Self {
            header,
            moments,
            dropped,
        }
    }
}

/// Decoder for Archive II volumes and raw message streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Level2Decoder;

impl RadialDecoder for Level2Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Radial>, ProtocolError> {
        let volume = nexrad::load(bytes).map_err(|e| ProtocolError::Malformed(format!("Level II data: {}", e)))?;
        let radar_id = radar_id(bytes);

        let mut radials = Vec::new();
        for sweep in volume.sweeps().iter() {
            for radial in sweep.radials().iter() {
                let header = RadialHeader {
                    radar_id: radar_id.clone(),
                    collection_ms: radial.collection_timestamp(),
                    azimuth_angle: radial.azimuth_angle_degrees(),
                    elevation_angle: radial.elevation_angle_degrees(),
                };
                let moments = [
                    (MomentKind::Reflectivity, radial.reflectivity()),
                    (MomentKind::Velocity, radial.velocity()),
                    (MomentKind::SpectrumWidth, radial.spectrum_width()),
                ];
                let blocks = moments.into_iter().filter_map(|(kind, moment)| {
                    let moment = moment?;
                    let data = moment.values().iter().map(gate_value).collect();
                    Some(MomentBlock::new(
                        kind,
                        moment.first_gate_range_km() as f64,
                        moment.gate_interval_km() as f64,
                        data,
                    ))
                });
                radials.push(Radial::from_blocks(header, blocks));
            }
        }
        Ok(radials)
    }
}

fn gate_value(value: &GateValue) -> f32 {
    match value {
        GateValue::Value(v) => *v as f32,
        _ => f32::NAN,
    }
}

/// Site id carried by an `AR2V` / `ARCHIVE2` volume header.
fn radar_id(bytes: &[u8]) -> String {
    if !(bytes.starts_with(b"AR2V") || bytes.starts_with(b"ARCHIVE2")) || bytes.len() < VOLUME_HEADER_LEN {
        return String::new();
    }
    String::from_utf8_lossy(&bytes[ICAO_OFFSET..VOLUME_HEADER_LEN])
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(azimuth: f32) -> RadialHeader {
        RadialHeader {
            radar_id: "KHTX".into(),
            collection_ms: 1_419_681_600_000,
            azimuth_angle: azimuth,
            elevation_angle: 0.5,
        }
    }

    #[test]
    fn collection_time_is_epoch_millis() {
        let t = header(0.0).collection_time().unwrap();
        assert_eq!(t.to_rfc3339(), "2014-12-27T12:00:00+00:00");
        let out_of_range = RadialHeader {
            collection_ms: i64::MAX,
            ..header(0.0)
        };
        assert!(out_of_range.collection_time().is_none());
    }

    #[test]
    fn moment_geometry_is_converted_to_meters() {
        let block = MomentBlock::new(MomentKind::Reflectivity, 2.125, 0.25, vec![1.0, f32::NAN]).unwrap();
        assert_eq!(block.first_gate_m, 2125.0);
        assert_eq!(block.gate_spacing_m, 250.0);
        assert_eq!(block.data.len(), 2);
    }

    #[test]
    fn unusable_blocks_are_rejected() {
        let bad = [
            MomentBlock::new(MomentKind::Velocity, 2.125, 0.25, Vec::new()),
            MomentBlock::new(MomentKind::Velocity, f64::NAN, 0.25, vec![1.0]),
            MomentBlock::new(MomentKind::Velocity, 2.125, 0.0, vec![1.0]),
            MomentBlock::new(MomentKind::Velocity, 2.125, 0.25, vec![f32::INFINITY]),
        ];
        for result in bad {
            assert!(matches!(result, Err(ProtocolError::Malformed(msg)) if msg.starts_with("VEL")));
        }
    }

    #[test]
    fn bad_block_only_degrades_its_radial() {
        let good = Radial::from_blocks(
            header(10.0),
            [
                MomentBlock::new(MomentKind::Reflectivity, 2.125, 0.25, vec![17.0, 18.0]),
                MomentBlock::new(MomentKind::Velocity, 2.125, 0.25, vec![3.0, 4.0]),
            ],
        );
        let damaged = Radial::from_blocks(
            header(10.5),
            [
                MomentBlock::new(MomentKind::Reflectivity, 2.125, -1.0, vec![22.0]),
                MomentBlock::new(MomentKind::SpectrumWidth, 2.125, 0.25, vec![7.0]),
            ],
        );

        assert_eq!(good.moments.len(), 2);
        assert!(good.dropped.is_empty());
        assert_eq!(damaged.moments.len(), 1);
        assert_eq!(damaged.moments[0].kind, MomentKind::SpectrumWidth);
        assert_eq!(damaged.dropped.len(), 1);
        assert!(matches!(&damaged.dropped[0], ProtocolError::Malformed(msg) if msg.starts_with("REF")));
    }

    #[test]
    fn radar_id_comes_from_volume_header() {
        let mut bytes = b"AR2V0006.001".to_vec();
        bytes.extend_from_slice(&[0, 0, 0x40, 0x30, 0, 0, 0, 0]);
        bytes.extend_from_slice(b"KHTX");
        assert_eq!(radar_id(&bytes), "KHTX");
        assert_eq!(radar_id(b"raw message stream"), "");
    }

    #[test]
    fn unreadable_data_yields_no_radials() {
        match Level2Decoder.decode(b"not AR2V") {
            Ok(radials) => assert!(radials.is_empty()),
            Err(e) => assert!(matches!(e, ProtocolError::Malformed(msg) if msg.starts_with("Level II data"))),
        }
    }
}
