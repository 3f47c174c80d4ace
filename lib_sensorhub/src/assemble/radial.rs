//! # Radial Assembly
//!
//! Every radial of a decoded file becomes one `NexradData` record. The moment
//! blocks of a radial are matched by kind onto the three array fields, each
//! array is resized to the block's gate count, and the scalar fields (time,
//! elevation, azimuth, count) are set once per radial.
//!
//! A radial is complete once all three kinds have been seen, or when its
//! blocks run out. Radials with fewer kinds are still published: the missing
//! arrays keep the previous radial's values and the kinds are listed in
//! `Assembled::missing`.
//!
//! A radial that cannot become a record (its time is out of range) is
//! skipped and the rest of the file is still published. Skipped radials and
//! blocks the decoder dropped are reported through `take_rejected`.

use std::sync::Arc;

use log::warn;

use crate::errors::{ConfigurationError, DriverError, ProtocolError};
use crate::record::Record;
use crate::schema::{RecordSchema, SchemaOptions};
use crate::source::{MomentKind, Radial, RadialFile};

use super::{Assembled, Assembler};

pub const RADIAL_OUTPUT: &str = "NexradData";

const TIME: &str = "time";
const ELEVATION: &str = "elevation";
const AZIMUTH: &str = "azimuth";
const COUNT: &str = "count";
const REFLECTIVITY: &str = "Reflectivity";
const VELOCITY: &str = "Velocity";
const SPECTRUM_WIDTH: &str = "SpectrumWidth";

/// Recognized moment kinds, in the order they are reported as missing.
const REQUIRED: [(MomentKind, &str); 3] = [
    (MomentKind::Reflectivity, REFLECTIVITY),
    (MomentKind::Velocity, VELOCITY),
    (MomentKind::SpectrumWidth, SPECTRUM_WIDTH),
];

/// Schema of the radial output. Arrays default to `num_bins` elements.
pub fn radial_schema(num_bins: usize, options: &SchemaOptions) -> Result<Arc<RecordSchema>, ConfigurationError> {
    RecordSchema::builder(RADIAL_OUTPUT)
        .definition("http://sensorml.com/ont/swe/property/NexradRadial")
        .time(TIME)
        .float(ELEVATION, "deg")
        .float(AZIMUTH, "deg")
        .int(COUNT)
        .described_as("http://sensorml.com/ont/swe/property/ElementCount")
        .float_array(REFLECTIVITY, "db", num_bins, Some(COUNT))
        .float_array(VELOCITY, "m/s", num_bins, Some(COUNT))
        .float_array(SPECTRUM_WIDTH, "1", num_bins, Some(COUNT))
        .build(options)
        .map(Arc::new)
}

fn field_for(kind: MomentKind) -> &'static str {
    match kind {
        MomentKind::Reflectivity => REFLECTIVITY,
        MomentKind::Velocity => VELOCITY,
        MomentKind::SpectrumWidth => SPECTRUM_WIDTH,
    }
}

pub struct RadialAssembler {
    working: Record,
    rejected: Vec<DriverError>,
}

impl RadialAssembler {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        Self {
            working: Record::new(schema),
            rejected: Vec::new(),
        }
    }

    fn assemble_radial(&mut self, radial: &Radial) -> Result<Assembled, DriverError> {
        let header = &radial.header;
        let time = header.collection_time().ok_or_else(|| {
            ProtocolError::Malformed(format!("radial time out of range: {} ms", header.collection_ms))
        })?;

        self.working.stamp(time);
        self.working.set_float(ELEVATION, f64::from(header.elevation_angle))?;
        self.working.set_float(AZIMUTH, f64::from(header.azimuth_angle))?;

        let mut seen: Vec<MomentKind> = Vec::with_capacity(REQUIRED.len());
        let mut count = None;
        for block in &radial.moments {
            if seen.contains(&block.kind) {
                continue;
            }
            self.working.fill_array(field_for(block.kind), &block.data)?;
            count.get_or_insert(block.data.len());
            seen.push(block.kind);
            if seen.len() == REQUIRED.len() {
                break;
            }
        }
        self.working.set_int(COUNT, count.unwrap_or(0) as i64)?;

        let missing = REQUIRED
            .iter()
            .filter(|(kind, _)| !seen.contains(kind))
            .map(|(_, field)| field.to_string())
            .collect();
        Ok(Assembled {
            record: self.working.clone(),
            missing,
        })
    }
}

impl Assembler for RadialAssembler {
    type Unit = RadialFile;

    fn assemble(&mut self, unit: RadialFile) -> Result<Vec<Assembled>, DriverError> {
        let mut out = Vec::with_capacity(unit.radials.len());
        for radial in &unit.radials {
            self.rejected.extend(radial.dropped.iter().cloned().map(DriverError::from));
            match self.assemble_radial(radial) {
                Ok(assembled) => out.push(assembled),
                Err(e) => {
                    warn!("{}: radial at azimuth {} skipped: {}", unit.path.display(), radial.header.azimuth_angle, e);
                    self.rejected.push(e);
                }
            }
        }
        Ok(out)
    }

    fn take_rejected(&mut self) -> Vec<DriverError> {
        std::mem::take(&mut self.rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::level2::{MomentBlock, RadialHeader};
    use std::path::PathBuf;

    fn block(kind: MomentKind, data: Vec<f32>) -> MomentBlock {
        MomentBlock::new(kind, 2.125, 0.25, data).unwrap()
    }

    fn header(azimuth: f32) -> RadialHeader {
        RadialHeader {
            radar_id: "KHTX".into(),
            collection_ms: 86_400_000 + 1_500,
            azimuth_angle: azimuth,
            elevation_angle: 0.5,
        }
    }

    fn radial(azimuth: f32, moments: Vec<MomentBlock>) -> Radial {
        Radial {
            header: header(azimuth),
            moments,
            dropped: Vec::new(),
        }
    }

    fn file(radials: Vec<Radial>) -> RadialFile {
        RadialFile {
            path: PathBuf::from("vol"),
            radials,
        }
    }

    fn assembler() -> RadialAssembler {
        RadialAssembler::new(radial_schema(4, &SchemaOptions::new()).unwrap())
    }

    #[test]
    fn complete_radial_fills_all_arrays() {
        let mut asm = assembler();
        let out = asm
            .assemble(file(vec![radial(
                90.0,
                vec![
                    block(MomentKind::Reflectivity, vec![1.0, 2.0, 3.0]),
                    block(MomentKind::Velocity, vec![4.0, 5.0]),
                    block(MomentKind::Reflectivity, vec![9.0]),
                    block(MomentKind::SpectrumWidth, vec![6.0]),
                ],
            )]))
            .unwrap();

        assert_eq!(out.len(), 1);
        let rec = &out[0].record;
        assert!(!out[0].is_degraded());
        assert_eq!(rec.captured_at().timestamp_millis(), 86_400_000 + 1_500);
        assert_eq!(rec.float(AZIMUTH), Some(90.0));
        assert_eq!(rec.int(COUNT), Some(3));
        assert_eq!(rec.array(REFLECTIVITY), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(rec.array(VELOCITY), Some(&[4.0, 5.0][..]));
        assert_eq!(rec.array(SPECTRUM_WIDTH), Some(&[6.0][..]));
    }

    #[test]
    fn two_of_three_kinds_is_published_once_and_degraded() {
        let mut asm = assembler();
        let out = asm
            .assemble(file(vec![radial(
                10.0,
                vec![
                    block(MomentKind::Reflectivity, vec![1.0; 6]),
                    block(MomentKind::SpectrumWidth, vec![2.0; 6]),
                ],
            )]))
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].missing, vec![VELOCITY.to_string()]);
        let velocity = out[0].record.array(VELOCITY).unwrap();
        assert_eq!(velocity.len(), 4);
        assert!(velocity.iter().all(|v| v.is_nan()));
        assert_eq!(out[0].record.array(REFLECTIVITY).unwrap().len(), 6);
    }

    #[test]
    fn arrays_track_latest_block_length_across_radials() {
        let mut asm = assembler();
        let all = |n: usize| {
            vec![
                block(MomentKind::Reflectivity, vec![1.0; n]),
                block(MomentKind::Velocity, vec![2.0; n]),
                block(MomentKind::SpectrumWidth, vec![3.0; n]),
            ]
        };
        let out = asm
            .assemble(file(vec![
                radial(0.0, all(8)),
                radial(0.5, all(3)),
                radial(1.0, vec![block(MomentKind::Velocity, vec![7.0; 5])]),
            ]))
            .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].record.array(REFLECTIVITY).unwrap().len(), 8);
        assert_eq!(out[1].record.array(REFLECTIVITY).unwrap().len(), 3);

        let last = &out[2].record;
        assert_eq!(last.int(COUNT), Some(5));
        assert_eq!(last.array(VELOCITY).unwrap().len(), 5);
        // Reflectivity was not in the last radial: prior value persists.
        assert_eq!(last.array(REFLECTIVITY), Some(&[1.0, 1.0, 1.0][..]));
        assert_eq!(out[2].missing, vec![REFLECTIVITY.to_string(), SPECTRUM_WIDTH.to_string()]);
    }

    #[test]
    fn damaged_radial_is_published_degraded_after_a_good_one() {
        let mut asm = assembler();
        let damaged = Radial::from_blocks(
            header(10.5),
            [
                MomentBlock::new(MomentKind::Reflectivity, 2.125, f64::NAN, vec![22.0]),
                MomentBlock::new(MomentKind::Velocity, 2.125, 0.25, vec![5.0, 6.0]),
                MomentBlock::new(MomentKind::SpectrumWidth, 2.125, 0.25, vec![7.0, 8.0]),
            ],
        );
        let all = vec![
            block(MomentKind::Reflectivity, vec![17.0, 18.0]),
            block(MomentKind::Velocity, vec![1.0, 2.0]),
            block(MomentKind::SpectrumWidth, vec![3.0, 4.0]),
        ];
        let out = asm.assemble(file(vec![radial(10.0, all), damaged])).unwrap();

        assert_eq!(out.len(), 2);
        assert!(!out[0].is_degraded());
        assert_eq!(out[1].missing, vec![REFLECTIVITY.to_string()]);
        assert_eq!(out[1].record.array(REFLECTIVITY), Some(&[17.0, 18.0][..]));
        assert_eq!(out[1].record.array(VELOCITY), Some(&[5.0, 6.0][..]));

        let rejected = asm.take_rejected();
        assert_eq!(rejected.len(), 1);
        assert!(matches!(&rejected[0], DriverError::Protocol(ProtocolError::Malformed(_))));
        assert!(asm.take_rejected().is_empty());
    }

    #[test]
    fn radial_with_unusable_time_is_skipped() {
        let mut asm = assembler();
        let mut broken = radial(20.0, vec![block(MomentKind::Reflectivity, vec![1.0])]);
        broken.header.collection_ms = i64::MIN;
        let out = asm
            .assemble(file(vec![
                radial(10.0, vec![block(MomentKind::Reflectivity, vec![1.0])]),
                broken,
                radial(30.0, vec![block(MomentKind::Reflectivity, vec![2.0])]),
            ]))
            .unwrap();

        let azimuths: Vec<_> = out.iter().map(|a| a.record.float(AZIMUTH)).collect();
        assert_eq!(azimuths, vec![Some(10.0), Some(30.0)]);
        assert_eq!(asm.take_rejected().len(), 1);
    }

    #[test]
    fn array_length_option_overrides_bins() {
        let options = SchemaOptions::new().with("Reflectivity.arrayLength", 16);
        let schema = radial_schema(720, &options).unwrap();
        let rec = Record::new(schema);
        assert_eq!(rec.array(REFLECTIVITY).unwrap().len(), 16);
        assert_eq!(rec.array(VELOCITY).unwrap().len(), 720);
    }
}
