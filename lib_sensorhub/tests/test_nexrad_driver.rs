use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lib_sensorhub::assemble::RADIAL_OUTPUT;
use lib_sensorhub::drivers::{NexradConfig, NexradSetup};
use lib_sensorhub::source::{MomentBlock, MomentKind, Radial, RadialDecoder, RadialHeader};
use lib_sensorhub::{DataEvent, ProtocolError, SensorDriver};
use tokio::sync::mpsc;

/// Text stand-in for Archive II, one radial per line:
/// `<epoch ms> <azimuth> REF=v,v,.. VEL=.. SW=..`.
struct TextVolume;

impl RadialDecoder for TextVolume {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Radial>, ProtocolError> {
        let malformed = |what: &str| ProtocolError::Malformed(what.to_string());
        let text = std::str::from_utf8(bytes).map_err(|e| malformed(&e.to_string()))?;
        let mut radials = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut tokens = line.split_whitespace();
            let ms: i64 = tokens.next().and_then(|t| t.parse().ok()).ok_or_else(|| malformed(line))?;
            let azimuth: f32 = tokens.next().and_then(|t| t.parse().ok()).ok_or_else(|| malformed(line))?;
            let mut blocks = Vec::new();
            for token in tokens {
                let (name, values) = token.split_once('=').ok_or_else(|| malformed(token))?;
                let kind = match name {
                    "REF" => MomentKind::Reflectivity,
                    "VEL" => MomentKind::Velocity,
                    "SW" => MomentKind::SpectrumWidth,
                    _ => return Err(malformed(name)),
                };
                let data = values
                    .split(',')
                    .map(|v| v.parse::<f32>().map_err(|_| malformed(v)))
                    .collect::<Result<Vec<_>, _>>()?;
                blocks.push(MomentBlock::new(kind, 2.125, 0.25, data));
            }
            let header = RadialHeader {
                radar_id: "KHTX".to_string(),
                collection_ms: ms,
                azimuth_angle: azimuth,
                elevation_angle: 0.5,
            };
            radials.push(Radial::from_blocks(header, blocks));
        }
        Ok(radials)
    }
}

/// A complete radial at 2014-12-27T12:00:00Z followed by one that lacks velocity.
const TWO_RADIALS: &str = "1419681600000 10.0 REF=17,18,nan,27 VEL=32,37,42,47 SW=2,3,4,5\n\
1419681600500 10.5 REF=22,23 SW=7,8\n";

fn setup(rx: mpsc::UnboundedReceiver<PathBuf>) -> NexradSetup {
    NexradSetup::with_paths(rx).with_decoder(TextVolume)
}

fn write_file(dir: &Path, name: &str, bytes: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("failed to write test volume");
    path
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Arc<DataEvent>>) -> Arc<DataEvent> {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no radial within 10 s")
        .expect("event channel closed")
}

/// Publication reaches subscribers before the counter moves; wait for it.
async fn wait_published(driver: &SensorDriver<NexradSetup>, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while driver.stats().published < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("published counter did not settle");
}

fn config(num_bins: usize) -> NexradConfig {
    NexradConfig {
        site_ids: vec!["KHTX".to_string()],
        num_bins,
        ..NexradConfig::default()
    }
}

#[tokio::test]
async fn test_radials_are_published_per_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let garbled = write_file(dir.path(), "KHTX_garbled", "1419681600000 ten REF=1\n");
    let good = write_file(dir.path(), "KHTX_20141227_120000", TWO_RADIALS);

    let (tx, rx) = mpsc::unbounded_channel();
    let mut driver = SensorDriver::new(setup(rx));
    driver.init(config(720)).await.expect("init failed");
    assert_eq!(driver.output_names(), vec![RADIAL_OUTPUT.to_string()]);

    let mut events = driver.subscribe(RADIAL_OUTPUT).expect("subscribe failed");
    driver.start().expect("start failed");
    tx.send(dir.path().join("does_not_exist")).expect("send failed");
    tx.send(garbled).expect("send failed");
    tx.send(good).expect("send failed");

    let first = next_event(&mut events).await;
    assert_eq!(first.time.to_rfc3339(), "2014-12-27T12:00:00+00:00");
    assert_eq!(first.record.float("azimuth"), Some(10.0));
    assert_eq!(first.record.int("count"), Some(4));
    let reflectivity = first.record.array("Reflectivity").expect("no reflectivity");
    assert_eq!(reflectivity.len(), 4);
    assert_eq!(reflectivity[0], 17.0);
    assert_eq!(reflectivity[1], 18.0);
    assert!(reflectivity[2].is_nan());
    assert_eq!(reflectivity[3], 27.0);
    assert_eq!(first.record.array("Velocity").expect("no velocity"), &[32.0, 37.0, 42.0, 47.0]);
    assert_eq!(first.record.array("SpectrumWidth").expect("no width"), &[2.0, 3.0, 4.0, 5.0]);

    // Published once, with the velocity of the previous radial kept.
    let second = next_event(&mut events).await;
    assert_eq!(second.record.float("azimuth"), Some(10.5));
    assert_eq!(second.record.int("count"), Some(2));
    assert_eq!(second.record.array("Reflectivity").expect("no reflectivity"), &[22.0, 23.0]);
    assert_eq!(second.record.array("Velocity").expect("no velocity"), &[32.0, 37.0, 42.0, 47.0]);
    assert_eq!(second.record.array("SpectrumWidth").expect("no width"), &[7.0, 8.0]);
    assert!(events.try_recv().is_err());

    wait_published(&driver, 2).await;
    let stats = driver.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.degraded, 1);
    assert_eq!(stats.protocol_errors, 1);
    assert_eq!(stats.fetch_failures, 1);

    let (latest, _) = driver.get_latest(RADIAL_OUTPUT).expect("no latest radial");
    assert_eq!(latest.float("azimuth"), Some(10.5));

    driver.shutdown().await;
}

#[tokio::test]
async fn test_damaged_block_degrades_only_its_radial() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = write_file(
        dir.path(),
        "KHTX_damaged",
        "1419681600000 10.0 REF=17,18 VEL=1,2 SW=3,4\n\
         1419681600500 10.5 REF=inf,23 VEL=5,6 SW=7,8\n\
         1419681601000 11.0 REF=30,31 VEL=9,10 SW=11,12\n",
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let mut driver = SensorDriver::new(setup(rx));
    driver.init(config(720)).await.expect("init failed");
    let mut events = driver.subscribe(RADIAL_OUTPUT).expect("subscribe failed");
    driver.start().expect("start failed");
    tx.send(file).expect("send failed");

    let first = next_event(&mut events).await;
    assert_eq!(first.record.array("Reflectivity").expect("no reflectivity"), &[17.0, 18.0]);

    // Reflectivity of the damaged radial is dropped; the previous one is kept.
    let damaged = next_event(&mut events).await;
    assert_eq!(damaged.record.float("azimuth"), Some(10.5));
    assert_eq!(damaged.record.array("Reflectivity").expect("no reflectivity"), &[17.0, 18.0]);
    assert_eq!(damaged.record.array("Velocity").expect("no velocity"), &[5.0, 6.0]);

    let last = next_event(&mut events).await;
    assert_eq!(last.record.float("azimuth"), Some(11.0));
    assert_eq!(last.record.array("Reflectivity").expect("no reflectivity"), &[30.0, 31.0]);

    wait_published(&driver, 3).await;
    let stats = driver.stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.degraded, 1);
    assert_eq!(stats.protocol_errors, 1);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_array_length_follows_configured_bins() {
    let (_tx, rx) = mpsc::unbounded_channel::<PathBuf>();
    let mut driver = SensorDriver::new(setup(rx));
    driver.init(config(1832)).await.expect("init failed");

    let schema = driver.get_record_schema(RADIAL_OUTPUT).expect("no radial schema");
    let velocity = schema.field("Velocity").expect("no velocity field");
    let length = velocity.array_length.as_ref().expect("no array length");
    assert_eq!(length.default, 1832);
    assert_eq!(length.source.as_deref(), Some("count"));
}

#[cfg(feature = "watch")]
#[tokio::test]
async fn test_watched_folder_picks_up_existing_files() {
    let root = tempfile::tempdir().expect("failed to create temp dir");
    let site = root.path().join("KHTX");
    std::fs::create_dir(&site).expect("failed to create site folder");
    write_file(&site, "KHTX_20141227_120000", TWO_RADIALS);

    let mut driver = SensorDriver::new(NexradSetup::new().with_decoder(TextVolume));
    let config = NexradConfig {
        root_folder: root.path().to_path_buf(),
        scan_existing: true,
        ..config(720)
    };
    driver.init(config).await.expect("init failed");
    let mut events = driver.subscribe(RADIAL_OUTPUT).expect("subscribe failed");
    driver.start().expect("start failed");

    assert_eq!(next_event(&mut events).await.record.float("azimuth"), Some(10.0));
    assert_eq!(next_event(&mut events).await.record.float("azimuth"), Some(10.5));
    driver.shutdown().await;
}

#[cfg(feature = "watch")]
#[tokio::test]
async fn test_missing_site_folder_fails_init() {
    let root = tempfile::tempdir().expect("failed to create temp dir");
    let mut driver = SensorDriver::new(NexradSetup::new());
    let config = NexradConfig {
        root_folder: root.path().to_path_buf(),
        ..config(720)
    };
    assert!(driver.init(config).await.is_err());
    assert_eq!(driver.state_name(), "uninitialized");
}
