use chrono::{Duration, NaiveDate, NaiveDateTime};
use image::{Rgb, RgbImage};
use keocore::catalog::{CloseRule, ClosePolicy, DatedTree, FrameName, MinuteKey, MINUTES_PER_DAY};
use keocore::config::{AggregatorConfig, ExtractorConfig, KeogramConfig};
use keocore::fsio;
use keocore::imaging::png;
use keocore::processing::assembler::{BLANK, INITIAL};
use keocore::processing::{
    EmissionExtractor, Keogram, KeogramAssembler, KeogramStore, MinuteAggregator,
};
use keocore::PipelineStage;
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn at(text: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(text, "%Y%m%d-%H%M%S").unwrap()
}

struct Station {
    dir: TempDir,
}

impl Station {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn tree(&self, name: &str) -> DatedTree {
        DatedTree::new(self.path(name))
    }

    fn aggregator(&self) -> MinuteAggregator {
        MinuteAggregator::new(
            self.path("staging"),
            self.tree("raw"),
            self.tree("averaged"),
            "MISS2",
            AggregatorConfig {
                close: CloseRule {
                    policy: ClosePolicy::NextMinute,
                    grace_seconds: 30,
                },
                ..Default::default()
            },
        )
    }

    fn extractor(&self) -> EmissionExtractor {
        EmissionExtractor::new(
            self.tree("averaged"),
            self.tree("columns"),
            "MISS2",
            ExtractorConfig::default(),
        )
    }

    fn assembler(&self) -> KeogramAssembler {
        KeogramAssembler::new(
            self.tree("columns"),
            self.tree("keograms"),
            "MISS2",
            KeogramConfig::default(),
        )
    }

    fn stage_frame(&self, stamp: &str, frame: &Array2<u16>) -> PathBuf {
        let path = self
            .path("staging")
            .join(FrameName::new("MISS2", at(stamp)).file_name());
        png::write_gray16(&path, frame).unwrap();
        path
    }

    fn write_column(&self, stamp: &str, colour: [u8; 3]) -> PathBuf {
        let path = self
            .tree("columns")
            .minute_path("MISS2", MinuteKey::floor(at(stamp)));
        png::write_rgb8(&path, &RgbImage::from_pixel(1, 300, Rgb(colour))).unwrap();
        path
    }
}

/// Sensor-sized frame with a bright green line and a dark calibration corner.
fn sensor_frame() -> Array2<u16> {
    Array2::from_shape_fn((520, 695), |(r, _)| match r {
        299..=301 => 30000,
        _ => 1000,
    })
}

fn staged(root: &Path) -> usize {
    fsio::walk_files(root).unwrap().len()
}

#[test]
fn one_minute_flows_from_frames_to_keogram() {
    let station = Station::new();
    for stamp in [
        "20240101-120010",
        "20240101-120020",
        "20240101-120030",
        "20240101-120040",
    ] {
        station.stage_frame(stamp, &sensor_frame());
    }

    let mut aggregator = station.aggregator();
    aggregator.initialize(at("20240101-120105")).unwrap();
    let averaged = aggregator.aggregate(at("20240101-120105")).unwrap();
    assert_eq!(averaged.len(), 1);
    assert_eq!(averaged[0].frame_count, 4);
    assert!(averaged[0]
        .path
        .ends_with("averaged/2024/01/01/MISS2-20240101-120000.png"));
    assert_eq!(staged(&station.path("staging")), 0);
    assert_eq!(staged(&station.path("raw")), 4);
    let key = MinuteKey::floor(at("20240101-120000"));
    assert!(aggregator.ledger().contains(&key));
    assert_eq!(png::read_gray16(&averaged[0].path).unwrap(), sensor_frame());

    let mut extractor = station.extractor();
    let columns = extractor.extract_pending(at("20240101-120130")).unwrap();
    assert_eq!(columns.len(), 1);
    let green = columns[0].pixels.get_pixel(0, 150);
    assert!(green[1] > 100 && green[0] == 0 && green[2] == 0);

    let mut assembler = station.assembler();
    assembler.initialize(at("20240101-120130")).unwrap();
    let output = assembler.execute(at("20240101-120400")).unwrap();
    assert!(output.written[0].exists());
    let keogram = assembler.current().unwrap();
    assert_eq!(keogram.raster().get_pixel(720, 150), green);
    assert_eq!(*keogram.raster().get_pixel(719, 150), BLANK);
    assert_eq!(*keogram.raster().get_pixel(722, 150), INITIAL);
}

#[test]
fn aggregate_is_idempotent_once_ledgered() {
    let station = Station::new();
    station.stage_frame("20240101-120010", &sensor_frame());
    let mut aggregator = station.aggregator();
    assert_eq!(aggregator.aggregate(at("20240101-120105")).unwrap().len(), 1);

    let out = station.tree("averaged").minute_path("MISS2", MinuteKey::floor(at("20240101-120000")));
    let before = fs::read(&out).unwrap();
    for now in ["20240101-120130", "20240101-120205", "20240101-130000"] {
        assert!(aggregator.aggregate(at(now)).unwrap().is_empty());
    }
    assert_eq!(fs::read(&out).unwrap(), before);
    assert_eq!(staged(&station.path("averaged")), 1);
}

#[test]
fn corrupt_inputs_are_isolated_along_the_pipeline() {
    let station = Station::new();
    for stamp in ["20240101-120010", "20240101-120020", "20240101-120030"] {
        station.stage_frame(stamp, &sensor_frame());
    }
    let truncated = station.stage_frame("20240101-120040", &sensor_frame());
    let bytes = fs::read(&truncated).unwrap();
    fs::write(&truncated, &bytes[..bytes.len() / 4]).unwrap();

    let averaged = station.aggregator().aggregate(at("20240101-120105")).unwrap();
    assert_eq!(averaged[0].frame_count, 3);

    // a second averaged minute that is corrupt on disk
    let broken = station
        .tree("averaged")
        .minute_path("MISS2", MinuteKey::floor(at("20240101-120100")));
    fs::write(&broken, b"\x89PNG broken").unwrap();

    let mut extractor = station.extractor();
    let columns = extractor.extract_pending(at("20240101-120230")).unwrap();
    assert_eq!(columns.len(), 1);

    let mut assembler = station.assembler();
    assembler.initialize(at("20240101-120230")).unwrap();
    assembler.execute(at("20240101-120430")).unwrap();
    let keogram = assembler.current().unwrap();
    assert_ne!(*keogram.raster().get_pixel(720, 150), BLANK);
    assert_eq!(*keogram.raster().get_pixel(721, 150), BLANK);
}

#[test]
fn full_day_has_no_unfilled_minute() {
    let station = Station::new();
    for hour in [0u32, 6, 12, 23] {
        station.write_column(&format!("20240101-{hour:02}3000"), [9, 99, 199]);
    }
    let mut assembler = station.assembler();
    assembler.initialize(at("20240101-000000")).unwrap();
    for now in ["20240101-060000", "20240101-180000", "20240102-000500"] {
        assembler.execute(at(now)).unwrap();
    }

    let store = KeogramStore::new(station.tree("keograms"), "MISS2");
    let day = store
        .load(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 300, at("20240102-000500"))
        .unwrap()
        .unwrap();
    assert!(day.is_complete());
    for minute in 0..MINUTES_PER_DAY as u32 {
        let pixel = *day.raster().get_pixel(minute, 0);
        assert_ne!(pixel, INITIAL, "minute {minute} left unfilled");
    }
    assert_eq!(*day.raster().get_pixel(6 * 60 + 30, 0), Rgb([9, 99, 199]));
}

#[test]
fn restart_after_midnight_finishes_the_previous_day_without_leaking() {
    let station = Station::new();
    let store = KeogramStore::new(station.tree("keograms"), "MISS2");
    let yesterday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

    let mut previous = Keogram::fresh(yesterday, 300);
    previous.advance(&NoColumns, at("20240101-235800"));
    assert_eq!(previous.last_minute(), Some(1437));
    store.save(&previous).unwrap();
    station.write_column("20240101-235800", [10, 10, 10]);
    station.write_column("20240101-235900", [20, 20, 20]);

    let mut assembler = station.assembler();
    assembler.initialize(at("20240102-000300")).unwrap();
    assembler.execute(at("20240102-000400")).unwrap();

    let finished = store.load(yesterday, 300, at("20240102-000400")).unwrap().unwrap();
    assert_eq!(*finished.raster().get_pixel(1438, 0), Rgb([10, 10, 10]));
    assert_eq!(*finished.raster().get_pixel(1439, 0), Rgb([20, 20, 20]));
    assert!(store.render_path(yesterday).exists());

    let current = assembler.current().unwrap();
    assert_eq!(current.date(), today);
    assert_eq!(current.last_minute(), Some(1));
    for minute in 0..MINUTES_PER_DAY as u32 {
        let pixel = *current.raster().get_pixel(minute, 0);
        assert!(pixel == BLANK || pixel == INITIAL, "minute {minute} leaked");
    }
}

#[test]
fn steady_clock_fills_every_minute_with_frames() {
    let station = Station::new();
    let mut aggregator = MinuteAggregator::new(
        station.path("staging"),
        station.tree("raw"),
        station.tree("averaged"),
        "MISS2",
        AggregatorConfig::default(),
    );
    let mut extractor = station.extractor();
    let mut assembler = station.assembler();
    let start = at("20240101-120000");
    aggregator.initialize(start).unwrap();
    extractor.initialize(start).unwrap();
    assembler.initialize(start).unwrap();

    let cadences = [
        AggregatorConfig::default().cadence,
        ExtractorConfig::default().cadence,
        KeogramConfig::default().cadence,
    ];
    let mut now = start;
    while now <= at("20240101-122500") {
        if now.and_utc().timestamp() % 10 == 0 {
            station.stage_frame(&now.format("%Y%m%d-%H%M%S").to_string(), &sensor_frame());
        }
        let previous = now - Duration::seconds(1);
        let due: Vec<bool> = cadences
            .iter()
            .map(|cadence| cadence.next_tick(previous) == now)
            .collect();
        if due[0] {
            aggregator.execute(now).unwrap();
        }
        if due[1] {
            extractor.execute(now).unwrap();
        }
        if due[2] {
            assembler.execute(now).unwrap();
        }
        now += Duration::seconds(1);
    }

    let keogram = assembler.current().unwrap();
    for minute in 720..=739u32 {
        let pixel = *keogram.raster().get_pixel(minute, 150);
        assert_ne!(pixel, BLANK, "minute {minute} was blanked");
        assert_ne!(pixel, INITIAL, "minute {minute} was never examined");
    }
}

#[test]
fn column_files_reload_unchanged() {
    let station = Station::new();
    station.stage_frame("20240101-120010", &sensor_frame());
    station.aggregator().aggregate(at("20240101-120105")).unwrap();
    let mut extractor = station.extractor();
    let columns = extractor.extract_pending(at("20240101-120130")).unwrap();
    let path = extractor.column_path(columns[0].minute);
    assert_eq!(png::read_rgb8(&path).unwrap(), columns[0].pixels);
}

struct NoColumns;

impl keocore::processing::ColumnSource for NoColumns {
    fn column(&self, _key: MinuteKey) -> Option<RgbImage> {
        None
    }
}
