use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use facegate::{
    delivery_queue, Config, Detector, FrameSource, HttpCollector, Pipeline, Recognizer, Sender,
    Spool, SysfsProbe, ThermalGuard, Tracker,
};
use log::debug;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::rc::Rc;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Run the passage-counting pipeline over a recorded detection stream.
/// Detection and recognition run out of process; this binary consumes
/// their output (one JSON object per line) and drives tracking,
/// delivery, and the thermal guard exactly as the live deployment does.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the config JSON file
    #[arg(long)]
    config: String,
    /// Recorded detection stream (JSON Lines), one frame per line
    #[arg(long)]
    frames: String,
}

/// On-disk frame record: aligned boxes, per-face identity votes, and
/// base64-encoded face crops.
#[derive(Deserialize)]
struct FrameRecord {
    boxes: Vec<[f32; 4]>,
    votes: Vec<HashMap<String, f32>>,
    faces: Vec<String>,
}

struct ReplayFrame {
    boxes: Vec<[f32; 4]>,
    faces: Vec<Vec<u8>>,
}

/// Shared hand-off carrying each frame's votes from the source to the
/// recognizer, in driver lockstep.
type VoteFeed = Rc<RefCell<VecDeque<Vec<HashMap<String, f32>>>>>;

struct ReplaySource {
    lines: Lines<BufReader<File>>,
    feed: VoteFeed,
}

impl FrameSource for ReplaySource {
    type Frame = ReplayFrame;

    fn next_frame(&mut self) -> anyhow::Result<Option<ReplayFrame>> {
        for line in self.lines.by_ref() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FrameRecord = serde_json::from_str(&line)?;
            let faces = record
                .faces
                .iter()
                .map(|f| BASE64.decode(f))
                .collect::<Result<Vec<_>, _>>()?;
            self.feed.borrow_mut().push_back(record.votes);
            return Ok(Some(ReplayFrame {
                boxes: record.boxes,
                faces,
            }));
        }
        Ok(None)
    }
}

struct ReplayDetector;

impl Detector<ReplayFrame> for ReplayDetector {
    fn detect(&mut self, frame: &ReplayFrame) -> anyhow::Result<(Vec<[f32; 4]>, Vec<Vec<u8>>)> {
        Ok((frame.boxes.clone(), frame.faces.clone()))
    }
}

struct ReplayRecognizer {
    feed: VoteFeed,
}

impl Recognizer for ReplayRecognizer {
    fn recognize(&mut self, _faces: &[Vec<u8>]) -> anyhow::Result<Vec<HashMap<String, f32>>> {
        Ok(self.feed.borrow_mut().pop_front().unwrap_or_default())
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 1. Parse CLI and load config
    let args = Args::parse();
    let cfg = Config::from_file(&args.config)?;

    // 2. Shared state: delivery queue, spool directory, temperature cell
    let (queue_tx, queue_rx) = delivery_queue(cfg.queue_capacity);
    let spool = Spool::new(cfg.spool_dir.clone())?;
    let temp_cell = Arc::new(AtomicU32::new(1));

    // 3. Sender loop on its own thread
    let collector = HttpCollector::new(&cfg.server.capture_url, &cfg.server.status_url);
    let sender = Sender::new(
        collector.clone(),
        queue_rx,
        spool.clone(),
        cfg.server.batch_size,
        Duration::from_secs(cfg.server.send_cooldown_secs),
        Duration::from_secs(cfg.server.poll_secs),
    );
    let sender_handle = thread::spawn(move || sender.run());

    // 4. Thermal guard on its own thread
    let guard = ThermalGuard::new(
        SysfsProbe::new(cfg.thermal.zone_path.clone()),
        collector,
        temp_cell.clone(),
        Duration::from_secs(cfg.thermal.check_interval_secs),
        cfg.thermal.max_temp,
    );
    let guard_handle = thread::spawn(move || guard.run());

    // 5. Tracking pipeline on the main thread
    let feed: VoteFeed = Rc::new(RefCell::new(VecDeque::new()));
    let source = ReplaySource {
        lines: BufReader::new(File::open(&args.frames)?).lines(),
        feed: feed.clone(),
    };
    let tracker = Tracker::new(cfg.direction, cfg.tracking.settings_for(cfg.direction));
    let mut pipeline = Pipeline::new(
        &cfg,
        source,
        ReplayDetector,
        ReplayRecognizer { feed },
        tracker,
        queue_tx,
        spool,
        temp_cell,
    )
    .with_observer(Box::new(|tracks, passages| {
        debug!("[PIPELINE] {} live track(s), {} passage(s)", tracks.len(), passages);
    }));
    pipeline.run()?;

    // 6. The pipeline signalled shutdown; wait for the others to drain
    sender_handle
        .join()
        .map_err(|_| anyhow::anyhow!("sender thread panicked"))?;
    guard_handle
        .join()
        .map_err(|_| anyhow::anyhow!("thermal guard thread panicked"))?;
    Ok(())
}
