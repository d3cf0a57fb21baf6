use crate::event::{DeviceStatus, ExportEvent};
use crate::queue::{QueueItem, QueueReceiver};
use crate::spool::Spool;
use log::{error, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Every delivery attempt lands in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 2xx response.
    Success,
    /// Any other HTTP status.
    Error(u16),
    /// Transport or connection failure; the collector never answered.
    Unreachable,
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Success => write!(f, "Success"),
            SendOutcome::Error(code) => write!(f, "Error {}", code),
            SendOutcome::Unreachable => write!(f, "No connection"),
        }
    }
}

/// Remote collector seam. The production impl speaks HTTP; tests swap
/// in a scripted one.
pub trait Collector {
    fn post_events(&self, events: &[ExportEvent]) -> SendOutcome;
    fn post_status(&self, status: &DeviceStatus) -> SendOutcome;
}

/// ureq-backed collector client.
#[derive(Clone)]
pub struct HttpCollector {
    agent: ureq::Agent,
    capture_url: String,
    status_url: String,
}

impl HttpCollector {
    pub fn new(capture_url: &str, status_url: &str) -> Self {
        HttpCollector {
            agent: ureq::agent(),
            capture_url: capture_url.to_string(),
            status_url: status_url.to_string(),
        }
    }

    fn classify(result: Result<ureq::Response, ureq::Error>) -> SendOutcome {
        match result {
            Ok(_) => SendOutcome::Success,
            Err(ureq::Error::Status(code, _)) => SendOutcome::Error(code),
            Err(ureq::Error::Transport(_)) => SendOutcome::Unreachable,
        }
    }
}

impl Collector for HttpCollector {
    fn post_events(&self, events: &[ExportEvent]) -> SendOutcome {
        Self::classify(self.agent.post(&self.capture_url).send_json(events))
    }

    fn post_status(&self, status: &DeviceStatus) -> SendOutcome {
        Self::classify(self.agent.post(&self.status_url).send_json(status))
    }
}

/// Drains the delivery queue (or the spool once the queue runs dry) and
/// pushes batches to the collector. Failed batches are re-spooled and
/// retried after a fixed cooldown; that cooldown is the only backoff.
pub struct Sender<C: Collector> {
    collector: C,
    queue: QueueReceiver,
    spool: Spool,
    batch_size: usize,
    cooldown: Duration,
    poll: Duration,
    stop_seen: bool,
}

impl<C: Collector> Sender<C> {
    pub fn new(
        collector: C,
        queue: QueueReceiver,
        spool: Spool,
        batch_size: usize,
        cooldown: Duration,
        poll: Duration,
    ) -> Self {
        Sender {
            collector,
            queue,
            spool,
            batch_size: batch_size.max(1),
            cooldown,
            poll,
            stop_seen: false,
        }
    }

    /// Run until the stop sentinel has been seen and both queue and
    /// spool are exhausted.
    pub fn run(mut self) {
        while self.cycle() {}
        info!("[SENDER] stopped");
    }

    fn cycle(&mut self) -> bool {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            match self.queue.try_take() {
                Some(QueueItem::Event(event)) => batch.push(event),
                Some(QueueItem::Stop) => self.stop_seen = true,
                None => break,
            }
        }

        if batch.is_empty() {
            match self.spool.load() {
                Ok(Some(events)) => batch = events,
                Ok(None) => {
                    if self.stop_seen {
                        return false;
                    }
                    std::thread::sleep(self.poll);
                    return true;
                }
                Err(e) => {
                    warn!("[SENDER] spool read failed: {}", e);
                    std::thread::sleep(self.poll);
                    return true;
                }
            }
        }
        if batch.is_empty() {
            // a spool file held an empty batch; nothing to deliver
            return true;
        }

        let started = Instant::now();
        let outcome = self.collector.post_events(&batch);
        info!(
            "[SENDER] {} event(s) in {:.2}s | {}",
            batch.len(),
            started.elapsed().as_secs_f32(),
            outcome
        );

        if outcome != SendOutcome::Success {
            if let Err(e) = self.spool.save(&batch) {
                // both the network and the disk failed us
                error!("[SENDER] {} event(s) lost: {}", batch.len(), e);
            }
            std::thread::sleep(self.cooldown);
        }
        true
    }
}
