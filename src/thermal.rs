use crate::event::DeviceStatus;
use crate::sender::{Collector, SendOutcome};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Device temperature source.
pub trait TempProbe {
    /// Current temperature in degrees Celsius, or `None` if the reading
    /// failed.
    fn read(&mut self) -> Option<u32>;
}

/// Reads the kernel thermal zone (millidegrees Celsius).
pub struct SysfsProbe {
    path: PathBuf,
}

impl SysfsProbe {
    pub fn new(path: PathBuf) -> Self {
        SysfsProbe { path }
    }
}

impl TempProbe for SysfsProbe {
    fn read(&mut self) -> Option<u32> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let millis: u64 = raw.trim().parse().ok()?;
        Some((millis / 1000) as u32)
    }
}

/// Samples the device temperature on a fixed period, publishes it to the
/// shared cell the pipeline driver reads, and reports device status to
/// the collector. Status reports are fire-and-forget: a lost ping is
/// acceptable and never spooled.
///
/// The cell doubles as the stop signal: the guard only ever writes
/// nonzero samples, and exits once someone clears it to zero.
pub struct ThermalGuard<P: TempProbe, C: Collector> {
    probe: P,
    collector: C,
    cell: Arc<AtomicU32>,
    interval: Duration,
    max_temp: u32,
}

impl<P: TempProbe, C: Collector> ThermalGuard<P, C> {
    pub fn new(
        probe: P,
        collector: C,
        cell: Arc<AtomicU32>,
        interval: Duration,
        max_temp: u32,
    ) -> Self {
        ThermalGuard {
            probe,
            collector,
            cell,
            interval,
            max_temp,
        }
    }

    pub fn run(mut self) {
        loop {
            std::thread::sleep(self.interval);
            if self.cell.load(Ordering::Relaxed) == 0 {
                break;
            }
            let Some(temp) = self.probe.read() else {
                warn!("[DEVICE] temperature reading failed");
                continue;
            };
            // zero is reserved for the stop signal; never overwrite it
            let _ = self.cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                (v != 0).then_some(temp.max(1))
            });

            let status = DeviceStatus::now(temp);
            match self.collector.post_status(&status) {
                SendOutcome::Success => {
                    if temp > self.max_temp {
                        info!("[DEVICE] Status: Overheated ({})", temp);
                    } else {
                        info!("[DEVICE] Status: Normal ({})", temp);
                    }
                }
                outcome => warn!("[DEVICE] Status: {}", outcome),
            }
        }
        info!("[DEVICE] thermal guard stopped");
    }
}
