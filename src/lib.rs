pub mod config;
pub mod detection;
pub mod event;
pub mod pipeline;
pub mod queue;
pub mod sender;
pub mod spool;
pub mod thermal;
pub mod track;
pub mod tracker;

// Re-export main types
pub use crate::config::{Config, Direction};
pub use crate::detection::{Detection, Detector, FrameSource, Recognizer};
pub use crate::event::{DeviceStatus, ExportEvent};
pub use crate::pipeline::{Pipeline, PipelineState};
pub use crate::queue::{delivery_queue, QueueItem, QueueReceiver, QueueSender};
pub use crate::sender::{Collector, HttpCollector, SendOutcome, Sender};
pub use crate::spool::Spool;
pub use crate::thermal::{SysfsProbe, TempProbe, ThermalGuard};
pub use crate::track::Track;
pub use crate::tracker::{TrackError, Tracker};
