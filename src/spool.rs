use crate::event::ExportEvent;
use log::warn;
use rand::{distributions::Alphanumeric, Rng};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

const NAME_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("spool encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Disk-backed overflow store for undeliverable event batches. One JSON
/// record per uniquely named file; readers delete after reading, so
/// concurrent save/load from different threads stays safe. Directory
/// growth is bounded only by disk space, which the deployment accepts.
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub fn new(dir: PathBuf) -> Result<Self, SpoolError> {
        fs::create_dir_all(&dir)?;
        Ok(Spool { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Persist one batch to a fresh randomly named file.
    pub fn save(&self, events: &[ExportEvent]) -> Result<(), SpoolError> {
        let body = serde_json::to_vec(events)?;
        let mut rng = rand::thread_rng();
        loop {
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(NAME_LEN)
                .map(char::from)
                .collect();
            let path = self.dir.join(name);
            if path.exists() {
                continue;
            }
            fs::write(&path, &body)?;
            return Ok(());
        }
    }

    /// Take back the earliest spooled batch, if any. The file is deleted
    /// whether or not it decodes; a corrupt record is logged and dropped
    /// rather than poisoning the retry loop.
    pub fn load(&self) -> Result<Option<Vec<ExportEvent>>, SpoolError> {
        let mut names: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        if names.is_empty() {
            return Ok(None);
        }
        names.sort();
        let path = names.remove(0);

        let body = fs::read(&path);
        // delete first: a record is consumed exactly once
        if let Err(e) = fs::remove_file(&path) {
            warn!("could not remove spool file {:?}: {}", path, e);
        }
        let body = body?;
        match serde_json::from_slice::<Vec<ExportEvent>>(&body) {
            Ok(events) => Ok(Some(events)),
            Err(e) => {
                warn!("discarding corrupt spool file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }
}
