// Memory Telemetry
// Host memory snapshots read from /proc/meminfo for MEMORY_* reports

use std::fmt;
use std::path::Path;
use thiserror::Error;

const MEMINFO_PATH: &str = "/proc/meminfo";

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory monitoring failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory monitoring failed: {0} missing from meminfo")]
    Missing(&'static str),
}

/// Used and total memory, in kibibytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub used_kb: u64,
    pub total_kb: u64,
}

impl MemorySnapshot {
    pub fn used_gb(&self) -> f64 {
        kb_to_gb(self.used_kb)
    }

    pub fn total_gb(&self) -> f64 {
        kb_to_gb(self.total_kb)
    }

    pub fn percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        self.used_kb as f64 * 100.0 / self.total_kb as f64
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Container {:.2}GB/{:.2}GB ({:.1}%)",
            self.used_gb(),
            self.total_gb(),
            self.percent()
        )
    }
}

fn kb_to_gb(kb: u64) -> f64 {
    kb as f64 / (1024.0 * 1024.0)
}

/// Parse meminfo text. Used memory is `MemTotal - MemAvailable`.
pub fn parse_meminfo(text: &str) -> Result<MemorySnapshot, MemoryError> {
    let field = |name: &'static str| -> Result<u64, MemoryError> {
        text.lines()
            .find_map(|line| {
                let rest = line.strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next()?.parse::<u64>().ok()
            })
            .ok_or(MemoryError::Missing(name))
    };

    let total_kb = field("MemTotal")?;
    let available_kb = field("MemAvailable")?;
    Ok(MemorySnapshot {
        used_kb: total_kb.saturating_sub(available_kb),
        total_kb,
    })
}

pub async fn read_snapshot_from(path: impl AsRef<Path>) -> Result<MemorySnapshot, MemoryError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_meminfo(&text)
}

pub async fn read_snapshot() -> Result<MemorySnapshot, MemoryError> {
    read_snapshot_from(MEMINFO_PATH).await
}
