//! The simulated work done for every event: a prime search for CPU load and
//! file appends for I/O load, each scaled by an intensity in `[0, 1]`.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

/// Prime index searched at CPU intensity 1.
pub const CPU_SCALE: f64 = 4096.0;
/// Append rounds at I/O intensity 1.
pub const IO_SCALE: f64 = 16384.0;
/// Buffer bytes at I/O intensity 1 in [`IoMode::Buffer`].
pub const BUFFER_SCALE: f64 = (1u64 << 28) as f64;

/// Written once per I/O round.
pub const IO_CONTENT: &[u8] = b"EVENT_HANDLER_IO_CONTENT";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IoMode {
    /// Repeated small append-and-delete rounds.
    #[default]
    Rounds,
    /// One large random buffer written at once. Deprecated: kept for
    /// comparison runs only, [`IoMode::Rounds`] is the supported workload.
    Buffer,
}

impl IoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoMode::Rounds => "rounds",
            IoMode::Buffer => "buffer",
        }
    }
}

impl FromStr for IoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rounds" => Ok(IoMode::Rounds),
            "buffer" => Ok(IoMode::Buffer),
            other => Err(Error::Config(format!("unknown I/O mode {other:?}"))),
        }
    }
}

pub fn check_intensity(intensity: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&intensity) {
        Ok(intensity)
    } else {
        Err(Error::Config(format!(
            "intensity must lie in [0, 1], got {intensity}"
        )))
    }
}

fn scaled(intensity: f64, scale: f64) -> Result<u64> {
    Ok((check_intensity(intensity)? * scale) as u64)
}

/// Index of the prime searched at `intensity`.
pub fn cpu_target(intensity: f64) -> Result<u64> {
    scaled(intensity, CPU_SCALE)
}

/// Number of append rounds at `intensity`.
pub fn io_rounds(intensity: f64) -> Result<u64> {
    scaled(intensity, IO_SCALE)
}

fn is_prime(p: u64) -> bool {
    p >= 2 && (2..p).all(|k| p % k != 0)
}

/// The `n`th prime by trial division, slow on purpose. `None` for `n == 0`.
pub fn nth_prime(n: u64) -> Option<u64> {
    if n == 0 {
        return None;
    }
    (2..).filter(|&p| is_prime(p)).nth((n - 1) as usize)
}

pub fn do_cpu(intensity: f64) -> Result<Option<u64>> {
    let n = cpu_target(intensity)?;
    let prime = nth_prime(n);
    debug!(n, ?prime, "prime search finished");
    Ok(prime)
}

/// Appends [`IO_CONTENT`] to `path` and removes the file again.
pub fn append_round(path: &Path) -> Result<()> {
    append(path, IO_CONTENT)?;
    fs::remove_file(path).map_err(|e| Error::scratch(path, e))
}

/// The same round on the event loop's file I/O.
pub async fn append_round_async(path: &Path) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::scratch(path, e))?;
    file.write_all(IO_CONTENT)
        .await
        .map_err(|e| Error::scratch(path, e))?;
    drop(file);
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| Error::scratch(path, e))
}

fn append(path: &Path, content: &[u8]) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(content))
        .map_err(|e| Error::scratch(path, e))
}

/// Runs the I/O workload in rounds mode and returns the rounds performed.
pub fn do_io(intensity: f64, path: &Path) -> Result<u64> {
    let rounds = io_rounds(intensity)?;
    for _ in 0..rounds {
        append_round(path)?;
    }
    Ok(rounds)
}

/// Runs the I/O workload in buffer mode and returns the bytes written.
pub fn do_io_buffer(intensity: f64, path: &Path) -> Result<u64> {
    let len = scaled(intensity, BUFFER_SCALE)?;
    if len == 0 {
        return Ok(0);
    }
    let mut rng = rand::thread_rng();
    let buf: Vec<u8> = (0..len).map(|_| rng.gen_range(b'A'..=b'Z')).collect();
    append(path, &buf)?;
    fs::remove_file(path).map_err(|e| Error::scratch(path, e))?;
    Ok(len)
}

/// CPU and I/O intensities plus where the I/O rounds write.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub cpu: f64,
    pub io: f64,
    pub mode: IoMode,
    pub scratch_dir: PathBuf,
}

impl Workload {
    /// Scratch file of the device at `index`. Devices never share one, so
    /// workloads running in parallel don't delete each other's files.
    pub fn scratch_for(&self, index: usize) -> PathBuf {
        self.scratch_dir.join(format!("gateway-io-{index}"))
    }

    pub fn io_rounds(&self) -> Result<u64> {
        io_rounds(self.io)
    }

    /// The CPU part, then the I/O part, on the calling thread.
    pub fn run(&self, scratch: &Path) -> Result<()> {
        do_cpu(self.cpu)?;
        let done = match self.mode {
            IoMode::Rounds => do_io(self.io, scratch)?,
            IoMode::Buffer => do_io_buffer(self.io, scratch)?,
        };
        debug!(mode = self.mode.as_str(), done, "I/O finished");
        Ok(())
    }
}
