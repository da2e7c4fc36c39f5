use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use super::EpochSummary;
use crate::Result;

/// One scalar per line, in the order they were added.
pub const SCALARS_FILE: &str = "scalars.jsonl";

/// One epoch summary per line.
pub const EPOCHS_FILE: &str = "epochs.jsonl";

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    value: f32,
    step: usize,
    wall_time: f64,
}

/// Writes tagged scalars to JSON lines files inside a log directory.
pub struct ScalarWriter {
    scalars: BufWriter<File>,
    epochs: BufWriter<File>,
}

impl ScalarWriter {
    /// Creates the log directory if needed and starts fresh metric files in it.
    pub fn create(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)?;

        Ok(Self {
            scalars: BufWriter::new(File::create(log_dir.join(SCALARS_FILE))?),
            epochs: BufWriter::new(File::create(log_dir.join(EPOCHS_FILE))?),
        })
    }

    /// Records `value` under `tag` at `step`.
    pub fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        let record = ScalarRecord {
            tag,
            value,
            step,
            wall_time: wall_time(),
        };

        write_line(&mut self.scalars, &record)
    }

    pub fn add_summary(&mut self, summary: &EpochSummary) -> Result<()> {
        write_line(&mut self.epochs, summary)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        self.epochs.flush()?;
        Ok(())
    }
}

fn write_line<T: Serialize>(out: &mut BufWriter<File>, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).map_err(std::io::Error::from)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0., |elapsed| elapsed.as_secs_f64())
}
