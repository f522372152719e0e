use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use time::{Date, OffsetDateTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use fluxgate_core::prelude::*;

const BUFFER_LINES: usize = 50;

fn date_of_ms(timestamp_ms: i64) -> Result<Date> {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(timestamp_ms as i128 * 1_000_000)
        .context("timestamp out of range")?;
    Ok(dt.date())
}

/// Buffered per-channel JSONL writer.
///
/// Records append to
/// `<data_dir>/<exchange>/<market>/<stream_type>/<symbol>/<YYYY-MM-DD>.jsonl`,
/// where the date derives from the record's `localTimestamp` in UTC. A
/// channel's buffer is flushed when it reaches 50 lines, when the date
/// rolls over and on close.
pub struct Archiver {
    data_dir: PathBuf,
    buffer_lines: usize,
    buffers: HashMap<String, Vec<String>>,
    files: HashMap<String, File>,
    current_dates: HashMap<String, Date>,
}

impl Archiver {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            buffer_lines: BUFFER_LINES,
            buffers: HashMap::new(),
            files: HashMap::new(),
            current_dates: HashMap::new(),
        }
    }

    fn file_path(&self, channel: &Channel, date: Date) -> PathBuf {
        self.data_dir
            .join(&channel.exchange)
            .join(&channel.market)
            .join(&channel.stream_type)
            .join(&channel.symbol)
            .join(format!("{}.jsonl", date))
    }

    /// Buffers one bus message for its channel.
    pub async fn write(&mut self, channel_name: &str, payload: &str) -> Result<()> {
        let data: Value = serde_json::from_str(payload).context("payload is not JSON")?;
        let timestamp = data
            .get("localTimestamp")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("record has no localTimestamp"))?;
        let date = date_of_ms(timestamp)?;

        match self.current_dates.get(channel_name) {
            Some(current) if *current != date => {
                // Date rollover: drain the old day before switching files.
                self.flush(channel_name).await?;
                self.files.remove(channel_name);
                self.current_dates.insert(channel_name.to_string(), date);
            }
            None => {
                self.current_dates.insert(channel_name.to_string(), date);
            }
            _ => {}
        }

        let buffer = self.buffers.entry(channel_name.to_string()).or_default();
        buffer.push(data.to_string());

        if buffer.len() >= self.buffer_lines {
            self.flush(channel_name).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, channel_name: &str) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(channel_name) else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        let lines = buffer.len();
        let mut chunk = buffer.join("\n");
        chunk.push('\n');
        buffer.clear();

        if !self.files.contains_key(channel_name) {
            let channel: Channel = channel_name
                .parse()
                .map_err(|e| anyhow!("invalid channel {:?}: {}", channel_name, e))?;
            let date = self
                .current_dates
                .get(channel_name)
                .copied()
                .ok_or_else(|| anyhow!("no date recorded for {:?}", channel_name))?;
            let path = self.file_path(&channel, date);
            let file = open_append(&path).await?;
            self.files.insert(channel_name.to_string(), file);
        }

        let file = self.files.get_mut(channel_name).expect("file just inserted");
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;
        debug!(channel = channel_name, lines, "flushed archive buffer");
        Ok(())
    }

    /// Flushes every channel and drops the file handles.
    pub async fn close(&mut self) -> Result<()> {
        let channels: Vec<String> = self.buffers.keys().cloned().collect();
        for channel in channels {
            self.flush(&channel).await?;
        }
        self.files.clear();
        info!("archiver closed");
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?)
}
