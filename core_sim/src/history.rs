//! Append-only per-tick snapshot log.
//!
//! Each tick is stored bincode-encoded and zstd-compressed. Reads decode on
//! demand and are not cached.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use sim_runtime::{
    decode_snapshot, encode_export_part, encode_snapshot, ExportHeader, ExportPart, RunMetadata,
    SnapshotCodecError, TickSnapshot,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Codec(#[from] SnapshotCodecError),
    #[error("tick {got} recorded after tick {last}")]
    NonMonotonic { last: u64, got: u64 },
    #[error("no snapshot recorded for tick {0}")]
    MissingTick(u64),
    #[error("failed to write export part {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to measure tick {tick} for export: {source}")]
    Measure {
        tick: u64,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
struct StoredTick {
    tick: u64,
    bytes: Vec<u8>,
}

/// One compressed export part, ready to be written out.
#[derive(Debug, Clone)]
pub struct EncodedPart {
    pub header: ExportHeader,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    records: Vec<StoredTick>,
    compression_level: i32,
    bytes_stored: usize,
}

impl SnapshotHistory {
    pub fn new(compression_level: i32) -> Self {
        Self {
            records: Vec::new(),
            compression_level,
            bytes_stored: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bytes_stored(&self) -> usize {
        self.bytes_stored
    }

    pub fn first_tick(&self) -> Option<u64> {
        self.records.first().map(|record| record.tick)
    }

    pub fn latest_tick(&self) -> Option<u64> {
        self.records.last().map(|record| record.tick)
    }

    pub fn ticks(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.iter().map(|record| record.tick)
    }

    /// Append a snapshot; ticks must strictly increase. Returns the stored size.
    pub fn record(&mut self, snapshot: &TickSnapshot) -> Result<usize, HistoryError> {
        if let Some(last) = self.latest_tick() {
            if snapshot.tick <= last {
                return Err(HistoryError::NonMonotonic {
                    last,
                    got: snapshot.tick,
                });
            }
        }
        let bytes = encode_snapshot(snapshot, self.compression_level)?;
        let size = bytes.len();
        self.bytes_stored += size;
        self.records.push(StoredTick {
            tick: snapshot.tick,
            bytes,
        });
        Ok(size)
    }

    /// Decode the snapshot recorded for `tick`.
    pub fn at(&self, tick: u64) -> Result<TickSnapshot, HistoryError> {
        let index = self
            .records
            .binary_search_by_key(&tick, |record| record.tick)
            .map_err(|_| HistoryError::MissingTick(tick))?;
        Ok(decode_snapshot(&self.records[index].bytes)?)
    }

    pub fn latest(&self) -> Result<Option<TickSnapshot>, HistoryError> {
        self.latest_tick().map(|tick| self.at(tick)).transpose()
    }

    /// Split the log into parts whose uncompressed tick payload stays under
    /// `max_part_bytes`. A single tick larger than the cap gets a part of its own.
    pub fn export_parts(
        &self,
        run: &RunMetadata,
        max_part_bytes: usize,
    ) -> Result<Vec<EncodedPart>, HistoryError> {
        let mut groups: Vec<Vec<TickSnapshot>> = Vec::new();
        let mut current: Vec<TickSnapshot> = Vec::new();
        let mut current_bytes = 0usize;
        for record in &self.records {
            let snapshot = decode_snapshot(&record.bytes)?;
            let size = serde_json::to_vec(&snapshot)
                .map_err(|source| HistoryError::Measure {
                    tick: record.tick,
                    source,
                })?
                .len();
            if !current.is_empty() && current_bytes + size > max_part_bytes {
                groups.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes += size;
            current.push(snapshot);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        let part_count = groups.len() as u32;
        groups
            .into_iter()
            .enumerate()
            .map(|(index, ticks)| {
                let header = ExportHeader {
                    tick_range_start: ticks.first().map(|t| t.tick).unwrap_or_default(),
                    tick_range_end: ticks.last().map(|t| t.tick).unwrap_or_default(),
                    part_index: index as u32,
                    part_count,
                    run: run.clone(),
                };
                let part = ExportPart {
                    header: header.clone(),
                    ticks,
                };
                let bytes = encode_export_part(&part, self.compression_level)?;
                Ok(EncodedPart { header, bytes })
            })
            .collect()
    }

    /// Write every part to `dir` as `{prefix}_partNNN.json.zst`.
    pub fn write_export(
        &self,
        dir: &Path,
        prefix: &str,
        run: &RunMetadata,
        max_part_bytes: usize,
    ) -> Result<Vec<PathBuf>, HistoryError> {
        fs::create_dir_all(dir).map_err(|source| HistoryError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut written = Vec::new();
        for part in self.export_parts(run, max_part_bytes)? {
            let path = dir.join(format!("{prefix}_part{:03}.json.zst", part.header.part_index));
            fs::write(&path, &part.bytes).map_err(|source| HistoryError::Write {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        info!(
            target: "tileworld::history",
            parts = written.len(),
            ticks = self.len(),
            "history.exported"
        );
        Ok(written)
    }
}
