//! Artifact persistence
//!
//! All artifacts are JSON, gzip-compressed on write. Readers sniff the magic
//! bytes and accept gzip, xz (the badge study's own archives) or plain JSON.
//! Writes go to a temporary file that is renamed into place, so a failed
//! shift never leaves a partial file.

use crate::combine::{MomentRecords, OccupancyHistory};
use crate::error::TraceError;
use crate::ingest::RawFeed;
use crate::shifts::ShiftTable;
use crate::stamp::TimestampStyle;
use crate::types::{ContactInterval, TupleRow};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use xz2::read::XzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

/// Directory layout of a run's outputs
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn intervals_dir(&self) -> PathBuf {
        self.root.join("contact_intervals")
    }

    pub fn histories_dir(&self) -> PathBuf {
        self.root.join("histories")
    }

    pub fn intervals_path(&self, shift: usize) -> PathBuf {
        self.intervals_dir().join(format!("intervals{shift:02}.json.gz"))
    }

    pub fn history_path(&self, shift: usize) -> PathBuf {
        self.histories_dir().join(format!("histories{shift:02}.json.gz"))
    }
}

/// Serialize `value` as gzip-compressed JSON, atomically replacing `path`
pub fn write_json_gz<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    level: u32,
) -> Result<(), TraceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TraceError::Config(format!("not a file path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| -> Result<(), TraceError> {
        let writer = BufWriter::new(File::create(&tmp)?);
        let mut encoder = GzEncoder::new(writer, Compression::new(level));
        serde_json::to_writer(&mut encoder, value)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read JSON from `path`: gzip, xz or uncompressed
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TraceError> {
    let mut reader = BufReader::new(File::open(path)?);
    let head = reader.fill_buf()?;
    let (is_gzip, is_xz) = (head.starts_with(&GZIP_MAGIC), head.starts_with(&XZ_MAGIC));
    let value = if is_gzip {
        serde_json::from_reader(BufReader::new(GzDecoder::new(reader)))?
    } else if is_xz {
        serde_json::from_reader(BufReader::new(XzDecoder::new(reader)))?
    } else {
        serde_json::from_reader(reader)?
    };
    Ok(value)
}

/// Load and partition the raw badge feed
pub fn read_raw_feed(
    path: &Path,
    style: TimestampStyle,
    table: &ShiftTable,
) -> Result<RawFeed, TraceError> {
    let rows: Vec<TupleRow> = read_json(path)?;
    info!(path = %path.display(), rows = rows.len(), "loaded raw feed");
    RawFeed::from_rows(rows, style, table)
}

pub fn write_intervals(
    path: &Path,
    intervals: &[ContactInterval],
    style: TimestampStyle,
    level: u32,
) -> Result<(), TraceError> {
    let rows: Vec<TupleRow> = intervals.iter().map(|i| i.to_row(style)).collect();
    write_json_gz(path, &rows, level)?;
    info!(path = %path.display(), intervals = rows.len(), "saved contact intervals");
    Ok(())
}

pub fn read_intervals(
    path: &Path,
    style: TimestampStyle,
) -> Result<Vec<ContactInterval>, TraceError> {
    let rows: Vec<TupleRow> = read_json(path)?;
    rows.into_iter()
        .map(|row| ContactInterval::from_row(row, style))
        .collect()
}

pub fn write_history(
    path: &Path,
    history: &OccupancyHistory,
    style: TimestampStyle,
    level: u32,
) -> Result<(), TraceError> {
    write_json_gz(path, &history.to_ordered(style), level)?;
    info!(path = %path.display(), seconds = history.len(), "saved occupancy history");
    Ok(())
}

pub fn read_history(path: &Path, style: TimestampStyle) -> Result<OccupancyHistory, TraceError> {
    let ordered: IndexMap<String, MomentRecords> = read_json(path)?;
    OccupancyHistory::from_ordered(ordered, style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;
    use xz2::write::XzEncoder;

    fn interval(badge: &str, other: &str, second: u32) -> ContactInterval {
        ContactInterval {
            badge: badge.into(),
            other: other.into(),
            start: NaiveDate::from_ymd_opt(2023, 4, 18)
                .unwrap()
                .and_hms_opt(8, 0, second)
                .unwrap(),
            distance_in: 40,
            duration_s: 15,
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("/data");
        assert_eq!(
            layout.intervals_path(2),
            PathBuf::from("/data/contact_intervals/intervals02.json.gz")
        );
        assert_eq!(
            layout.history_path(14),
            PathBuf::from("/data/histories/histories14.json.gz")
        );
    }

    #[test]
    fn test_intervals_written_compressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/intervals02.json.gz");
        let intervals = vec![interval("n1", "n2", 0), interval("n2", "n1", 0)];

        write_intervals(&path, &intervals, TimestampStyle::Constructor, 6).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);
        assert_eq!(
            read_intervals(&path, TimestampStyle::Constructor).unwrap(),
            intervals
        );
        // no temporary file is left behind
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_reads_plain_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fulldata.json");
        fs::write(
            &path,
            r#"[["n1", "n2", "2023-04-18T08:00:00", 40, 15],
                ["b1", "b2", "2023-04-18T08:00:00", 5, 0]]"#,
        )
        .unwrap();
        let feed = read_raw_feed(&path, TimestampStyle::Iso, &ShiftTable::default()).unwrap();
        assert_eq!(feed.summary().anchor_pairs, 1);
        assert_eq!(feed.shift(2).len(), 1);
    }

    #[test]
    fn test_reads_xz_feed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fulldata.xz");
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder
            .write_all(br#"[["n1", "n2", "datetime(2023, 4, 18, 8, 0, 1)", 40, 15]]"#)
            .unwrap();
        fs::write(&path, encoder.finish().unwrap()).unwrap();

        let feed =
            read_raw_feed(&path, TimestampStyle::Constructor, &ShiftTable::default()).unwrap();
        assert_eq!(feed.summary().rows, 1);
        let obs = &feed.shift(2)[0];
        assert_eq!(obs.badge.as_str(), "n1");
        assert_eq!(TimestampStyle::Iso.format(obs.timestamp), "2023-04-18T08:00:01");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = read_intervals(&dir.path().join("absent.json.gz"), TimestampStyle::Iso)
            .unwrap_err();
        assert!(matches!(err, TraceError::Io(_)));
    }
}
