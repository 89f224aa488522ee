//! Append-only index and quarantine logs
//!
//! Both are comma-separated text, one record per line, and are never
//! truncated or rewritten. Fields that contain a comma or quote are quoted.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::idconv::QuarantineReason;
use crate::path::StoragePath;

/// `pmcid,a/b,YYYYMMDD,pmid,doi`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub pmcid: String,
    pub path: StoragePath,
    /// Normalized date, empty when the record carries no year
    pub date: String,
    pub pmid: String,
    pub doi: String,
}

impl IndexEntry {
    pub fn record(&self) -> [String; 5] {
        [
            self.pmcid.clone(),
            self.path.to_string(),
            self.date.clone(),
            self.pmid.clone(),
            self.doi.clone(),
        ]
    }
}

/// `pmcid,reason`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineEntry {
    pub pmcid: String,
    pub reason: QuarantineReason,
}

impl QuarantineEntry {
    pub fn record(&self) -> [&str; 2] {
        [self.pmcid.as_str(), self.reason.code()]
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> io::Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| io::Error::other(e.to_string()))
}

/// Encode records as CSV lines, each ending in `\n`.
pub fn encode_lines<I, R, F>(records: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut writer = csv_writer();
    for record in records {
        writer.write_record(record)?;
    }
    finish(writer)
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn csv_reader(path: &Path) -> io::Result<Option<csv::Reader<File>>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(Some(
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file),
    ))
}

/// Quarantine log. Each entry is written and flushed as soon as it is known.
#[derive(Debug)]
pub struct QuarantineSink {
    file: File,
    path: PathBuf,
    written: usize,
}

impl QuarantineSink {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            file,
            path,
            written: 0,
        })
    }

    pub fn append(&mut self, entry: &QuarantineEntry) -> io::Result<()> {
        self.file.write_all(&encode_lines([entry.record()])?)?;
        self.file.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Entries appended through this handle
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Index log. Entries are staged in memory and reach disk only on `commit`,
/// in one append followed by fsync.
///
/// A PMCID already present in the index is never appended again, so a run
/// that committed its index but failed to save the watermark can be retried
/// without duplicating lines.
#[derive(Debug)]
pub struct IndexSink {
    path: PathBuf,
    staged: Vec<IndexEntry>,
}

impl IndexSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staged: Vec::new(),
        }
    }

    pub fn stage(&mut self, entry: IndexEntry) {
        self.staged.push(entry);
    }

    pub fn staged(&self) -> &[IndexEntry] {
        &self.staged
    }

    /// Append staged entries not yet indexed, returning how many were written.
    pub fn commit(self) -> io::Result<usize> {
        if self.staged.is_empty() {
            return Ok(0);
        }
        let mut known = indexed_ids(&self.path)?;
        let fresh: Vec<&IndexEntry> = self
            .staged
            .iter()
            .filter(|e| known.insert(e.pmcid.clone()))
            .collect();
        let skipped = self.staged.len() - fresh.len();
        if skipped > 0 {
            log::info!("{skipped} entries already indexed, not appended again");
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let block = encode_lines(fresh.iter().map(|e| e.record()))?;
        let mut file = open_append(&self.path)?;
        file.write_all(&block)?;
        file.sync_all()?;
        Ok(fresh.len())
    }
}

/// PMCIDs (first field) already in the index; a missing file is empty.
pub fn indexed_ids(path: &Path) -> io::Result<HashSet<String>> {
    let mut ids = HashSet::new();
    let Some(mut reader) = csv_reader(path)? else {
        return Ok(ids);
    };
    for record in reader.records() {
        if let Some(id) = record?.get(0).filter(|id| !id.is_empty()) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// Records in a log file; a missing file counts as empty.
pub fn count_entries(path: &Path) -> io::Result<usize> {
    let Some(mut reader) = csv_reader(path)? else {
        return Ok(0);
    };
    let mut count = 0;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pmcid: &str) -> IndexEntry {
        IndexEntry {
            pmcid: pmcid.into(),
            path: StoragePath {
                segment_a: "08".into(),
                segment_b: "e0".into(),
            },
            date: "20010412".into(),
            pmid: "11250746".into(),
            doi: "10.1186/bcr271".into(),
        }
    }

    fn line(e: &IndexEntry) -> String {
        String::from_utf8(encode_lines([e.record()]).unwrap()).unwrap()
    }

    #[test]
    fn index_line_format() {
        assert_eq!(
            line(&entry("PMC13900")),
            "PMC13900,08/e0,20010412,11250746,10.1186/bcr271\n"
        );
    }

    #[test]
    fn index_line_quotes_comma_in_doi() {
        let mut e = entry("PMC13901");
        e.doi = "10.1000/a,b".into();
        let text = line(&e);
        assert_eq!(
            text,
            "PMC13901,08/e0,20010412,11250746,\"10.1000/a,b\"\n"
        );

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(text.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.len(), 5);
        assert_eq!(&record[4], e.doi);
    }

    #[test]
    fn quarantine_line_format() {
        let q = QuarantineEntry {
            pmcid: "PMC13902".into(),
            reason: QuarantineReason::MissingTertiaryId,
        };
        assert_eq!(
            String::from_utf8(encode_lines([q.record()]).unwrap()).unwrap(),
            "PMC13902,MissingTertiaryID\n"
        );
    }

    #[test]
    fn index_nothing_on_disk_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oa_files/article_listing.csv");

        let mut sink = IndexSink::new(&path);
        sink.stage(entry("PMC1"));
        sink.stage(entry("PMC2"));
        assert_eq!(sink.staged().len(), 2);
        assert!(!path.exists());

        // Dropping without commit writes nothing
        drop(sink);
        assert!(!path.exists());
    }

    #[test]
    fn index_commit_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oa_files/article_listing.csv");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "PMC0,00/00,20000101,1,10.1/0\n").unwrap();

        let mut sink = IndexSink::new(&path);
        sink.stage(entry("PMC1"));
        sink.stage(entry("PMC2"));
        assert_eq!(sink.commit().unwrap(), 2);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PMC0,"));
        assert!(lines[2].starts_with("PMC2,"));
        assert_eq!(count_entries(&path).unwrap(), 3);
    }

    #[test]
    fn commit_skips_already_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article_listing.csv");

        let mut first = IndexSink::new(&path);
        first.stage(entry("PMC1"));
        first.stage(entry("PMC2"));
        assert_eq!(first.commit().unwrap(), 2);

        let mut again = IndexSink::new(&path);
        again.stage(entry("PMC2"));
        again.stage(entry("PMC3"));
        again.stage(entry("PMC3"));
        assert_eq!(again.commit().unwrap(), 1);

        assert_eq!(count_entries(&path).unwrap(), 3);
        let ids = indexed_ids(&path).unwrap();
        assert!(ids.contains("PMC1") && ids.contains("PMC2") && ids.contains("PMC3"));
    }

    #[test]
    fn empty_commit_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article_listing.csv");
        assert_eq!(IndexSink::new(&path).commit().unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn quarantine_appends_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oa_files/bad_article_listing.csv");

        let mut sink = QuarantineSink::open(&path).unwrap();
        sink.append(&QuarantineEntry {
            pmcid: "PMC5".into(),
            reason: QuarantineReason::MissingSecondaryId,
        })
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "PMC5,MissingSecondaryID\n");

        sink.append(&QuarantineEntry {
            pmcid: "PMC6".into(),
            reason: QuarantineReason::MissingTertiaryId,
        })
        .unwrap();
        assert_eq!(sink.written(), 2);
        assert_eq!(count_entries(sink.path()).unwrap(), 2);
    }

    #[test]
    fn count_ignores_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_article_listing.csv");
        fs::write(&path, "PMC5,MissingSecondaryID\n\nPMC6,MissingTertiaryID\n").unwrap();
        assert_eq!(count_entries(&path).unwrap(), 2);
    }

    #[test]
    fn count_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(count_entries(&dir.path().join("nope.csv")).unwrap(), 0);
    }
}
