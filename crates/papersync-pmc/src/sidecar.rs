//! Per-article metadata sidecar (`PubMedCentral-<PMID>-v2.json`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::efetch::MetadataRecord;
use crate::path::StoragePath;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarAuthor {
    pub surname: String,
    #[serde(rename = "given-names")]
    pub given_names: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarDate {
    pub day: String,
    pub month: String,
    pub year: String,
}

/// On-disk sidecar document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub title: String,
    pub author: Vec<SidecarAuthor>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub identifier: Vec<SidecarIdentifier>,
    pub date: SidecarDate,
    pub license: Option<String>,
    pub path: String,
    pub entryfile: String,
    pub files: Option<Vec<String>>,
    #[serde(rename = "path-type")]
    pub path_type: String,
    #[serde(rename = "compression-type")]
    pub compression_type: String,
}

impl Sidecar {
    pub fn new(record: &MetadataRecord, pmcid: &str, doi: &str, path: &StoragePath) -> Self {
        let (year, month, day) = record.date.parts();
        let identifier = [("pmid", record.pmid.as_str()), ("doi", doi), ("pmcid", pmcid)]
            .into_iter()
            .map(|(kind, id)| SidecarIdentifier {
                kind: kind.to_string(),
                id: id.to_string(),
            })
            .collect();

        Self {
            title: record.title.clone(),
            author: record
                .authors
                .iter()
                .map(|a| SidecarAuthor {
                    surname: a.surname.clone(),
                    given_names: a.given_names.clone(),
                })
                .collect(),
            abstract_text: record.abstract_text.clone(),
            identifier,
            date: SidecarDate { day, month, year },
            license: None,
            path: path.to_string(),
            entryfile: "main.nxml".to_string(),
            files: None,
            path_type: "/".to_string(),
            compression_type: "tgz".to_string(),
        }
    }
}

/// `metadata/<a>/<b>/PubMedCentral-<pmid>-v2.json`
pub fn sidecar_path(metadata_dir: &Path, path: &StoragePath, pmid: &str) -> PathBuf {
    path.under(metadata_dir)
        .join(format!("PubMedCentral-{pmid}-v2.json"))
}

/// Write `sidecar` to `dest` via a temporary file in the same directory.
pub fn write_sidecar(dest: &Path, sidecar: &Sidecar) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(sidecar).map_err(std::io::Error::other)?;
    let tmp = dest.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efetch::{Author, PublicationDate};

    fn record() -> MetadataRecord {
        MetadataRecord {
            pmid: "11250746".into(),
            title: "A title".into(),
            abstract_text: "An abstract.".into(),
            date: PublicationDate {
                year: Some(2001),
                month: Some(4),
                day: None,
            },
            authors: vec![Author {
                surname: "Smith".into(),
                given_names: "Jane".into(),
            }],
        }
    }

    fn storage() -> StoragePath {
        StoragePath {
            segment_a: "08".into(),
            segment_b: "e0".into(),
        }
    }

    #[test]
    fn json_shape() {
        let sidecar = Sidecar::new(&record(), "PMC13900", "10.1186/bcr271", &storage());
        let value = serde_json::to_value(&sidecar).unwrap();

        assert_eq!(value["title"], "A title");
        assert_eq!(value["abstract"], "An abstract.");
        assert_eq!(value["author"][0]["surname"], "Smith");
        assert_eq!(value["author"][0]["given-names"], "Jane");
        assert_eq!(value["identifier"][0]["type"], "pmid");
        assert_eq!(value["identifier"][0]["id"], "11250746");
        assert_eq!(value["identifier"][1]["id"], "10.1186/bcr271");
        assert_eq!(value["identifier"][2]["id"], "PMC13900");
        assert_eq!(value["date"]["year"], "2001");
        assert_eq!(value["date"]["month"], "04");
        assert_eq!(value["date"]["day"], "01");
        assert!(value["license"].is_null());
        assert!(value["files"].is_null());
        assert_eq!(value["path"], "08/e0");
        assert_eq!(value["entryfile"], "main.nxml");
        assert_eq!(value["path-type"], "/");
        assert_eq!(value["compression-type"], "tgz");
    }

    #[test]
    fn written_under_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let dest = sidecar_path(dir.path(), &storage(), "11250746");
        assert_eq!(
            dest,
            dir.path().join("08/e0/PubMedCentral-11250746-v2.json")
        );

        let sidecar = Sidecar::new(&record(), "PMC13900", "10.1186/bcr271", &storage());
        write_sidecar(&dest, &sidecar).unwrap();

        let back: Sidecar = serde_json::from_slice(&std::fs::read(&dest).unwrap()).unwrap();
        assert_eq!(back, sidecar);
        assert!(!dest.with_extension("json.tmp").exists());
    }

    #[test]
    fn rewrite_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let dest = sidecar_path(dir.path(), &storage(), "11250746");
        let mut sidecar = Sidecar::new(&record(), "PMC13900", "10.1186/bcr271", &storage());
        write_sidecar(&dest, &sidecar).unwrap();
        sidecar.title = "Corrected".into();
        write_sidecar(&dest, &sidecar).unwrap();

        let back: Sidecar = serde_json::from_slice(&std::fs::read(&dest).unwrap()).unwrap();
        assert_eq!(back.title, "Corrected");
    }
}
