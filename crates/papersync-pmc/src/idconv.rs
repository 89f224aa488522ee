//! PMC ID converter: PMCID → (DOI, PMID)
//!
//! Response shape:
//!
//! ```text
//! <pmcids status="ok">
//!   <record requested-id="PMC13900" pmcid="PMC13900" pmid="11250746" doi="10.1186/bcr271"/>
//!   <record requested-id="PMC99" status="error" errmsg="invalid article id"/>
//! </pmcids>
//! ```

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use papersync_core::Transport;

use crate::config::{Contact, SyncConfig, endpoint_url};
use crate::error::SyncError;
use crate::sink::{QuarantineEntry, QuarantineSink};

/// Why a record was excluded from materialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuarantineReason {
    /// No DOI in the converter response
    MissingSecondaryId,
    /// DOI present, but no PMID
    MissingTertiaryId,
}

impl QuarantineReason {
    /// Code written to the quarantine log
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingSecondaryId => "MissingSecondaryID",
            Self::MissingTertiaryId => "MissingTertiaryID",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "MissingSecondaryID" => Some(Self::MissingSecondaryId),
            "MissingTertiaryID" => Some(Self::MissingTertiaryId),
            _ => None,
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of cross-referencing one PMCID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Resolved {
        pmcid: String,
        /// Secondary identifier
        doi: String,
        /// Tertiary identifier
        pmid: String,
    },
    Quarantined {
        pmcid: String,
        reason: QuarantineReason,
    },
}

impl ResolutionResult {
    pub fn pmcid(&self) -> &str {
        match self {
            Self::Resolved { pmcid, .. } | Self::Quarantined { pmcid, .. } => pmcid,
        }
    }
}

/// One `<record>` of a converter response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRecord {
    pub requested_id: String,
    pub pmcid: String,
    pub pmid: String,
    pub doi: String,
    pub status: String,
    pub errmsg: String,
}

impl IdRecord {
    /// Classify: DOI first, then PMID
    pub fn classify(&self, pmcid: &str) -> ResolutionResult {
        let pmcid = pmcid.to_string();
        if self.doi.trim().is_empty() {
            ResolutionResult::Quarantined {
                pmcid,
                reason: QuarantineReason::MissingSecondaryId,
            }
        } else if self.pmid.trim().is_empty() {
            ResolutionResult::Quarantined {
                pmcid,
                reason: QuarantineReason::MissingTertiaryId,
            }
        } else {
            ResolutionResult::Resolved {
                pmcid,
                doi: self.doi.trim().to_string(),
                pmid: self.pmid.trim().to_string(),
            }
        }
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr.context("bad attribute")?;
        if attr.key.as_ref() == name {
            return Ok(attr.unescape_value()?.into_owned());
        }
    }
    Ok(String::new())
}

fn parse_record(e: &BytesStart<'_>) -> Result<IdRecord> {
    Ok(IdRecord {
        requested_id: attr(e, b"requested-id")?,
        pmcid: attr(e, b"pmcid")?,
        pmid: attr(e, b"pmid")?,
        doi: attr(e, b"doi")?,
        status: attr(e, b"status")?,
        errmsg: attr(e, b"errmsg")?,
    })
}

/// Parse a converter response into its records.
pub fn parse_idconv_xml(xml: &[u8]) -> Result<Vec<IdRecord>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).context("XML parse error")? {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"pmcids" => {
                    saw_root = true;
                    let status = attr(&e, b"status")?;
                    anyhow::ensure!(
                        status.is_empty() || status == "ok",
                        "converter status {status:?}"
                    );
                }
                b"record" => records.push(parse_record(&e)?),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    anyhow::ensure!(saw_root, "missing <pmcids> root element");
    Ok(records)
}

/// Align response records to the requested ids and classify each.
///
/// Records are matched by `requested-id`, falling back to `pmcid`; a
/// requested id with no record is a malformed response.
pub fn classify_batch(
    requested: &[String],
    records: Vec<IdRecord>,
) -> Result<Vec<ResolutionResult>, SyncError> {
    let mut by_id: HashMap<String, IdRecord> = HashMap::with_capacity(records.len());
    for record in records {
        let key = if record.requested_id.is_empty() {
            record.pmcid.clone()
        } else {
            record.requested_id.clone()
        };
        by_id.entry(key).or_insert(record);
    }

    requested
        .iter()
        .map(|pmcid| {
            by_id
                .get(pmcid)
                .map(|record| record.classify(pmcid))
                .ok_or_else(|| {
                    SyncError::CrossReferenceMalformed(format!("no record for {pmcid}"))
                })
        })
        .collect()
}

/// Resolves batches of PMCIDs through the ID converter.
pub struct CrossReferencer<'a, T: Transport> {
    transport: &'a T,
    config: &'a SyncConfig,
    contact: &'a Contact,
}

impl<'a, T: Transport> CrossReferencer<'a, T> {
    pub fn new(transport: &'a T, config: &'a SyncConfig, contact: &'a Contact) -> Self {
        Self {
            transport,
            config,
            contact,
        }
    }

    pub fn batch_url(&self, batch: &[String]) -> Result<String, SyncError> {
        let ids = batch.join(",");
        let mut params = vec![
            ("ids", ids.as_str()),
            ("idtype", "pmcid"),
            ("versions", "no"),
        ];
        params.extend(self.contact.query_pairs());
        endpoint_url(&self.config.idconv_url, &params)
    }

    /// One result per input id, same order. Quarantined ids are appended to
    /// `quarantine` before this returns, so later failures cannot lose them.
    pub fn resolve(
        &self,
        batch: &[String],
        quarantine: &mut QuarantineSink,
    ) -> Result<Vec<ResolutionResult>, SyncError> {
        let url = self.batch_url(batch)?;
        let body = self
            .transport
            .get_body(&url)
            .map_err(SyncError::CrossReferenceUnavailable)?;
        let records = parse_idconv_xml(&body)
            .map_err(|e| SyncError::CrossReferenceMalformed(format!("{e:#}")))?;
        let results = classify_batch(batch, records)?;

        for result in &results {
            if let ResolutionResult::Quarantined { pmcid, reason } = result {
                log::warn!("{pmcid}: quarantined ({reason})");
                quarantine.append(&QuarantineEntry {
                    pmcid: pmcid.clone(),
                    reason: *reason,
                })?;
            }
        }
        Ok(results)
    }
}
