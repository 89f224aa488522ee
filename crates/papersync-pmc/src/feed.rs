//! OA web service "updates since" feed
//!
//! A page looks like:
//!
//! ```text
//! <OA>
//!   <records returned-count="2" total-count="1500">
//!     <resumption><link token="..." href="https://...oa.fcgi?resumptionToken=..."/></resumption>
//!     <record id="PMC13900" citation="...">
//!       <link format="tgz" updated="2024-03-15 09:30:00" href="ftp://.../08/e0/PMC13900.tar.gz"/>
//!     </record>
//!   </records>
//! </OA>
//! ```
//!
//! A window with no updates answers with `<error code="...">` in place of
//! `<records>`.

use std::collections::HashSet;

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use papersync_core::Transport;

use crate::config::{SyncConfig, endpoint_url};
use crate::error::SyncError;
use crate::state::Watermark;

/// One entry of the update feed, as consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    /// Primary identifier (PMCID)
    pub pmcid: String,
    /// Format tag of the chosen link (`tgz`, `pdf`)
    pub format: String,
    /// Payload location (`ftp://host/...`)
    pub location: String,
    pub updated: String,
    pub citation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedLink {
    pub format: String,
    pub updated: String,
    pub href: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRecord {
    pub id: String,
    pub citation: String,
    pub links: Vec<FeedLink>,
}

/// Upstream `<error>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedErrorElement {
    pub code: String,
    pub message: String,
}

/// One parsed feed page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    /// Raw `returned-count` attribute
    pub returned_count: Option<String>,
    pub total_count: Option<u64>,
    pub records: Vec<FeedRecord>,
    /// Continuation href, if more pages remain
    pub resumption: Option<String>,
    pub error: Option<FeedErrorElement>,
}

impl FeedPage {
    /// Declared record count, if it is a positive integer
    pub fn declared_count(&self) -> Option<usize> {
        self.returned_count
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.context("bad attribute")?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_link(e: &BytesStart<'_>) -> Result<FeedLink> {
    Ok(FeedLink {
        format: attr(e, b"format")?.unwrap_or_default(),
        updated: attr(e, b"updated")?.unwrap_or_default(),
        href: attr(e, b"href")?.unwrap_or_default(),
    })
}

fn parse_record_start(e: &BytesStart<'_>) -> Result<FeedRecord> {
    Ok(FeedRecord {
        id: attr(e, b"id")?.unwrap_or_default(),
        citation: attr(e, b"citation")?.unwrap_or_default(),
        links: Vec::new(),
    })
}

/// Parse one feed page.
pub fn parse_feed_page(xml: &[u8]) -> Result<FeedPage> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut page = FeedPage::default();
    let mut current: Option<FeedRecord> = None;
    let mut in_resumption = false;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).context("XML parse error")? {
            Event::Start(e) => match e.name().as_ref() {
                b"OA" => saw_root = true,
                b"records" => {
                    page.returned_count = attr(&e, b"returned-count")?;
                    page.total_count = attr(&e, b"total-count")?.and_then(|s| s.parse().ok());
                }
                b"resumption" => in_resumption = true,
                b"record" => current = Some(parse_record_start(&e)?),
                b"link" => push_link(&e, in_resumption, &mut page, current.as_mut())?,
                b"error" => {
                    let code = attr(&e, b"code")?.unwrap_or_default();
                    let message = reader
                        .read_text(e.name())
                        .context("bad error element")?
                        .trim()
                        .to_string();
                    page.error = Some(FeedErrorElement { code, message });
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"link" => push_link(&e, in_resumption, &mut page, current.as_mut())?,
                b"record" => page.records.push(parse_record_start(&e)?),
                b"records" => {
                    page.returned_count = attr(&e, b"returned-count")?;
                    page.total_count = attr(&e, b"total-count")?.and_then(|s| s.parse().ok());
                }
                b"error" => {
                    page.error = Some(FeedErrorElement {
                        code: attr(&e, b"code")?.unwrap_or_default(),
                        message: String::new(),
                    });
                }
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"resumption" => in_resumption = false,
                b"record" => {
                    if let Some(record) = current.take() {
                        page.records.push(record);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    anyhow::ensure!(saw_root, "missing <OA> root element");
    Ok(page)
}

fn push_link(
    e: &BytesStart<'_>,
    in_resumption: bool,
    page: &mut FeedPage,
    current: Option<&mut FeedRecord>,
) -> Result<()> {
    if in_resumption {
        page.resumption = attr(e, b"href")?.filter(|h| !h.is_empty());
    } else if let Some(record) = current {
        record.links.push(parse_link(e)?);
    }
    Ok(())
}

impl FeedRecord {
    /// Pick the link to act on: the first downloadable one, else the first.
    pub fn into_update(
        self,
        is_downloadable: impl Fn(&str) -> bool,
    ) -> Result<UpdateRecord, SyncError> {
        let idx = self
            .links
            .iter()
            .position(|l| is_downloadable(&l.format))
            .unwrap_or(0);
        let Some(link) = self.links.into_iter().nth(idx) else {
            return Err(SyncError::FeedMalformed(format!(
                "record {} has no link",
                self.id
            )));
        };
        if self.id.is_empty() {
            return Err(SyncError::FeedMalformed(format!(
                "record without id (link {})",
                link.href
            )));
        }
        Ok(UpdateRecord {
            pmcid: self.id,
            format: link.format,
            location: link.href,
            updated: link.updated,
            citation: self.citation,
        })
    }
}

/// Drives the update feed for one run.
pub struct FeedWalker<'a, T: Transport> {
    transport: &'a T,
    config: &'a SyncConfig,
}

impl<'a, T: Transport> FeedWalker<'a, T> {
    pub fn new(transport: &'a T, config: &'a SyncConfig) -> Self {
        Self { transport, config }
    }

    /// URL of the first page for `since`
    pub fn first_page_url(&self, since: &Watermark) -> Result<String, SyncError> {
        endpoint_url(
            &self.config.feed_url,
            &[("from", since.feed_param().as_str()), ("format", "tgz")],
        )
    }

    /// Collect every update record since `since`.
    ///
    /// Follows continuation links until a page carries none, unless
    /// `single_page` is configured.
    pub fn walk(&self, since: &Watermark) -> Result<Vec<UpdateRecord>, SyncError> {
        let mut url = self.first_page_url(since)?;
        let mut visited = HashSet::new();
        let mut records = Vec::new();
        let mut page_no = 1usize;

        loop {
            let body = self
                .transport
                .get_body(&url)
                .map_err(SyncError::FeedUnavailable)?;
            let page =
                parse_feed_page(&body).map_err(|e| SyncError::FeedMalformed(format!("{e:#}")))?;

            if let Some(err) = &page.error {
                if page_no == 1 {
                    return Err(SyncError::FeedEmpty(format!(
                        "{}: {}",
                        err.code, err.message
                    )));
                }
                log::warn!("Feed page {page_no} returned {}, stopping", err.code);
                break;
            }

            let Some(count) = page.declared_count() else {
                if page_no == 1 {
                    return Err(SyncError::FeedEmpty(format!(
                        "returned-count={:?} since {since}",
                        page.returned_count
                    )));
                }
                log::info!("Feed page {page_no} is empty, traversal complete");
                break;
            };

            if page.records.len() != count {
                return Err(SyncError::FeedMalformed(format!(
                    "page {page_no} declares {count} records but carries {}",
                    page.records.len()
                )));
            }

            log::debug!(
                "Feed page {page_no}: {count} records (total {})",
                page.total_count
                    .map_or_else(|| "?".to_string(), |n| n.to_string())
            );
            for record in page.records {
                records.push(record.into_update(|f| self.config.is_downloadable(f))?);
            }

            match page.resumption {
                None => break,
                Some(_) if self.config.single_page => {
                    log::info!("Single-page mode: not following continuation after page 1");
                    break;
                }
                Some(next) => {
                    if !visited.insert(next.clone()) {
                        return Err(SyncError::FeedMalformed(format!(
                            "continuation loop at page {page_no}"
                        )));
                    }
                    url = next;
                    page_no += 1;
                }
            }
        }

        log::info!(
            "Feed: {} update records in {page_no} page(s)",
            records.len()
        );
        Ok(records)
    }
}
