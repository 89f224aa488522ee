//! E-utilities efetch: PMID → bibliographic metadata
//!
//! Streaming parser for the subset of `PubmedArticleSet` XML the sidecar
//! and index need.

use std::collections::HashMap;

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::Event;

use papersync_core::Transport;

use crate::config::{Contact, SyncConfig, endpoint_url};
use crate::error::SyncError;

/// Structured publication date. Parts the record does not carry are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PublicationDate {
    /// `YYYYMMDD`; missing month/day become `01`, no year yields `""`
    pub fn normalized(&self) -> String {
        match self.year {
            Some(year) => format!(
                "{year:04}{:02}{:02}",
                self.month.unwrap_or(1),
                self.day.unwrap_or(1)
            ),
            None => String::new(),
        }
    }

    /// `(year, month, day)` as zero-padded strings, empty when there is no year
    pub fn parts(&self) -> (String, String, String) {
        match self.year {
            Some(year) => (
                format!("{year:04}"),
                format!("{:02}", self.month.unwrap_or(1)),
                format!("{:02}", self.day.unwrap_or(1)),
            ),
            None => Default::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.year.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub surname: String,
    pub given_names: String,
}

/// Bibliographic detail for one resolved record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    /// Tertiary identifier the record was fetched by
    pub pmid: String,
    pub title: String,
    pub abstract_text: String,
    pub date: PublicationDate,
    pub authors: Vec<Author>,
}

#[derive(Default)]
struct Dates {
    completed: PublicationDate,
    published: PublicationDate,
}

/// Parse every `<PubmedArticle>` in an efetch response.
pub fn parse_efetch_xml(xml: &[u8]) -> Result<Vec<MetadataRecord>> {
    let mut reader = Reader::from_reader(xml);

    let mut records = Vec::new();
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).context("XML parse error")? {
            Event::Start(e) => match e.name().as_ref() {
                b"PubmedArticleSet" => saw_root = true,
                b"PubmedArticle" => records.push(parse_article(&mut reader)?),
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"PubmedArticleSet" => saw_root = true,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    anyhow::ensure!(saw_root, "missing <PubmedArticleSet> root element");
    Ok(records)
}

fn parse_article(reader: &mut Reader<&[u8]>) -> Result<MetadataRecord> {
    let mut record = MetadataRecord::default();
    let mut dates = Dates::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"MedlineCitation" => parse_medline_citation(reader, &mut record, &mut dates)?,
                b"PubmedData" => skip_element(reader, b"PubmedData")?,
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"PubmedArticle" => break,
            Event::Eof => anyhow::bail!("unterminated <PubmedArticle>"),
            _ => {}
        }
        buf.clear();
    }

    anyhow::ensure!(!record.pmid.is_empty(), "<PubmedArticle> without PMID");
    record.date = if dates.completed.is_empty() {
        dates.published
    } else {
        dates.completed
    };
    Ok(record)
}

fn parse_medline_citation(
    reader: &mut Reader<&[u8]>,
    record: &mut MetadataRecord,
    dates: &mut Dates,
) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"PMID" => record.pmid = read_text(reader)?,
                b"DateCompleted" => dates.completed = parse_date(reader, b"DateCompleted")?,
                b"Article" => parse_article_element(reader, record, dates)?,
                // Cited articles carry their own <PMID>
                b"CommentsCorrectionsList" => skip_element(reader, b"CommentsCorrectionsList")?,
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"MedlineCitation" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_article_element(
    reader: &mut Reader<&[u8]>,
    record: &mut MetadataRecord,
    dates: &mut Dates,
) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Journal" => dates.published = parse_journal(reader)?,
                b"ArticleTitle" => record.title = read_text_content(reader, b"ArticleTitle")?,
                b"Abstract" => record.abstract_text = parse_abstract(reader)?,
                b"AuthorList" => record.authors = parse_author_list(reader)?,
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"Article" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_journal(reader: &mut Reader<&[u8]>) -> Result<PublicationDate> {
    let mut date = PublicationDate::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"PubDate" => {
                date = parse_date(reader, b"PubDate")?;
            }
            Event::End(e) if e.name().as_ref() == b"Journal" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(date)
}

/// Year/Month/Day children of `end_tag`. `<MedlineDate>1998 Dec-1999 Jan</MedlineDate>`
/// contributes its leading year only.
fn parse_date(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<PublicationDate> {
    let mut date = PublicationDate::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Year" => date.year = read_text(reader)?.parse().ok(),
                b"Month" => date.month = parse_month(&read_text(reader)?),
                b"Day" => date.day = read_text(reader)?.parse().ok(),
                b"MedlineDate" => {
                    let text = read_text(reader)?;
                    if date.year.is_none() {
                        date.year = text.get(..4).and_then(|y| y.parse().ok());
                    }
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == end_tag => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(date)
}

fn parse_month(s: &str) -> Option<u32> {
    match s.parse::<u32>() {
        Ok(n) if (1..=12).contains(&n) => Some(n),
        Ok(_) => None,
        Err(_) => match s.to_lowercase().get(..3)? {
            "jan" => Some(1),
            "feb" => Some(2),
            "mar" => Some(3),
            "apr" => Some(4),
            "may" => Some(5),
            "jun" => Some(6),
            "jul" => Some(7),
            "aug" => Some(8),
            "sep" => Some(9),
            "oct" => Some(10),
            "nov" => Some(11),
            "dec" => Some(12),
            _ => None,
        },
    }
}

fn parse_abstract(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text_parts = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"AbstractText" => {
                let text = read_text_content(reader, b"AbstractText")?;
                if !text.is_empty() {
                    text_parts.push(text);
                }
            }
            Event::End(e) if e.name().as_ref() == b"Abstract" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(text_parts.join(" "))
}

fn parse_author_list(reader: &mut Reader<&[u8]>) -> Result<Vec<Author>> {
    let mut authors = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"Author" => {
                authors.push(parse_author(reader)?);
            }
            Event::End(e) if e.name().as_ref() == b"AuthorList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(authors)
}

/// A collective author's name is carried as its surname
fn parse_author(reader: &mut Reader<&[u8]>) -> Result<Author> {
    let mut author = Author::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"LastName" => author.surname = read_text(reader)?,
                b"ForeName" => author.given_names = read_text(reader)?,
                b"CollectiveName" => {
                    author.surname = read_text_content(reader, b"CollectiveName")?
                }
                b"AffiliationInfo" => skip_element(reader, b"AffiliationInfo")?,
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"Author" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(author)
}

fn skip_element(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && e.name().as_ref() == end_tag {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Text of a leaf element, whitespace-collapsed
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(_) => break,
            Event::Start(_) => text.push_str(&read_text(reader)?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(collapse_whitespace(&text))
}

/// Text of `end_tag` with inline markup (`<i>`, `<sup>`, ...) flattened
fn read_text_content(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && e.name().as_ref() == end_tag {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(collapse_whitespace(&text))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Put parsed records in request order. Every requested PMID must be present.
pub fn align_to_request(
    requested: &[String],
    records: Vec<MetadataRecord>,
) -> Result<Vec<MetadataRecord>, SyncError> {
    let by_pmid: HashMap<String, MetadataRecord> = records
        .into_iter()
        .map(|record| (record.pmid.clone(), record))
        .collect();

    requested
        .iter()
        .map(|pmid| {
            by_pmid
                .get(pmid)
                .cloned()
                .ok_or_else(|| SyncError::MetadataMalformed(format!("no article for PMID {pmid}")))
        })
        .collect()
}

/// Fetches batches of PMIDs through efetch.
pub struct MetadataFetcher<'a, T: Transport> {
    transport: &'a T,
    config: &'a SyncConfig,
    contact: &'a Contact,
}

impl<'a, T: Transport> MetadataFetcher<'a, T> {
    pub fn new(transport: &'a T, config: &'a SyncConfig, contact: &'a Contact) -> Self {
        Self {
            transport,
            config,
            contact,
        }
    }

    pub fn batch_url(&self, batch: &[String]) -> Result<String, SyncError> {
        let ids = batch.join(",");
        let mut params = vec![("db", "pubmed"), ("retmode", "xml"), ("id", ids.as_str())];
        params.extend(self.contact.query_pairs());
        endpoint_url(&self.config.efetch_url, &params)
    }

    /// One record per input PMID, same order. The batch succeeds or fails whole.
    pub fn fetch(&self, batch: &[String]) -> Result<Vec<MetadataRecord>, SyncError> {
        let url = self.batch_url(batch)?;
        let body = self
            .transport
            .get_body(&url)
            .map_err(SyncError::MetadataUnavailable)?;
        let records =
            parse_efetch_xml(&body).map_err(|e| SyncError::MetadataMalformed(format!("{e:#}")))?;
        align_to_request(batch, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">11250746</PMID>
      <DateCompleted>
        <Year>2001</Year>
        <Month>04</Month>
        <Day>12</Day>
      </DateCompleted>
      <Article PubModel="Print-Electronic">
        <Journal>
          <JournalIssue CitedMedium="Print">
            <PubDate><Year>2000</Year><Month>Nov</Month></PubDate>
          </JournalIssue>
        </Journal>
        <ArticleTitle>Role of <i>HER2</i> in breast   cancer &amp; beyond</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">First part.</AbstractText>
          <AbstractText Label="RESULTS">Second <sup>2</sup> part.</AbstractText>
        </Abstract>
        <AuthorList CompleteYN="Y">
          <Author ValidYN="Y">
            <LastName>Smith</LastName>
            <ForeName>Jane A</ForeName>
            <Initials>JA</Initials>
            <AffiliationInfo><Affiliation>Somewhere</Affiliation></AffiliationInfo>
          </Author>
          <Author ValidYN="Y">
            <CollectiveName>Breast Cancer Study Group</CollectiveName>
          </Author>
        </AuthorList>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections RefType="Cites">
          <RefSource>Nature. 1999</RefSource>
          <PMID Version="1">99999999</PMID>
        </CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">11250746</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">11250747</PMID>
      <Article>
        <Journal>
          <JournalIssue>
            <PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate>
          </JournalIssue>
        </Journal>
        <ArticleTitle>Second article</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    fn parsed() -> Vec<MetadataRecord> {
        parse_efetch_xml(SAMPLE_XML.as_bytes()).unwrap()
    }

    #[test]
    fn parse_basic_fields() {
        let records = parsed();
        assert_eq!(records.len(), 2);
        let r = &records[0];
        assert_eq!(r.pmid, "11250746");
        assert_eq!(r.title, "Role of HER2 in breast cancer & beyond");
        assert_eq!(r.abstract_text, "First part. Second 2 part.");
    }

    #[test]
    fn cited_pmid_does_not_override() {
        assert_eq!(parsed()[0].pmid, "11250746");
    }

    #[test]
    fn parse_authors() {
        let authors = &parsed()[0].authors;
        assert_eq!(authors.len(), 2);
        assert_eq!(authors[0].surname, "Smith");
        assert_eq!(authors[0].given_names, "Jane A");
        assert_eq!(authors[1].surname, "Breast Cancer Study Group");
        assert_eq!(authors[1].given_names, "");
    }

    #[test]
    fn date_completed_preferred() {
        assert_eq!(parsed()[0].date.normalized(), "20010412");
    }

    #[test]
    fn pub_date_fallback() {
        let r = &parsed()[1];
        assert_eq!(r.date.year, Some(1998));
        assert_eq!(r.date.normalized(), "19980101");
        assert_eq!(r.abstract_text, "");
        assert!(r.authors.is_empty());
    }

    #[test]
    fn normalized_dates() {
        let date = |year, month, day| PublicationDate { year, month, day };
        assert_eq!(date(Some(2024), Some(3), Some(5)).normalized(), "20240305");
        assert_eq!(date(Some(2024), None, None).normalized(), "20240101");
        assert_eq!(date(Some(2024), Some(11), None).normalized(), "20241101");
        assert_eq!(date(None, Some(3), Some(5)).normalized(), "");
        assert_eq!(
            date(Some(2024), Some(3), None).parts(),
            ("2024".into(), "03".into(), "01".into())
        );
    }

    #[test]
    fn parse_month_names() {
        assert_eq!(parse_month("Jan"), Some(1));
        assert_eq!(parse_month("dec"), Some(12));
        assert_eq!(parse_month("September"), Some(9));
        assert_eq!(parse_month("07"), Some(7));
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month("Spring"), None);
        assert_eq!(parse_month(""), None);
    }

    #[test]
    fn align_reorders() {
        let requested = vec!["11250747".to_string(), "11250746".to_string()];
        let aligned = align_to_request(&requested, parsed()).unwrap();
        assert_eq!(aligned[0].pmid, "11250747");
        assert_eq!(aligned[1].pmid, "11250746");
    }

    #[test]
    fn align_missing_pmid_is_malformed() {
        let requested = vec!["11250746".to_string(), "1".to_string()];
        let err = align_to_request(&requested, parsed()).unwrap_err();
        assert!(matches!(err, SyncError::MetadataMalformed(_)));
    }

    #[test]
    fn rejects_non_pubmed_document() {
        assert!(parse_efetch_xml(b"<eFetchResult><ERROR>bad</ERROR></eFetchResult>").is_err());
    }

    #[test]
    fn article_without_pmid_rejected() {
        let xml = "<PubmedArticleSet><PubmedArticle><MedlineCitation>\
                   </MedlineCitation></PubmedArticle></PubmedArticleSet>";
        assert!(parse_efetch_xml(xml.as_bytes()).is_err());
    }
}
