//! PMC synchronizer configuration

use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// Upstream per-call limit shared by the ID converter and efetch
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Runtime configuration for one synchronization run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root data directory (articles/, metadata/, oa_files/, config.json)
    pub data_dir: PathBuf,
    /// OA web service "updates since" endpoint
    pub feed_url: String,
    /// PMC ID converter endpoint
    pub idconv_url: String,
    /// E-utilities efetch endpoint
    pub efetch_url: String,
    pub idconv_batch_size: usize,
    pub efetch_batch_size: usize,
    /// Legacy behavior: treat the first feed page as the whole update set
    pub single_page: bool,
    /// Feed format tags that are never downloaded
    pub skip_formats: Vec<String>,
    /// `tool` parameter sent with every upstream request
    pub tool: String,
    /// Scheme payload locations are rewritten to before download
    pub payload_scheme: String,
    /// Contact email overriding the one stored in the state file
    pub email: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("PMCData"),
            feed_url: "https://www.ncbi.nlm.nih.gov/pmc/utils/oa/oa.fcgi".to_string(),
            idconv_url: "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/".to_string(),
            efetch_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi".to_string(),
            idconv_batch_size: DEFAULT_BATCH_SIZE,
            efetch_batch_size: DEFAULT_BATCH_SIZE,
            single_page: false,
            skip_formats: vec!["pdf".to_string()],
            tool: "papersync".to_string(),
            payload_scheme: "https".to_string(),
            email: None,
        }
    }
}

impl SyncConfig {
    pub fn layout(&self) -> Layout {
        Layout::new(&self.data_dir)
    }

    /// Request identity: the configured email wins over `stored`
    pub fn contact(&self, stored: &str) -> Contact {
        let email = match self.email.as_deref() {
            Some(email) if !email.trim().is_empty() => email.trim(),
            _ => stored,
        };
        Contact {
            tool: self.tool.clone(),
            email: email.to_string(),
        }
    }

    /// Reject values a run cannot start with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.idconv_batch_size == 0 || self.efetch_batch_size == 0 {
            return Err(SyncError::InvalidConfig(format!(
                "batch sizes must be positive (idconv {}, efetch {})",
                self.idconv_batch_size, self.efetch_batch_size
            )));
        }
        for url in [&self.feed_url, &self.idconv_url, &self.efetch_url] {
            endpoint_url(url, &[])?;
        }
        Ok(())
    }

    /// Whether records carrying this format tag are processed at all
    pub fn is_downloadable(&self, format: &str) -> bool {
        !self
            .skip_formats
            .iter()
            .any(|skip| skip.eq_ignore_ascii_case(format))
    }
}

/// Paths inside the data directory.
#[derive(Debug, Clone)]
pub struct Layout {
    pub articles_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub index_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub state_path: PathBuf,
}

impl Layout {
    pub fn new(data_dir: &Path) -> Self {
        let oa_files = data_dir.join("oa_files");
        Self {
            articles_dir: data_dir.join("articles"),
            metadata_dir: data_dir.join("metadata"),
            index_path: oa_files.join("article_listing.csv"),
            quarantine_path: oa_files.join("bad_article_listing.csv"),
            state_path: data_dir.join("config.json"),
        }
    }
}

/// Caller identity appended to upstream requests (NCBI usage policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub tool: String,
    pub email: String,
}

impl Contact {
    pub fn query_pairs(&self) -> [(&'static str, &str); 2] {
        [("tool", self.tool.as_str()), ("email", self.email.as_str())]
    }
}

/// `base` with `params` appended as a URL-encoded query string
pub fn endpoint_url(base: &str, params: &[(&str, &str)]) -> Result<String, SyncError> {
    reqwest::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| SyncError::InvalidConfig(format!("{base}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.idconv_batch_size, 200);
        assert_eq!(config.efetch_batch_size, 200);
        assert!(!config.single_page);
        assert!(config.feed_url.starts_with("https://"));
    }

    #[test]
    fn pdf_is_not_downloadable() {
        let config = SyncConfig::default();
        assert!(!config.is_downloadable("pdf"));
        assert!(!config.is_downloadable("PDF"));
        assert!(config.is_downloadable("tgz"));
    }

    #[test]
    fn contact_override() {
        let mut config = SyncConfig::default();
        assert_eq!(config.contact("stored@example.org").email, "stored@example.org");
        config.email = Some("cli@example.org".into());
        let contact = config.contact("stored@example.org");
        assert_eq!(contact.email, "cli@example.org");
        assert_eq!(contact.tool, "papersync");
        config.email = Some("  ".into());
        assert_eq!(config.contact("stored@example.org").email, "stored@example.org");
    }

    #[test]
    fn layout_paths() {
        let layout = Layout::new(Path::new("/data"));
        assert_eq!(layout.articles_dir, PathBuf::from("/data/articles"));
        assert_eq!(
            layout.index_path,
            PathBuf::from("/data/oa_files/article_listing.csv")
        );
        assert_eq!(
            layout.quarantine_path,
            PathBuf::from("/data/oa_files/bad_article_listing.csv")
        );
        assert_eq!(layout.state_path, PathBuf::from("/data/config.json"));
    }

    #[test]
    fn endpoint_url_encodes_params() {
        let contact = Contact {
            tool: "papersync".into(),
            email: "ops@example.org".into(),
        };
        let mut params = vec![("ids", "PMC1,PMC2")];
        params.extend(contact.query_pairs());
        let url = endpoint_url("https://example.org/idconv/", &params).unwrap();
        assert_eq!(
            url,
            "https://example.org/idconv/?ids=PMC1%2CPMC2&tool=papersync&email=ops%40example.org"
        );
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let config = SyncConfig {
            efetch_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn endpoint_url_rejects_garbage() {
        assert!(matches!(
            endpoint_url("not a url", &[]),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
