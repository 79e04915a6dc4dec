use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::SraSection;
use crate::domain::{SraAccession, TaxonomyId};
use crate::error::GenomaError;
use crate::store::{Store, accession_shard_path};

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Filters applied on top of the organism: RNA, Illumina, paired reads in a
/// read-length window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPolicy {
    pub min_read_length: u32,
    pub max_read_length: u32,
}

impl From<&SraSection> for SearchPolicy {
    fn from(section: &SraSection) -> Self {
        Self {
            min_read_length: section.min_read_length,
            max_read_length: section.max_read_length,
        }
    }
}

pub fn build_search_term(taxonomy_id: &TaxonomyId, policy: SearchPolicy) -> String {
    format!(
        "txid{taxonomy_id}[Organism:noexp] AND biomol rna[Properties] AND platform illumina[Properties] AND {}:{}[ReadLength] AND \"paired\"[Layout]",
        policy.min_read_length, policy.max_read_length
    )
}

pub trait EutilsClient: Send + Sync {
    fn search(&self, term: &str, retmax: u32) -> Result<String, GenomaError>;
    fn fetch(&self, id: &str) -> Result<String, GenomaError>;
}

#[derive(Clone)]
pub struct EutilsHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl EutilsHttpClient {
    pub fn new() -> Result<Self, GenomaError> {
        Self::with_base_url(EUTILS_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, GenomaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("genoma/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GenomaError::EutilsHttp(err.to_string()))?,
        );
        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| GenomaError::EutilsHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get_text(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String, GenomaError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self.send_with_retries(|| {
            let mut request = self.client.get(&url).query(query);
            if let Some(key) = &self.api_key {
                request = request.query(&[("api_key", key.as_str())]);
            }
            request
        })?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| GenomaError::EutilsHttp(err.to_string()))?;
        if !status.is_success() {
            return Err(GenomaError::EutilsStatus {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, GenomaError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 400;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(GenomaError::EutilsHttp(err.to_string()));
                }
            }
        }
    }
}

impl EutilsClient for EutilsHttpClient {
    fn search(&self, term: &str, retmax: u32) -> Result<String, GenomaError> {
        self.get_text(
            "esearch.fcgi",
            &[
                ("db", "sra".to_string()),
                ("term", term.to_string()),
                ("retmax", retmax.to_string()),
            ],
        )
    }

    fn fetch(&self, id: &str) -> Result<String, GenomaError> {
        self.get_text(
            "efetch.fcgi",
            &[("db", "sra".to_string()), ("id", id.to_string())],
        )
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Deserialize)]
struct SearchResultXml {
    #[serde(rename = "IdList", default)]
    id_list: IdListXml,
}

#[derive(Debug, Default, Deserialize)]
struct IdListXml {
    #[serde(rename = "Id", default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExperimentPackageSetXml {
    #[serde(rename = "EXPERIMENT_PACKAGE", default)]
    packages: Vec<ExperimentPackageXml>,
}

#[derive(Debug, Deserialize)]
struct ExperimentPackageXml {
    #[serde(rename = "RUN_SET", default)]
    run_sets: Vec<RunSetXml>,
}

#[derive(Debug, Deserialize)]
struct RunSetXml {
    #[serde(rename = "RUN", default)]
    runs: Vec<RunXml>,
}

#[derive(Debug, Deserialize)]
struct RunXml {
    #[serde(rename = "@accession")]
    accession: Option<String>,
}

pub fn parse_search_ids(xml: &str) -> Result<Vec<String>, GenomaError> {
    let parsed: SearchResultXml = quick_xml::de::from_str(xml)
        .map_err(|err| GenomaError::EutilsParse(format!("eSearchResult: {err}")))?;
    Ok(parsed
        .id_list
        .ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}

pub fn extract_run_accessions(xml: &str) -> Result<Vec<SraAccession>, GenomaError> {
    let parsed: ExperimentPackageSetXml = quick_xml::de::from_str(xml)
        .map_err(|err| GenomaError::EutilsParse(format!("EXPERIMENT_PACKAGE_SET: {err}")))?;
    let mut accessions = Vec::new();
    for run in parsed
        .packages
        .into_iter()
        .flat_map(|package| package.run_sets)
        .flat_map(|run_set| run_set.runs)
    {
        let Some(raw) = run.accession else {
            continue;
        };
        match raw.parse::<SraAccession>() {
            Ok(accession) => {
                if !accessions.contains(&accession) {
                    accessions.push(accession);
                }
            }
            Err(err) => warn!(error = %err, "dropping run accession"),
        }
    }
    Ok(accessions)
}

/// What is written for each accession. Never rewritten once present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessionRecord {
    pub accession: SraAccession,
    pub taxonomy_id: TaxonomyId,
    pub fetch_id: String,
    pub shard_path: String,
    pub fetched_at: String,
    pub metadata_xml: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessionAction {
    Written,
    Existing,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessionEntry {
    pub accession: SraAccession,
    pub path: String,
    pub action: AccessionAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxonAccessions {
    pub taxonomy_id: TaxonomyId,
    pub term: String,
    pub fetch_ids: usize,
    pub accessions: Vec<AccessionEntry>,
}

pub struct AccessionCataloger<C: EutilsClient> {
    client: C,
    root: Utf8PathBuf,
    chunk_size: usize,
    retmax: u32,
    policy: SearchPolicy,
}

impl<C: EutilsClient> AccessionCataloger<C> {
    pub fn new(client: C, root: Utf8PathBuf, section: &SraSection) -> Self {
        Self {
            client,
            root,
            chunk_size: section.chunk_size,
            retmax: section.retmax,
            policy: SearchPolicy::from(section),
        }
    }

    pub fn root(&self) -> &Utf8PathBuf {
        &self.root
    }

    pub fn catalog_accessions_for(
        &self,
        taxonomy_id: &TaxonomyId,
        cancel: &CancellationToken,
    ) -> Result<TaxonAccessions, GenomaError> {
        let term = build_search_term(taxonomy_id, self.policy);
        info!(taxonomy_id = %taxonomy_id, "searching SRA");
        let ids = parse_search_ids(&self.client.search(&term, self.retmax)?)?;
        debug!(taxonomy_id = %taxonomy_id, ids = ids.len(), "search returned");

        let mut accessions = Vec::new();
        for fetch_id in &ids {
            cancel.check()?;
            let xml = self.client.fetch(fetch_id)?;
            for accession in extract_run_accessions(&xml)? {
                let entry = self.persist(taxonomy_id, fetch_id, &accession, &xml)?;
                accessions.push(entry);
            }
        }

        Ok(TaxonAccessions {
            taxonomy_id: taxonomy_id.clone(),
            term,
            fetch_ids: ids.len(),
            accessions,
        })
    }

    fn persist(
        &self,
        taxonomy_id: &TaxonomyId,
        fetch_id: &str,
        accession: &SraAccession,
        xml: &str,
    ) -> Result<AccessionEntry, GenomaError> {
        let path = accession_shard_path(&self.root, accession, self.chunk_size);
        if path.as_std_path().exists() {
            debug!(accession = %accession, "accession already cataloged");
            return Ok(AccessionEntry {
                accession: accession.clone(),
                path: path.to_string(),
                action: AccessionAction::Existing,
            });
        }
        let record = AccessionRecord {
            accession: accession.clone(),
            taxonomy_id: taxonomy_id.clone(),
            fetch_id: fetch_id.to_string(),
            shard_path: path.to_string(),
            fetched_at: Utc::now().to_rfc3339(),
            metadata_xml: xml.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&path, &bytes)?;
        Ok(AccessionEntry {
            accession: accession.clone(),
            path: path.to_string(),
            action: AccessionAction::Written,
        })
    }
}
