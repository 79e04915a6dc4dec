use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use camino::Utf8Path;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::catalog::FieldUpdate;
use crate::domain::{AssemblyRecord, FieldValue, RecordField, TaxonomyId};
use crate::error::GenomaError;
use crate::store::Store;

const NAMES_ENTRY: &str = "names.dmp";
const SCIENTIFIC_NAME: &str = "scientific name";

#[derive(Debug, Clone, Default)]
pub struct TaxonomyTable {
    names: BTreeMap<String, TaxonomyId>,
}

impl TaxonomyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: TaxonomyId) {
        self.names.insert(normalize(name), id);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn load(path: &Utf8Path) -> Result<Self, GenomaError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| GenomaError::TaxonomyTable(format!("open {path}: {err}")))?;
        let table = match path.extension() {
            Some("zip") => {
                let mut archive = ZipArchive::new(file)
                    .map_err(|err| GenomaError::TaxonomyTable(err.to_string()))?;
                let entry = archive
                    .by_name(NAMES_ENTRY)
                    .map_err(|err| GenomaError::TaxonomyTable(format!("{NAMES_ENTRY}: {err}")))?;
                Self::from_reader(entry)?
            }
            Some("gz") => Self::from_reader(GzDecoder::new(file))?,
            _ => Self::from_reader(file)?,
        };
        info!(path = %path, names = table.len(), "taxonomy table loaded");
        Ok(table)
    }

    /// Parses `names.dmp` rows: `tax_id\t|\tname\t|\tunique name\t|\tclass\t|`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GenomaError> {
        let mut table = Self::new();
        for line in BufReader::new(reader).lines() {
            let line = line.map_err(|err| GenomaError::TaxonomyTable(err.to_string()))?;
            let columns: Vec<&str> = line.split('|').map(str::trim).collect();
            if columns.len() < 4 || columns[3] != SCIENTIFIC_NAME {
                continue;
            }
            match columns[0].parse::<TaxonomyId>() {
                Ok(id) => table.insert(columns[1], id),
                Err(_) => debug!(line = %line, "skipping taxonomy row with bad id"),
            }
        }
        Ok(table)
    }

    /// Case-insensitive lookup. An exact match wins; otherwise the shortest
    /// name that starts with `species_name`.
    pub fn resolve(&self, species_name: &str) -> Option<&TaxonomyId> {
        let needle = normalize(species_name);
        if needle.is_empty() {
            return None;
        }
        if let Some(id) = self.names.get(&needle) {
            return Some(id);
        }
        self.names
            .range(needle.clone()..)
            .take_while(|(name, _)| name.starts_with(&needle))
            .min_by_key(|(name, _)| name.len())
            .map(|(_, id)| id)
    }

    pub fn resolve_all(&self, records: &[AssemblyRecord]) -> Vec<(String, Vec<FieldUpdate>)> {
        let mut missed = HashSet::new();
        let mut updates = Vec::new();
        for record in records {
            let species = record.identity().species_name();
            match self.resolve(&species) {
                Some(id) if record.taxonomy_id.as_deref() != Some(id.as_str()) => {
                    updates.push((
                        record.key(),
                        vec![(RecordField::TaxonomyId, FieldValue::text(id.as_str()))],
                    ));
                }
                Some(_) => {}
                None => {
                    if missed.insert(species.clone()) {
                        warn!(species = %species, "no taxonomy id found");
                    }
                }
            }
        }
        updates
    }
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub trait TaxonomyClient: Send + Sync {
    fn download_table(&self, url: &str, destination: &Utf8Path) -> Result<u64, GenomaError>;
}

#[derive(Clone)]
pub struct TaxdumpHttpClient {
    client: Client,
}

impl TaxdumpHttpClient {
    pub fn new() -> Result<Self, GenomaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("genoma/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GenomaError::TaxonomyHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| GenomaError::TaxonomyHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl TaxonomyClient for TaxdumpHttpClient {
    fn download_table(&self, url: &str, destination: &Utf8Path) -> Result<u64, GenomaError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| GenomaError::TaxonomyHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GenomaError::TaxonomyHttp(format!(
                "{url} returned status {}",
                response.status().as_u16()
            )));
        }
        info!(url, destination = %destination, "downloading taxonomy dump");
        Store::write_stream_atomic(destination, &mut response)
    }
}

pub fn load_or_download<C: TaxonomyClient + ?Sized>(
    client: &C,
    path: &Utf8Path,
    url: &str,
) -> Result<TaxonomyTable, GenomaError> {
    if !Store::is_populated(path) {
        client.download_table(url, path)?;
    }
    TaxonomyTable::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: &str = "\
4530\t|\tOryza sativa\t|\t\t|\tscientific name\t|
4530\t|\trice\t|\t\t|\tgenbank common name\t|
39947\t|\tOryza sativa Japonica Group\t|\t\t|\tscientific name\t|
4577\t|\tZea mays\t|\t\t|\tscientific name\t|
";

    fn table() -> TaxonomyTable {
        TaxonomyTable::from_reader(NAMES.as_bytes()).unwrap()
    }

    #[test]
    fn keeps_scientific_names_only() {
        let table = table();
        assert_eq!(table.len(), 3);
        assert!(table.resolve("rice").is_none());
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert_eq!(table().resolve("oryza SATIVA").unwrap().as_str(), "4530");
    }

    #[test]
    fn prefix_match_prefers_shortest() {
        assert_eq!(table().resolve("Oryza sat").unwrap().as_str(), "4530");
        assert_eq!(table().resolve("zea").unwrap().as_str(), "4577");
    }
}
