use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::GenomaError;

pub const CONFIG_FILE: &str = "genoma.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub ensembl: EnsemblSection,
    #[serde(default)]
    pub taxonomy: TaxonomySection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub sra: SraSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnsemblSection {
    pub ftp_host: String,
    pub release: String,
    pub kingdoms: Vec<String>,
    pub roots: Option<Vec<String>>,
    pub ignored_dirs: Vec<String>,
    pub sequence_suffix: String,
    pub annotation_suffix: String,
    pub excluded_substrings: Vec<String>,
    pub max_depth: usize,
}

impl Default for EnsemblSection {
    fn default() -> Self {
        Self {
            ftp_host: "ftp.ensemblgenomes.org:21".to_string(),
            release: "release-41".to_string(),
            kingdoms: vec![
                "plants".to_string(),
                "fungi".to_string(),
                "metazoa".to_string(),
                "protists".to_string(),
            ],
            roots: None,
            ignored_dirs: vec![
                "cdna".to_string(),
                "cds".to_string(),
                "dna_index".to_string(),
                "ncrna".to_string(),
                "pep".to_string(),
            ],
            sequence_suffix: ".dna.toplevel.fa.gz".to_string(),
            annotation_suffix: ".gff3.gz".to_string(),
            excluded_substrings: vec![
                "abinitio".to_string(),
                ".chr.".to_string(),
                "chr_patch".to_string(),
                ".chromosome.".to_string(),
                ".nonchromosomal.".to_string(),
                ".scaffold.".to_string(),
            ],
            max_depth: 32,
        }
    }
}

impl EnsemblSection {
    /// Explicit roots win; otherwise one fasta and one gff3 root per kingdom.
    pub fn crawl_roots(&self) -> Vec<String> {
        if let Some(roots) = &self.roots {
            return roots.clone();
        }
        self.kingdoms
            .iter()
            .flat_map(|kingdom| {
                ["fasta", "gff3"]
                    .into_iter()
                    .map(move |kind| format!("/pub/{kingdom}/{}/{kind}/", self.release))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaxonomySection {
    pub table_path: Option<String>,
    pub download_url: String,
}

impl Default for TaxonomySection {
    fn default() -> Self {
        Self {
            table_path: None,
            download_url: "https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdmp.zip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSection {
    pub workers: usize,
    pub index_threads: usize,
    pub gzip: String,
    pub hisat2_build: String,
    pub gffread: String,
    pub extract_splice_sites: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: 0,
            index_threads: 4,
            gzip: "gzip".to_string(),
            hisat2_build: "hisat2-build".to_string(),
            gffread: "gffread".to_string(),
            extract_splice_sites: "hisat2_extract_splice_sites.py".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SraSection {
    pub output_root: Option<String>,
    pub chunk_size: usize,
    pub retmax: u32,
    pub min_read_length: u32,
    pub max_read_length: u32,
}

impl Default for SraSection {
    fn default() -> Self {
        Self {
            output_root: None,
            chunk_size: 2,
            retmax: 100_000,
            min_read_length: 100,
            max_read_length: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub storage_root: Utf8PathBuf,
    pub catalog_path: Utf8PathBuf,
    pub sra_root: Utf8PathBuf,
    pub taxonomy_table: Utf8PathBuf,
    pub ensembl: EnsemblSection,
    pub taxonomy: TaxonomySection,
    pub pipeline: PipelineSection,
    pub sra: SraSection,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GenomaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(GenomaError::ConfigRead(config_path));
            }
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GenomaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GenomaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GenomaError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let storage_root = match config.storage_root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_storage_root()?,
        };
        let catalog_path = config
            .catalog_path
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| storage_root.join("catalog.sqlite3"));
        let sra_root = config
            .sra
            .output_root
            .clone()
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| storage_root.join("SRA"));
        let taxonomy_table = config
            .taxonomy
            .table_path
            .clone()
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| storage_root.join("taxonomy").join("taxdmp.zip"));

        if config.sra.chunk_size == 0 {
            return Err(GenomaError::ConfigParse(
                "sra.chunk_size must be at least 1".to_string(),
            ));
        }
        if config.sra.min_read_length > config.sra.max_read_length {
            return Err(GenomaError::ConfigParse(
                "sra.min_read_length exceeds sra.max_read_length".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            storage_root,
            catalog_path,
            sra_root,
            taxonomy_table,
            ensembl: config.ensembl,
            taxonomy: config.taxonomy,
            pipeline: config.pipeline,
            sra: config.sra,
        })
    }
}

fn default_storage_root() -> Result<Utf8PathBuf, GenomaError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("genoma")).ok()
        })
        .ok_or_else(|| GenomaError::Filesystem("unable to resolve storage directory".to_string()))
}
