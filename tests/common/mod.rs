#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};

use genoma::error::GenomaError;
use genoma::remote::RemoteTree;
use genoma::store::Store;

pub fn dir_line(name: &str) -> String {
    format!("drwxr-xr-x    2 ftp      ftp          4096 Jan 13  2015 {name}")
}

pub fn file_line(name: &str, size: u64) -> String {
    format!("-rw-r--r--    1 ftp      ftp      {size:>8} Jun 22  2018 {name}")
}

/// Remote tree held in memory. Listings are keyed by directory path with a
/// trailing `/`; every `list` call is recorded.
#[derive(Default)]
pub struct MemoryRemote {
    listings: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    pub listed: Vec<String>,
    pub fetched: Vec<String>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, path: &str, lines: Vec<String>) -> Self {
        self.listings.insert(path.to_string(), lines);
        self
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.insert(path.to_string(), content.to_vec());
        self
    }

    pub fn fail_listing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }
}

impl RemoteTree for MemoryRemote {
    fn list(&mut self, directory: &str) -> Result<Vec<String>, GenomaError> {
        self.listed.push(directory.to_string());
        if self.failing.contains(directory) {
            return Err(GenomaError::RemoteListing {
                path: directory.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(self.listings.get(directory).cloned().unwrap_or_default())
    }

    fn fetch(&mut self, path: &str, destination: &Utf8Path) -> Result<u64, GenomaError> {
        self.fetched.push(path.to_string());
        let content = self.files.get(path).ok_or_else(|| GenomaError::RemoteFetch {
            path: path.to_string(),
            message: "550 no such file".to_string(),
        })?;
        Store::write_bytes_atomic(destination, content)?;
        Ok(content.len() as u64)
    }
}

/// A plants-like release with one complete assembly, one partial one, an
/// ignored directory and a few files that must not become records.
pub fn ensembl_tree() -> MemoryRemote {
    MemoryRemote::new()
        .dir(
            "/pub/plants/release-41/fasta/",
            vec![
                "total 8".to_string(),
                dir_line("oryza_sativa"),
                dir_line("zea_mays"),
            ],
        )
        .dir(
            "/pub/plants/release-41/fasta/oryza_sativa/",
            vec![dir_line("cdna"), dir_line("dna")],
        )
        .dir(
            "/pub/plants/release-41/fasta/oryza_sativa/cdna/",
            vec![file_line("Oryza_sativa.IRGSP-1.0.cdna.all.fa.gz", 10)],
        )
        .dir(
            "/pub/plants/release-41/fasta/oryza_sativa/dna/",
            vec![
                file_line("CHECKSUMS", 120),
                file_line("Oryza_sativa.IRGSP-1.0.dna.chromosome.1.fa.gz", 300),
                file_line("Oryza_sativa.IRGSP-1.0.dna.toplevel.fa.gz", 11),
            ],
        )
        .dir(
            "/pub/plants/release-41/fasta/zea_mays/",
            vec![dir_line("dna")],
        )
        .dir(
            "/pub/plants/release-41/fasta/zea_mays/dna/",
            vec![file_line("Zea_mays.B73_RefGen_v4.dna.toplevel.fa.gz", 7)],
        )
        .dir(
            "/pub/plants/release-41/gff3/",
            vec![dir_line("oryza_sativa")],
        )
        .dir(
            "/pub/plants/release-41/gff3/oryza_sativa/",
            vec![
                file_line("Oryza_sativa.IRGSP-1.0.41.abinitio.gff3.gz", 50),
                file_line("Oryza_sativa.IRGSP-1.0.41.chr.gff3.gz", 40),
                file_line("Oryza_sativa.IRGSP-1.0.41.gff3.gz", 13),
                file_line("README", 2),
            ],
        )
        .file(
            "/pub/plants/release-41/fasta/oryza_sativa/dna/Oryza_sativa.IRGSP-1.0.dna.toplevel.fa.gz",
            b"rice-genome",
        )
        .file(
            "/pub/plants/release-41/gff3/oryza_sativa/Oryza_sativa.IRGSP-1.0.41.gff3.gz",
            b"rice-annotate",
        )
}

pub fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}
