use std::fs;
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{AssemblyIdentity, FileRole, SraAccession};
use crate::error::GenomaError;

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyFiles {
    pub dir: Utf8PathBuf,
    pub sequence_archive: Utf8PathBuf,
    pub annotation_archive: Utf8PathBuf,
    pub sequence: Utf8PathBuf,
    pub annotation: Utf8PathBuf,
    pub index_prefix: Utf8PathBuf,
    pub converted_annotation: Utf8PathBuf,
    pub splice_sites: Utf8PathBuf,
}

impl AssemblyFiles {
    pub fn archive(&self, role: FileRole) -> &Utf8Path {
        match role {
            FileRole::Sequence => &self.sequence_archive,
            FileRole::Annotation => &self.annotation_archive,
        }
    }

    /// First index file for small and large genomes respectively.
    pub fn index_markers(&self) -> [Utf8PathBuf; 2] {
        ["ht2", "ht2l"].map(|ext| Utf8PathBuf::from(format!("{}.1.{ext}", self.index_prefix)))
    }
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn assembly_dir(&self, identity: &AssemblyIdentity) -> Utf8PathBuf {
        self.root
            .join("assemblies")
            .join(identity.name_segment())
            .join(&identity.assembly_id)
    }

    pub fn assembly_files(&self, identity: &AssemblyIdentity) -> AssemblyFiles {
        let dir = self.assembly_dir(identity);
        let base = identity.key();
        let file = |ext: &str| dir.join(format!("{base}.{ext}"));
        AssemblyFiles {
            sequence_archive: file("fa.gz"),
            annotation_archive: file("gff3.gz"),
            sequence: file("fa"),
            annotation: file("gff3"),
            index_prefix: dir.join(&base),
            converted_annotation: file("gtf"),
            splice_sites: file("splice_sites.txt"),
            dir,
        }
    }

    pub fn ensure_root(&self) -> Result<(), GenomaError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| GenomaError::Filesystem(err.to_string()))
    }

    pub fn is_populated(path: &Utf8Path) -> bool {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    pub fn file_size(path: &Utf8Path) -> Option<u64> {
        fs::metadata(path.as_std_path()).ok().map(|meta| meta.len())
    }

    pub fn remove_if_present(path: &Utf8Path) -> Result<bool, GenomaError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(GenomaError::Filesystem(format!("remove {path}: {err}"))),
        }
    }

    /// Removes every `<prefix>.<n>.ht2` and `<prefix>.<n>.ht2l` beside `prefix`.
    pub fn remove_index_files(prefix: &Utf8Path) -> Result<usize, GenomaError> {
        let (Some(dir), Some(stem)) = (prefix.parent(), prefix.file_name()) else {
            return Ok(0);
        };
        let entries = match dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(GenomaError::Filesystem(format!("list {dir}: {err}"))),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|err| GenomaError::Filesystem(err.to_string()))?;
            if is_index_part(entry.file_name(), stem) && Self::remove_if_present(entry.path())? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GenomaError> {
        let mut reader = content;
        Self::write_stream_atomic(path, &mut reader).map(|_| ())
    }

    pub fn write_stream_atomic(path: &Utf8Path, reader: &mut dyn Read) -> Result<u64, GenomaError> {
        let parent = path
            .parent()
            .ok_or_else(|| GenomaError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".genoma-part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        let written = io::copy(reader, temp.as_file_mut())
            .map_err(|err| GenomaError::Filesystem(format!("write {path}: {err}")))?;
        temp.as_file_mut()
            .flush()
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

fn is_index_part(name: &str, stem: &str) -> bool {
    let Some(rest) = name.strip_prefix(stem).and_then(|rest| rest.strip_prefix('.')) else {
        return false;
    };
    let Some(number) = rest
        .strip_suffix(".ht2")
        .or_else(|| rest.strip_suffix(".ht2l"))
    else {
        return false;
    };
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}

/// Splits an accession into its three-letter prefix followed by full-size
/// chunks of the numeric part. Anything after `_` and any trailing partial
/// chunk are dropped.
pub fn chunk_accession(accession: &str, chunk_size: usize) -> Vec<String> {
    let split = accession
        .char_indices()
        .nth(3)
        .map(|(idx, _)| idx)
        .unwrap_or(accession.len());
    let (letters, numbers) = accession.split_at(split);
    let numbers = numbers.split('_').next().unwrap_or_default();

    let mut out = vec![letters.to_string()];
    if chunk_size == 0 {
        return out;
    }
    let chars: Vec<char> = numbers.chars().collect();
    out.extend(
        chars
            .chunks(chunk_size)
            .filter(|chunk| chunk.len() == chunk_size)
            .map(|chunk| chunk.iter().collect::<String>()),
    );
    out
}

pub fn accession_shard_path(
    root: &Utf8Path,
    accession: &SraAccession,
    chunk_size: usize,
) -> Utf8PathBuf {
    let mut path = root.to_path_buf();
    for segment in chunk_accession(accession.as_str(), chunk_size) {
        path.push(segment);
    }
    path.push(format!("{accession}.json"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_drops_trailing_partial() {
        assert_eq!(
            chunk_accession("SRR1234567", 2),
            vec!["SRR", "12", "34", "56"]
        );
    }

    #[test]
    fn chunk_ignores_underscore_suffix() {
        assert_eq!(chunk_accession("ERR1234_1", 2), vec!["ERR", "12", "34"]);
        assert_eq!(chunk_accession("ERR12345_1", 2), vec!["ERR", "12", "34"]);
        assert_eq!(chunk_accession("SRR123456", 3), vec!["SRR", "123", "456"]);
    }

    #[test]
    fn shard_path_layout() {
        let acc: SraAccession = "SRR1234567".parse().unwrap();
        let path = accession_shard_path(Utf8Path::new("/sra"), &acc, 2);
        assert_eq!(path, "/sra/SRR/12/34/56/SRR1234567.json");
    }

    #[test]
    fn assembly_layout() {
        let store = Store::new(Utf8PathBuf::from("/data"));
        let identity = AssemblyIdentity::new("Oryza", "sativa", None, "IRGSP-1.0");
        let files = store.assembly_files(&identity);
        assert_eq!(files.dir, "/data/assemblies/Oryza_sativa/IRGSP-1.0");
        assert!(files.sequence_archive.ends_with("Oryza_sativa-IRGSP-1.0.fa.gz"));
        assert!(files.splice_sites.ends_with("Oryza_sativa-IRGSP-1.0.splice_sites.txt"));
        let [small, large] = files.index_markers();
        assert_eq!(
            small,
            "/data/assemblies/Oryza_sativa/IRGSP-1.0/Oryza_sativa-IRGSP-1.0.1.ht2"
        );
        assert_eq!(
            large,
            "/data/assemblies/Oryza_sativa/IRGSP-1.0/Oryza_sativa-IRGSP-1.0.1.ht2l"
        );
    }

    #[test]
    fn index_cleanup_spares_other_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let prefix = root.join("Zea_mays-AGPv4");
        for name in [
            "Zea_mays-AGPv4.1.ht2",
            "Zea_mays-AGPv4.2.ht2l",
            "Zea_mays-AGPv4.fa",
            "Zea_mays-AGPv4.gtf",
            "Zea_mays-AGPv40.1.ht2",
        ] {
            Store::write_bytes_atomic(&root.join(name), b"x").unwrap();
        }

        assert_eq!(Store::remove_index_files(&prefix).unwrap(), 2);
        assert!(!root.join("Zea_mays-AGPv4.1.ht2").exists());
        assert!(!root.join("Zea_mays-AGPv4.2.ht2l").exists());
        assert!(root.join("Zea_mays-AGPv4.fa").exists());
        assert!(root.join("Zea_mays-AGPv4.gtf").exists());
        assert!(root.join("Zea_mays-AGPv40.1.ht2").exists());
        assert_eq!(Store::remove_index_files(&root.join("missing/x")).unwrap(), 0);
    }

    #[test]
    fn atomic_write_and_population() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("nested").join("file.txt");
        assert!(!Store::is_populated(&path));
        Store::write_bytes_atomic(&path, b"hello").unwrap();
        assert!(Store::is_populated(&path));
        assert_eq!(Store::file_size(&path), Some(5));
    }
}
