mod common;

use std::fs;

use assert_matches::assert_matches;

use common::temp_root;
use genoma::config::{Config, ConfigLoader, SraSection};
use genoma::error::GenomaError;

#[test]
fn explicit_missing_file_is_an_error() {
    let (_temp, root) = temp_root();
    let path = root.join("absent.json");
    let err = ConfigLoader::resolve(Some(path.as_str())).unwrap_err();
    assert_matches!(err, GenomaError::ConfigRead(_));
}

#[test]
fn parse_config_file() {
    let (_temp, root) = temp_root();
    let path = root.join("genoma.json");
    let content = format!(
        r#"{{
            "schema_version": 1,
            "storage_root": "{root}/store",
            "ensembl": {{
                "kingdoms": ["fungi"],
                "release": "release-44",
                "ignored_dirs": ["pep"]
            }},
            "pipeline": {{ "workers": 3, "gffread": "/opt/bin/gffread" }},
            "sra": {{ "chunk_size": 3, "output_root": "{root}/runs" }}
        }}"#
    );
    fs::write(&path, content).unwrap();

    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.storage_root, root.join("store"));
    assert_eq!(resolved.catalog_path, root.join("store").join("catalog.sqlite3"));
    assert_eq!(resolved.sra_root, root.join("runs"));
    assert_eq!(
        resolved.taxonomy_table,
        root.join("store").join("taxonomy").join("taxdmp.zip")
    );
    assert_eq!(
        resolved.ensembl.crawl_roots(),
        vec!["/pub/fungi/release-44/fasta/", "/pub/fungi/release-44/gff3/"]
    );
    assert_eq!(resolved.ensembl.ignored_dirs, vec!["pep"]);
    assert_eq!(resolved.ensembl.sequence_suffix, ".dna.toplevel.fa.gz");
    assert_eq!(resolved.pipeline.workers, 3);
    assert_eq!(resolved.pipeline.gffread, "/opt/bin/gffread");
    assert_eq!(resolved.pipeline.gzip, "gzip");
    assert_eq!(resolved.sra.chunk_size, 3);
    assert_eq!(resolved.sra.retmax, 100_000);
}

#[test]
fn explicit_roots_win_over_kingdoms() {
    let config: Config = serde_json::from_str(
        r#"{ "storage_root": "/data", "ensembl": { "roots": ["/pub/custom/"] } }"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.ensembl.crawl_roots(), vec!["/pub/custom/"]);
}

#[test]
fn malformed_json_is_parse_error() {
    let (_temp, root) = temp_root();
    let path = root.join("genoma.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(path.as_str())).unwrap_err();
    assert_matches!(err, GenomaError::ConfigParse(_));
}

#[test]
fn invalid_sra_settings_are_rejected() {
    let zero_chunk = Config {
        storage_root: Some("/data".to_string()),
        sra: SraSection {
            chunk_size: 0,
            ..SraSection::default()
        },
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(zero_chunk).unwrap_err(),
        GenomaError::ConfigParse(_)
    );

    let inverted = Config {
        storage_root: Some("/data".to_string()),
        sra: SraSection {
            min_read_length: 500,
            max_read_length: 100,
            ..SraSection::default()
        },
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(inverted).unwrap_err(),
        GenomaError::ConfigParse(_)
    );
}
