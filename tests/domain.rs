use assert_matches::assert_matches;

use genoma::domain::{
    AssemblyIdentity, AssemblyRecord, AssemblyRecordBuilder, FieldValue, FileRole, RecordField,
    SourceDatabase, SraAccession, TaxonomyId,
};
use genoma::error::GenomaError;

fn rice() -> AssemblyRecord {
    AssemblyRecord::new(
        AssemblyIdentity::new("Oryza", "sativa", None, "IRGSP-1.0"),
        SourceDatabase::Ensembl,
    )
}

#[test]
fn parse_source_database() {
    assert_eq!(
        " Ensembl ".parse::<SourceDatabase>().unwrap(),
        SourceDatabase::Ensembl
    );
    assert_matches!(
        "refseq".parse::<SourceDatabase>().unwrap_err(),
        GenomaError::UnknownSource(_)
    );
}

#[test]
fn field_value_follows_field_kind() {
    assert_eq!(
        FieldValue::parse_for(RecordField::SequenceRemoteSize, " 42 ").unwrap(),
        FieldValue::Integer(42)
    );
    assert_eq!(
        FieldValue::parse_for(RecordField::Version, "release-41").unwrap(),
        FieldValue::text("release-41")
    );
    assert_matches!(
        FieldValue::parse_for(RecordField::AnnotationRemoteSize, "lots").unwrap_err(),
        GenomaError::InvalidFieldValue { field, .. } if field == "annotation_remote_size"
    );
}

#[test]
fn required_fields_reject_null() {
    assert!(RecordField::TaxonomyId.check(&FieldValue::Null).is_ok());
    assert!(RecordField::Genus.check(&FieldValue::Null).is_err());
    assert!(RecordField::Version.check(&FieldValue::Integer(1)).is_err());
}

#[test]
fn remote_file_by_role() {
    let mut record = rice();
    assert!(record.remote_file(FileRole::Sequence).is_none());
    record.set_remote_file(
        FileRole::Sequence,
        "/pub/fasta/Oryza_sativa.IRGSP-1.0.dna.toplevel.fa.gz".to_string(),
        11,
    );
    assert_eq!(
        record.remote_file(FileRole::Sequence),
        Some(("/pub/fasta/Oryza_sativa.IRGSP-1.0.dna.toplevel.fa.gz", Some(11)))
    );
    assert!(!record.is_complete());
}

#[test]
fn builder_requires_identity() {
    let err = AssemblyRecordBuilder::new()
        .set(RecordField::Genus, FieldValue::text("Oryza"))
        .set(RecordField::AssemblyId, FieldValue::text("IRGSP-1.0"))
        .build()
        .unwrap_err();
    assert_matches!(err, GenomaError::InvalidFieldValue { field, .. } if field == "species");
}

#[test]
fn builder_accepts_legacy_names() {
    let record = AssemblyRecordBuilder::new()
        .set_named("genus", FieldValue::text("Oryza"))
        .unwrap()
        .set_named("species", FieldValue::text("sativa"))
        .unwrap()
        .set_named("assembly_id", FieldValue::text("IRGSP-1.0"))
        .unwrap()
        .set_named("fasta_remote_size", FieldValue::Integer(11))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(record.sequence_remote_size, Some(11));
    assert_eq!(record.key(), "Oryza_sativa-IRGSP-1.0");
}

#[test]
fn record_serializes_with_snake_case_source() {
    let json = serde_json::to_value(rice()).unwrap();
    assert_eq!(json["source_database"], "ensembl");
    assert_eq!(json["genus"], "Oryza");
    assert!(json["taxonomy_id"].is_null());
}

#[test]
fn identifiers_are_validated() {
    assert_matches!(
        "SRR12x".parse::<SraAccession>().unwrap_err(),
        GenomaError::InvalidAccession(_)
    );
    assert_eq!(" 4530 ".parse::<TaxonomyId>().unwrap().as_str(), "4530");
    assert_matches!(
        "".parse::<TaxonomyId>().unwrap_err(),
        GenomaError::InvalidTaxonomyId(_)
    );
}
