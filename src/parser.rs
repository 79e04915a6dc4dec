use crate::config::EnsemblSection;
use crate::domain::{AssemblyIdentity, FileRole, ParsedLeaf};
use crate::error::GenomaError;

const SIZE_FIELD: usize = 4;

#[derive(Debug, Clone)]
pub struct ParserPolicy {
    pub sequence_suffix: String,
    pub annotation_suffix: String,
    pub excluded_substrings: Vec<String>,
}

impl From<&EnsemblSection> for ParserPolicy {
    fn from(section: &EnsemblSection) -> Self {
        Self {
            sequence_suffix: section.sequence_suffix.clone(),
            annotation_suffix: section.annotation_suffix.clone(),
            excluded_substrings: section.excluded_substrings.clone(),
        }
    }
}

impl Default for ParserPolicy {
    fn default() -> Self {
        Self::from(&EnsemblSection::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafOutcome {
    Parsed(ParsedLeaf),
    Excluded,
    Unclassified,
}

pub struct FilenameParser {
    policy: ParserPolicy,
}

impl FilenameParser {
    pub fn new(policy: ParserPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ParserPolicy {
        &self.policy
    }

    /// Decodes one listing line. Excluded and unclassified files are not
    /// errors; a classified file whose name or size cannot be read is.
    pub fn parse(&self, raw_line: &str) -> Result<LeafOutcome, GenomaError> {
        let tokens: Vec<&str> = raw_line.split_whitespace().collect();
        let Some(filename) = tokens.last().copied() else {
            return Err(parse_error(raw_line, "empty listing line"));
        };

        if self.is_excluded(filename) {
            return Ok(LeafOutcome::Excluded);
        }
        let Some(role) = self.classify(filename) else {
            return Ok(LeafOutcome::Unclassified);
        };

        if tokens.len() <= SIZE_FIELD + 1 {
            return Err(parse_error(raw_line, "too few listing fields"));
        }
        let size = tokens[SIZE_FIELD]
            .parse::<u64>()
            .map_err(|_| parse_error(raw_line, "size field is not a number"))?;

        let identity = self
            .identity(filename, role)
            .map_err(|reason| parse_error(raw_line, reason))?;
        Ok(LeafOutcome::Parsed(ParsedLeaf {
            identity,
            role,
            filename: filename.to_string(),
            size,
        }))
    }

    pub fn is_excluded(&self, filename: &str) -> bool {
        self.policy
            .excluded_substrings
            .iter()
            .any(|needle| !needle.is_empty() && filename.contains(needle.as_str()))
    }

    pub fn classify(&self, filename: &str) -> Option<FileRole> {
        if filename.ends_with(&self.policy.sequence_suffix) {
            Some(FileRole::Sequence)
        } else if filename.ends_with(&self.policy.annotation_suffix) {
            Some(FileRole::Annotation)
        } else {
            None
        }
    }

    fn suffix(&self, role: FileRole) -> &str {
        match role {
            FileRole::Sequence => &self.policy.sequence_suffix,
            FileRole::Annotation => &self.policy.annotation_suffix,
        }
    }

    /// `genus_species[_qualifier].<assembly>[.<release>]<suffix>`. Both roles
    /// reduce to the same assembly id: the role suffix is removed, and for
    /// annotations the trailing release number as well.
    fn identity(&self, filename: &str, role: FileRole) -> Result<AssemblyIdentity, &'static str> {
        let stem = filename
            .strip_suffix(self.suffix(role))
            .ok_or("filename does not carry the role suffix")?;
        let (name_segment, label) = stem
            .split_once('.')
            .ok_or("filename has no assembly segment")?;

        let names: Vec<&str> = name_segment
            .split('_')
            .filter(|token| !token.is_empty())
            .collect();
        if names.len() < 2 {
            return Err("fewer than two name tokens");
        }
        let qualifier = (names.len() > 2).then(|| names[2..].join("_"));

        let assembly_id = match role {
            FileRole::Sequence => label,
            FileRole::Annotation => strip_release(label),
        };
        if assembly_id.is_empty() {
            return Err("empty assembly identifier");
        }

        Ok(AssemblyIdentity::new(
            names[0],
            names[1],
            qualifier,
            assembly_id,
        ))
    }
}

fn strip_release(label: &str) -> &str {
    match label.rsplit_once('.') {
        Some((assembly, release))
            if !assembly.is_empty()
                && !release.is_empty()
                && release.chars().all(|ch| ch.is_ascii_digit()) =>
        {
            assembly
        }
        _ => label,
    }
}

fn parse_error(line: &str, reason: &str) -> GenomaError {
    GenomaError::FilenameParse {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}
