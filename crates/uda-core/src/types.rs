//! Core type definitions for the fault-diagnosis domain adaptation workspace.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

/// Which side of the adaptation a window belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    /// Labeled operating condition
    Source,
    /// Unlabeled operating condition
    Target,
}

impl std::fmt::Display for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainKind::Source => write!(f, "source"),
            DomainKind::Target => write!(f, "target"),
        }
    }
}

/// Domain alignment algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelName {
    /// Correlation alignment of second-order statistics
    Coral,
    /// Domain-adversarial network with gradient reversal
    Dann,
    /// Conditional adversarial network over the multilinear map
    Cdan,
    /// Label-conditioned adversarial network with mixup
    Acdann,
    /// Deep discriminative transfer learning network (MMD + margin)
    Ddtln,
}

impl ModelName {
    /// All algorithms, in a stable order.
    pub const ALL: [ModelName; 5] = [
        ModelName::Coral,
        ModelName::Dann,
        ModelName::Cdan,
        ModelName::Acdann,
        ModelName::Ddtln,
    ];

    /// Whether the algorithm trains a domain discriminator.
    pub fn is_adversarial(&self) -> bool {
        matches!(self, ModelName::Dann | ModelName::Cdan | ModelName::Acdann)
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelName::Coral => write!(f, "CORAL"),
            ModelName::Dann => write!(f, "DANN"),
            ModelName::Cdan => write!(f, "CDAN"),
            ModelName::Acdann => write!(f, "ACDANN"),
            ModelName::Ddtln => write!(f, "DDTLN"),
        }
    }
}

impl FromStr for ModelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CORAL" => Ok(ModelName::Coral),
            "DANN" => Ok(ModelName::Dann),
            "CDAN" => Ok(ModelName::Cdan),
            "ACDANN" => Ok(ModelName::Acdann),
            "DDTLN" => Ok(ModelName::Ddtln),
            other => Err(Error::Configuration(format!(
                "unknown model_name '{other}', expected one of CORAL, DANN, CDAN, ACDANN, DDTLN"
            ))),
        }
    }
}

/// How multiple source conditions are combined
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrainMode {
    /// Train on the first source condition only
    #[default]
    SingleSource,
    /// Concatenate every source condition into one labeled store
    SourceCombine,
    /// One branch per source condition (rejected by every aligner)
    MultiSource,
}

impl std::fmt::Display for TrainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainMode::SingleSource => write!(f, "single_source"),
            TrainMode::SourceCombine => write!(f, "source_combine"),
            TrainMode::MultiSource => write!(f, "multi_source"),
        }
    }
}

/// Per-window amplitude normalization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Zero mean, unit variance
    #[default]
    #[serde(rename = "mean-std")]
    MeanStd,
    /// Scale into [0, 1]
    #[serde(rename = "0-1")]
    ZeroOne,
    /// Scale into [-1, 1]
    #[serde(rename = "-1-1")]
    MinusOneOne,
    /// Raw amplitudes
    #[serde(rename = "none")]
    None,
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Normalization::MeanStd => write!(f, "mean-std"),
            Normalization::ZeroOne => write!(f, "0-1"),
            Normalization::MinusOneOne => write!(f, "-1-1"),
            Normalization::None => write!(f, "none"),
        }
    }
}

/// A bench and operating condition, written `NAME_N` (e.g. `CWRU_0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConditionId {
    /// Test bench / dataset name
    pub dataset: String,
    /// Operating condition index within the bench
    pub condition: usize,
}

impl ConditionId {
    /// Creates a new condition identifier
    pub fn new(dataset: impl Into<String>, condition: usize) -> Self {
        Self {
            dataset: dataset.into(),
            condition,
        }
    }

    /// Parses a comma-separated list such as `"CWRU_0,CWRU_1"`.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl std::fmt::Display for ConditionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.dataset, self.condition)
    }
}

impl FromStr for ConditionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (dataset, condition) = s.trim().rsplit_once('_').ok_or_else(|| {
            Error::Configuration(format!("condition '{s}' must look like NAME_N"))
        })?;
        if dataset.is_empty() {
            return Err(Error::Configuration(format!(
                "condition '{s}' has an empty dataset name"
            )));
        }
        let condition = condition.parse::<usize>().map_err(|_| {
            Error::Configuration(format!("condition '{s}' has a non-numeric index"))
        })?;
        Ok(Self::new(dataset, condition))
    }
}

impl TryFrom<String> for ConditionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ConditionId> for String {
    fn from(value: ConditionId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_parse_case_insensitive() {
        assert_eq!("dann".parse::<ModelName>().unwrap(), ModelName::Dann);
        assert_eq!("Coral".parse::<ModelName>().unwrap(), ModelName::Coral);
        assert_eq!(" ACDANN ".parse::<ModelName>().unwrap(), ModelName::Acdann);
    }

    #[test]
    fn test_unknown_model_name_is_configuration_error() {
        let err = "MCD".parse::<ModelName>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_model_name_display_roundtrip() {
        for name in ModelName::ALL {
            assert_eq!(name.to_string().parse::<ModelName>().unwrap(), name);
        }
    }

    #[test]
    fn test_adversarial_flags() {
        assert!(ModelName::Dann.is_adversarial());
        assert!(ModelName::Cdan.is_adversarial());
        assert!(ModelName::Acdann.is_adversarial());
        assert!(!ModelName::Coral.is_adversarial());
        assert!(!ModelName::Ddtln.is_adversarial());
    }

    #[test]
    fn test_condition_id_parse() {
        let id: ConditionId = "CWRU_3".parse().unwrap();
        assert_eq!(id.dataset, "CWRU");
        assert_eq!(id.condition, 3);
        assert_eq!(id.to_string(), "CWRU_3");

        let nested: ConditionId = "PU_BEARING_1".parse().unwrap();
        assert_eq!(nested.dataset, "PU_BEARING");
    }

    #[test]
    fn test_condition_id_rejects_malformed() {
        assert!("CWRU".parse::<ConditionId>().is_err());
        assert!("CWRU_x".parse::<ConditionId>().is_err());
        assert!("_0".parse::<ConditionId>().is_err());
    }

    #[test]
    fn test_condition_list() {
        let ids = ConditionId::parse_list("JNU_0, JNU_1,").unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], ConditionId::new("JNU", 1));
    }

    #[test]
    fn test_normalization_display() {
        assert_eq!(Normalization::MeanStd.to_string(), "mean-std");
        assert_eq!(Normalization::MinusOneOne.to_string(), "-1-1");
    }
}
