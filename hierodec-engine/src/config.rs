//! Decoder parameters and feature weights.
//!
//! Loaded from a TOML file; every field has a default so a partial (or empty)
//! configuration is valid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors that can occur while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("TOML parse error")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Search and output parameters of the decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderParams {
    /// Per-span beam capacity
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,
    /// Maximum pops per cube-pruning loop
    #[serde(default = "default_cube_size")]
    pub cube_size: usize,
    /// N-best output size
    #[serde(default = "default_nbest_num")]
    pub nbest_num: usize,
    /// Worker pool size for the per-span-length parallel passes
    #[serde(default = "default_span_thread_num")]
    pub span_thread_num: usize,
    /// Maximum source tokens covered by a non-glue rule instance
    #[serde(default = "default_span_len_max")]
    pub span_len_max: usize,
    /// Number of translation-model sub-scores per rule
    #[serde(default = "default_prob_num")]
    pub prob_num: usize,
    /// Omit out-of-vocabulary tokens from the output instead of copying
    /// their source surface
    #[serde(default)]
    pub drop_oov: bool,
}

fn default_beam_size() -> usize {
    20
}
fn default_cube_size() -> usize {
    100
}
fn default_nbest_num() -> usize {
    10
}
fn default_span_thread_num() -> usize {
    4
}
fn default_span_len_max() -> usize {
    10
}
fn default_prob_num() -> usize {
    4
}

impl Default for DecoderParams {
    fn default() -> Self {
        DecoderParams {
            beam_size: default_beam_size(),
            cube_size: default_cube_size(),
            nbest_num: default_nbest_num(),
            span_thread_num: default_span_thread_num(),
            span_len_max: default_span_len_max(),
            prob_num: default_prob_num(),
            drop_oov: false,
        }
    }
}

/// Weights for the linear feature combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWeight {
    /// One weight per translation-model sub-score (length `prob_num`)
    #[serde(default = "default_trans_weights")]
    pub trans: Vec<f64>,
    /// Language-model log-probability
    #[serde(default = "default_weight")]
    pub lm: f64,
    /// Target word count
    #[serde(default = "default_weight")]
    pub len: f64,
    /// Applied rule count
    #[serde(default = "default_weight")]
    pub rule_num: f64,
    /// Glue rule count
    #[serde(default = "default_weight")]
    pub glue: f64,
    /// Function-word generalization count
    #[serde(default = "default_weight")]
    pub fw: f64,
    /// Verb-or-function-word adjacency count
    #[serde(default = "default_weight")]
    pub fwverb: f64,
}

fn default_trans_weights() -> Vec<f64> {
    vec![1.0; default_prob_num()]
}
fn default_weight() -> f64 {
    1.0
}

impl Default for FeatureWeight {
    fn default() -> Self {
        FeatureWeight {
            trans: default_trans_weights(),
            lm: default_weight(),
            len: default_weight(),
            rule_num: default_weight(),
            glue: default_weight(),
            fw: default_weight(),
            fwverb: default_weight(),
        }
    }
}

/// Full decoder configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub decoder: DecoderParams,
    #[serde(default)]
    pub weights: FeatureWeight,
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.weights.trans.len() != self.decoder.prob_num {
            return Err(ConfigError::Invalid(format!(
                "weights.trans has {} entries but decoder.prob_num is {}",
                self.weights.trans.len(),
                self.decoder.prob_num
            )));
        }
        if self.decoder.beam_size == 0 {
            return Err(ConfigError::Invalid("decoder.beam_size must be > 0".to_string()));
        }
        if self.decoder.span_len_max == 0 {
            return Err(ConfigError::Invalid(
                "decoder.span_len_max must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.decoder.beam_size, 20);
        assert_eq!(settings.decoder.cube_size, 100);
        assert_eq!(settings.decoder.prob_num, 4);
        assert!(!settings.decoder.drop_oov);
        assert_eq!(settings.weights.trans.len(), 4);
        assert!((settings.weights.lm - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml_str(
            r#"
            [decoder]
            beam_size = 50
            prob_num = 2

            [weights]
            trans = [0.5, 0.25]
            lm = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(settings.decoder.beam_size, 50);
        assert_eq!(settings.decoder.cube_size, 100);
        assert_eq!(settings.weights.trans, vec![0.5, 0.25]);
        assert!((settings.weights.lm - 2.0).abs() < f64::EPSILON);
        assert!((settings.weights.glue - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_trans_weight_arity() {
        let err = Settings::from_toml_str(
            r#"
            [decoder]
            prob_num = 3
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_zero_beam() {
        let err = Settings::from_toml_str(
            r#"
            [decoder]
            beam_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"[decoder]\nnbest_num = 3\n").unwrap();
        f.flush().unwrap();

        let settings = Settings::load(f.path()).unwrap();
        assert_eq!(settings.decoder.nbest_num, 3);
    }
}
