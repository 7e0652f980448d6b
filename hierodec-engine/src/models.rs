//! The loaded model bundle shared by all sentence decoders.

use std::path::PathBuf;

use crate::config::{ConfigError, Settings};
use crate::lm::{LanguageModel, LmError};
use crate::ruletable::{RuleTable, RuleTableError};
use crate::vocab::{FunctionWordSet, Vocab, VocabError};

/// Errors that can occur while loading the model bundle.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("vocabulary load failed")]
    Vocab(#[from] VocabError),

    #[error("rule table load failed")]
    RuleTable(#[from] RuleTableError),

    #[error("language model load failed")]
    Lm(#[from] LmError),

    #[error("configuration rejected")]
    Config(#[from] ConfigError),
}

type Result<T> = std::result::Result<T, ModelError>;

/// File locations of the model bundle.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub src_vocab: PathBuf,
    pub tgt_vocab: PathBuf,
    pub ruletable: PathBuf,
    /// `None` decodes with the null model (every LM score 0)
    pub lm: Option<PathBuf>,
    /// `None` decodes with an empty function-word set
    pub function_words: Option<PathBuf>,
}

/// All models a sentence decoder consults. Read-only during decoding.
pub struct Models {
    pub src_vocab: Vocab,
    pub tgt_vocab: Vocab,
    pub ruletable: RuleTable,
    pub lm: LanguageModel,
    pub function_words: FunctionWordSet,
}

impl Models {
    /// Load every collaborator from `paths`, validating `settings` first.
    pub fn load(paths: &ModelPaths, settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let src_vocab = Vocab::load(&paths.src_vocab)?;
        let tgt_vocab = Vocab::load(&paths.tgt_vocab)?;
        tracing::info!(
            src_words = src_vocab.size(),
            tgt_words = tgt_vocab.size(),
            "vocabularies loaded"
        );

        let ruletable = RuleTable::load(
            &paths.ruletable,
            &src_vocab,
            &tgt_vocab,
            &settings.weights,
            settings.decoder.prob_num,
        )?;
        tracing::info!(
            patterns = ruletable.pattern_count(),
            rules = ruletable.rule_count(),
            "rule table loaded"
        );

        let lm = match &paths.lm {
            Some(path) => {
                let lm = LanguageModel::load(path, &tgt_vocab)?;
                tracing::info!(order = lm.order(), ngrams = lm.ngram_count(), "language model loaded");
                lm
            }
            None => {
                tracing::info!("no language model configured, scoring with the null model");
                LanguageModel::null()
            }
        };

        let function_words = match &paths.function_words {
            Some(path) => FunctionWordSet::load(path, &src_vocab)?,
            None => FunctionWordSet::new(),
        };

        Ok(Models {
            src_vocab,
            tgt_vocab,
            ruletable,
            lm,
            function_words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_load_minimal_bundle() {
        let src = write_file("la\ncasa\n");
        let tgt = write_file("the\nhouse\n");
        let rules = write_file("la casa ||| the house ||| -0.5 0 0 0\n");

        let paths = ModelPaths {
            src_vocab: src.path().to_path_buf(),
            tgt_vocab: tgt.path().to_path_buf(),
            ruletable: rules.path().to_path_buf(),
            lm: None,
            function_words: None,
        };
        let models = Models::load(&paths, &Settings::default()).unwrap();

        assert_eq!(models.src_vocab.get_word(2), "la");
        // One parsed rule plus the built-in glue rule
        assert_eq!(models.ruletable.rule_count(), 2);
        assert!(models.function_words.is_empty());
        assert_eq!(models.lm.ngram_count(), 0);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let src = write_file("");
        let tgt = write_file("");
        let rules = write_file("");

        let paths = ModelPaths {
            src_vocab: src.path().to_path_buf(),
            tgt_vocab: tgt.path().to_path_buf(),
            ruletable: rules.path().to_path_buf(),
            lm: None,
            function_words: None,
        };
        let mut settings = Settings::default();
        settings.weights.trans = vec![1.0];
        assert!(matches!(
            Models::load(&paths, &settings),
            Err(ModelError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let paths = ModelPaths {
            src_vocab: PathBuf::from("/nonexistent/vocab"),
            tgt_vocab: PathBuf::from("/nonexistent/vocab"),
            ruletable: PathBuf::from("/nonexistent/rules"),
            lm: None,
            function_words: None,
        };
        assert!(matches!(
            Models::load(&paths, &Settings::default()),
            Err(ModelError::Vocab(_))
        ));
    }
}
