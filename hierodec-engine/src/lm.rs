//! Backoff n-gram language model over target ids, loaded from an ARPA file.
//!
//! Scores are log10 probabilities, used as-is. The decoder asks for two kinds
//! of increments: the joining increment when sub-candidate target strings are
//! concatenated under a rule, and the end-of-sentence finalization for
//! candidates covering the whole input.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::cand::Cand;
use crate::vocab::Vocab;

/// Errors that can occur while loading a language model.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid ARPA file: {0}")]
    Format(String),
}

type Result<T> = std::result::Result<T, LmError>;

/// Log10 probability assigned when even the unigram is missing.
const UNIGRAM_FLOOR: f64 = -100.0;

/// A backoff n-gram model keyed on target vocabulary ids.
#[derive(Debug)]
pub struct LanguageModel {
    order: usize,
    probs: HashMap<Vec<i32>, f64>,
    backoffs: HashMap<Vec<i32>, f64>,
    bos_id: i32,
    eos_id: i32,
    unk_id: i32,
}

impl LanguageModel {
    /// A model with no n-grams that scores every sequence 0.
    pub fn null() -> Self {
        LanguageModel {
            order: 1,
            probs: HashMap::new(),
            backoffs: HashMap::new(),
            bos_id: 0,
            eos_id: 0,
            unk_id: 0,
        }
    }

    /// Load an ARPA model, resolving words through the target vocabulary.
    ///
    /// Malformed entry lines are skipped with a warning.
    pub fn load(path: impl AsRef<Path>, tgt_vocab: &Vocab) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);

        let mut probs = HashMap::new();
        let mut backoffs = HashMap::new();
        let mut order = 0usize;
        let mut current_n = 0usize;
        let mut in_data = false;
        let mut skipped = 0usize;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                in_data = true;
                continue;
            }
            if line == "\\end\\" {
                break;
            }
            if let Some(rest) = line.strip_prefix('\\')
                && let Some(n) = rest.strip_suffix("-grams:")
            {
                current_n = n
                    .parse()
                    .map_err(|_| LmError::Format(format!("bad section header '{}'", line)))?;
                order = order.max(current_n);
                continue;
            }
            if in_data && line.starts_with("ngram ") {
                continue;
            }
            if current_n == 0 {
                continue;
            }

            // Entry: logprob, n words, optional backoff weight
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != current_n + 1 && fields.len() != current_n + 2 {
                skipped += 1;
                tracing::warn!("skipping ARPA line {}: wrong field count", lineno + 1);
                continue;
            }
            let Ok(logprob) = fields[0].parse::<f64>() else {
                skipped += 1;
                tracing::warn!("skipping ARPA line {}: bad log-probability", lineno + 1);
                continue;
            };
            let ids: Vec<i32> = fields[1..=current_n]
                .iter()
                .map(|w| tgt_vocab.get_id(w))
                .collect();
            if fields.len() == current_n + 2 {
                match fields[current_n + 1].parse::<f64>() {
                    Ok(bo) => {
                        backoffs.insert(ids.clone(), bo);
                    }
                    Err(_) => {
                        skipped += 1;
                        tracing::warn!("skipping ARPA line {}: bad backoff weight", lineno + 1);
                        continue;
                    }
                }
            }
            probs.insert(ids, logprob);
        }

        if order == 0 {
            return Err(LmError::Format("no n-gram sections found".to_string()));
        }
        if skipped > 0 {
            tracing::warn!("skipped {} malformed ARPA lines", skipped);
        }

        Ok(LanguageModel {
            order,
            probs,
            backoffs,
            bos_id: tgt_vocab.get_id("<s>"),
            eos_id: tgt_vocab.get_id("</s>"),
            unk_id: tgt_vocab.get_id("<unk>"),
        })
    }

    /// Highest n-gram order in the model.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of n-grams in the model.
    pub fn ngram_count(&self) -> usize {
        self.probs.len()
    }

    /// Out-of-vocabulary sentinels score as `<unk>`.
    fn map_wid(&self, wid: i32) -> i32 {
        if wid < 0 { self.unk_id } else { wid }
    }

    /// log10 P(word | context) with backoff. Both sides already mapped.
    fn cond_logprob(&self, word: i32, context: &[i32]) -> f64 {
        if self.probs.is_empty() {
            return 0.0;
        }
        let mut key = Vec::with_capacity(context.len() + 1);
        key.extend_from_slice(context);
        key.push(word);
        if let Some(&p) = self.probs.get(&key) {
            return p;
        }
        if context.is_empty() {
            return self
                .probs
                .get(&vec![self.unk_id])
                .copied()
                .unwrap_or(UNIGRAM_FLOOR);
        }
        let bo = self.backoffs.get(context).copied().unwrap_or(0.0);
        bo + self.cond_logprob(word, &context[1..])
    }

    /// Score a target sequence without sentence boundaries: every word is
    /// conditioned on whatever context the sequence itself provides.
    pub fn seq_score(&self, wids: &[i32]) -> f64 {
        let mapped: Vec<i32> = wids.iter().map(|&w| self.map_wid(w)).collect();
        let mut total = 0.0;
        for i in 0..mapped.len() {
            let ctx_beg = i.saturating_sub(self.order.saturating_sub(1));
            total += self.cond_logprob(mapped[i], &mapped[ctx_beg..i]);
        }
        total
    }

    /// Score a target sequence as a full sentence, with `<s>` context and a
    /// final `</s>` transition.
    fn bounded_score(&self, wids: &[i32]) -> f64 {
        let mut seq = Vec::with_capacity(wids.len() + 2);
        seq.push(self.bos_id);
        seq.extend(wids.iter().map(|&w| self.map_wid(w)));
        seq.push(self.eos_id);
        let mut total = 0.0;
        for i in 1..seq.len() {
            let ctx_beg = i.saturating_sub(self.order.saturating_sub(1));
            total += self.cond_logprob(seq[i], &seq[ctx_beg..i]);
        }
        total
    }

    /// Log-probability increment for a freshly assembled candidate: the score
    /// of its target string minus what was already credited to its children.
    pub fn cal_increased_lm_score(&self, cand: &Cand) -> f64 {
        let mut credited = 0.0;
        if let Some(x1) = &cand.child_x1 {
            credited += x1.lm_prob;
        }
        if let Some(x2) = &cand.child_x2 {
            credited += x2.lm_prob;
        }
        self.seq_score(&cand.tgt_wids) - credited
    }

    /// End-of-sentence finalization increment for a full-span candidate.
    pub fn cal_final_increased_lm_score(&self, cand: &Cand) -> f64 {
        self.bounded_score(&cand.tgt_wids) - self.seq_score(&cand.tgt_wids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cand::RuleInst;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    const TEST_ARPA: &str = "\
\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-2.0\t<unk>
-1.0\t<s>\t-0.5
-1.2\t</s>
-0.8\tthe\t-0.4
-1.5\thouse\t-0.2

\\2-grams:
-0.3\tthe house
-0.6\t<s> the
-0.9\thouse </s>

\\end\\
";

    fn test_model() -> (LanguageModel, Vocab) {
        let vocab = Vocab::new();
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(TEST_ARPA.as_bytes()).unwrap();
        f.flush().unwrap();
        let lm = LanguageModel::load(f.path(), &vocab).unwrap();
        (lm, vocab)
    }

    fn cand_with(wids: Vec<i32>, children: Vec<Arc<Cand>>) -> Cand {
        let mut it = children.into_iter();
        Cand {
            tgt_wids: wids,
            trans_probs: vec![],
            lm_prob: 0.0,
            score: 0.0,
            tgt_word_num: 0,
            rule_num: 1,
            glue_num: 0,
            generalize_fw_num: 0,
            fwverb_terminal_num: 0,
            rank_x1: -1,
            rank_x2: -1,
            child_x1: it.next(),
            child_x2: it.next(),
            applied_rule: RuleInst::oov(1),
        }
    }

    #[test]
    fn test_load() {
        let (lm, _vocab) = test_model();
        assert_eq!(lm.order(), 2);
        assert_eq!(lm.ngram_count(), 8);
    }

    #[test]
    fn test_seq_score_with_backoff() {
        let (lm, vocab) = test_model();
        let the = vocab.get_id("the");
        let house = vocab.get_id("house");

        // Direct bigram hit
        assert!((lm.seq_score(&[the, house]) - (-0.8 + -0.3)).abs() < 1e-9);
        // Backoff: P(the | house) = backoff(house) + P(the)
        assert!((lm.seq_score(&[house, the]) - (-1.5 + (-0.2 + -0.8))).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_word_scores_as_unk() {
        let (lm, vocab) = test_model();
        let zebra = vocab.get_id("zebra");
        assert!((lm.seq_score(&[zebra]) - (-2.0)).abs() < 1e-9);
        // Out-of-vocabulary sentinels too
        assert!((lm.seq_score(&[-7]) - (-2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_increment_subtracts_children() {
        let (lm, vocab) = test_model();
        let the = vocab.get_id("the");
        let house = vocab.get_id("house");

        let mut c1 = cand_with(vec![the], vec![]);
        c1.lm_prob = lm.seq_score(&[the]);
        let mut c2 = cand_with(vec![house], vec![]);
        c2.lm_prob = lm.seq_score(&[house]);

        let joined = cand_with(vec![the, house], vec![Arc::new(c1), Arc::new(c2)]);
        let inc = lm.cal_increased_lm_score(&joined);
        // The join re-scores "house" in its new context
        assert!((inc - (-0.3 - -1.5)).abs() < 1e-9);

        // Credited children plus the increment reproduces the sequence score
        let total = joined.child_x1.as_ref().unwrap().lm_prob
            + joined.child_x2.as_ref().unwrap().lm_prob
            + inc;
        assert!((total - lm.seq_score(&[the, house])).abs() < 1e-9);
    }

    #[test]
    fn test_final_increment_adds_boundaries() {
        let (lm, vocab) = test_model();
        let the = vocab.get_id("the");
        let house = vocab.get_id("house");

        let cand = cand_with(vec![the, house], vec![]);
        let inc = lm.cal_final_increased_lm_score(&cand);
        // bounded: P(the|<s>) + P(house|the) + P(</s>|house) = -0.6 - 0.3 - 0.9
        // plain:   P(the) + P(house|the)                     = -0.8 - 0.3
        assert!((inc - (-1.8 - -1.1)).abs() < 1e-9);
    }

    #[test]
    fn test_null_model_scores_zero() {
        let lm = LanguageModel::null();
        assert_eq!(lm.seq_score(&[1, 2, 3]), 0.0);
        let cand = cand_with(vec![1, 2], vec![]);
        assert_eq!(lm.cal_increased_lm_score(&cand), 0.0);
        assert_eq!(lm.cal_final_increased_lm_score(&cand), 0.0);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let vocab = Vocab::new();
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(
            b"\\data\\\nngram 1=2\n\n\\1-grams:\n-1.0\tok\nnot_a_number\ttoo many words here\n\\end\\\n",
        )
        .unwrap();
        f.flush().unwrap();

        let lm = LanguageModel::load(f.path(), &vocab).unwrap();
        assert_eq!(lm.ngram_count(), 1);
    }

    #[test]
    fn test_missing_sections_is_error() {
        let vocab = Vocab::new();
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"not an arpa file\n").unwrap();
        f.flush().unwrap();

        assert!(LanguageModel::load(f.path(), &vocab).is_err());
    }
}
