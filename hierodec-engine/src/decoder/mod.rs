//! CKY-style chart decoding with cube pruning.
//!
//! A sentence decoder owns a triangular chart of per-span candidate beams.
//! Length-1 spans are seeded from lexical phrase rules, then every longer
//! span is filled in order of increasing length by merging the beams of its
//! sub-spans through the rule instances enumerated for it. Spans of equal
//! length are independent and decode on a bounded worker pool.

mod enumerate;
mod search;
mod trace;

pub use trace::TuneInfo;

use rayon::prelude::*;

use crate::cand::{CandBeam, RuleInst, Span};
use crate::config::{DecoderParams, FeatureWeight, Settings};
use crate::models::Models;

/// Upper bound on decodable sentence length; the chart is quadratic in it.
const MAX_SEN_LEN: usize = 256;

/// Triangular chart: index `[beg][len]` covers tokens `beg..=beg+len`.
struct Chart {
    cands: Vec<Vec<CandBeam>>,
    rules: Vec<Vec<Vec<RuleInst>>>,
}

impl Chart {
    fn new(n: usize) -> Self {
        let mut cands = Vec::with_capacity(n);
        let mut rules = Vec::with_capacity(n);
        for beg in 0..n {
            cands.push((0..n - beg).map(|_| CandBeam::new()).collect());
            rules.push(vec![Vec::new(); n - beg]);
        }
        Chart { cands, rules }
    }
}

/// Decoder state for a single source sentence.
pub struct SentenceDecoder<'a> {
    models: &'a Models,
    params: DecoderParams,
    weights: FeatureWeight,
    src_wids: Vec<i32>,
    verb_flags: Vec<bool>,
    fw_flags: Vec<bool>,
    sen_len: usize,
    src_nt_id: i32,
    tgt_nt_id: i32,
    chart: Chart,
}

impl<'a> SentenceDecoder<'a> {
    /// Build a decoder for one input sentence.
    ///
    /// Tokens are whitespace-separated `surface#TAG` pairs; a tag starting
    /// with `V` marks a verb. Bare tokens without `#` are accepted with the
    /// verb flag off. Seeding and rule enumeration run here, so the returned
    /// decoder is ready for `translate_sentence`.
    pub fn new(models: &'a Models, settings: &Settings, input: &str) -> Self {
        let mut src_wids = Vec::new();
        let mut verb_flags = Vec::new();
        let mut fw_flags = Vec::new();
        for token in input.split_whitespace() {
            let (surface, tag) = match token.split_once('#') {
                Some((surface, tag)) => (surface, tag),
                None => (token, ""),
            };
            let wid = models.src_vocab.get_id(surface);
            src_wids.push(wid);
            verb_flags.push(tag.starts_with('V'));
            fw_flags.push(models.function_words.contains(wid));
        }

        if src_wids.len() > MAX_SEN_LEN {
            tracing::warn!(tokens = src_wids.len(), "input truncated to {} tokens", MAX_SEN_LEN);
            src_wids.truncate(MAX_SEN_LEN);
            verb_flags.truncate(MAX_SEN_LEN);
            fw_flags.truncate(MAX_SEN_LEN);
        }

        let sen_len = src_wids.len();
        let mut decoder = SentenceDecoder {
            models,
            params: settings.decoder.clone(),
            weights: settings.weights.clone(),
            src_wids,
            verb_flags,
            fw_flags,
            sen_len,
            src_nt_id: models.ruletable.src_nt_id(),
            tgt_nt_id: models.ruletable.tgt_nt_id(),
            chart: Chart::new(sen_len),
        };
        decoder.seed_phrase_cands();
        decoder.enumerate_hiero_rules();
        decoder
    }

    /// Decode and render the best translation of the whole sentence.
    pub fn translate_sentence(&mut self) -> String {
        if self.sen_len == 0 {
            return String::new();
        }

        for beg in 0..self.sen_len {
            self.chart.cands[beg][0].sort();
        }

        let pool = self.build_pool();
        for len in 1..self.sen_len {
            let n_spans = self.sen_len - len;
            let beams: Vec<CandBeam> = {
                let me: &Self = self;
                match &pool {
                    Some(pool) => pool.install(|| {
                        (0..n_spans)
                            .into_par_iter()
                            .map(|beg| me.kbest_for_span(beg, len))
                            .collect()
                    }),
                    None => (0..n_spans).map(|beg| me.kbest_for_span(beg, len)).collect(),
                }
            };
            for (beg, beam) in beams.into_iter().enumerate() {
                self.chart.cands[beg][len] = beam;
            }
        }

        match self.chart.cands[0][self.sen_len - 1].top() {
            Some(top) => {
                tracing::debug!(score = top.score, rules = top.rule_num, "best derivation");
                self.words_to_str(&top.tgt_wids, self.params.drop_oov)
            }
            None => String::new(),
        }
    }

    fn build_pool(&self) -> Option<rayon::ThreadPool> {
        if self.params.span_thread_num <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.span_thread_num)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!("worker pool setup failed, decoding sequentially: {}", e);
                None
            }
        }
    }

    /// Number of source tokens.
    pub fn sen_len(&self) -> usize {
        self.sen_len
    }

    fn beam(&self, span: Span) -> &CandBeam {
        &self.chart.cands[span.beg as usize][span.len as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::LanguageModel;
    use crate::ruletable::RuleTable;
    use crate::vocab::{FunctionWordSet, Vocab};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn models_with_rules(rules: &str) -> Models {
        let src_vocab = Vocab::new();
        let tgt_vocab = Vocab::new();
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(rules.as_bytes()).unwrap();
        f.flush().unwrap();
        let settings = test_settings();
        let ruletable = RuleTable::load(
            f.path(),
            &src_vocab,
            &tgt_vocab,
            &settings.weights,
            settings.decoder.prob_num,
        )
        .unwrap();
        Models {
            src_vocab,
            tgt_vocab,
            ruletable,
            lm: LanguageModel::null(),
            function_words: FunctionWordSet::new(),
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.decoder.prob_num = 1;
        settings.decoder.span_thread_num = 1;
        settings.weights.trans = vec![1.0];
        settings
    }

    #[test]
    fn test_tokenization_with_tags() {
        let models = models_with_rules("");
        let decoder = SentenceDecoder::new(&models, &test_settings(), "run#VB fast#RB");
        assert_eq!(decoder.sen_len(), 2);
        assert_eq!(decoder.verb_flags, vec![true, false]);
        assert_eq!(
            decoder.src_wids,
            vec![models.src_vocab.get_id("run"), models.src_vocab.get_id("fast")]
        );
    }

    #[test]
    fn test_tokenization_without_tags() {
        let models = models_with_rules("");
        let decoder = SentenceDecoder::new(&models, &test_settings(), "run fast");
        assert_eq!(decoder.sen_len(), 2);
        assert_eq!(decoder.verb_flags, vec![false, false]);
    }

    #[test]
    fn test_empty_input() {
        let models = models_with_rules("");
        let mut decoder = SentenceDecoder::new(&models, &test_settings(), "");
        assert_eq!(decoder.sen_len(), 0);
        assert_eq!(decoder.translate_sentence(), "");
    }

    #[test]
    fn test_overlong_input_is_truncated() {
        let models = models_with_rules("");
        let input: Vec<String> = (0..300).map(|i| format!("w{}#N", i)).collect();
        let decoder = SentenceDecoder::new(&models, &test_settings(), &input.join(" "));
        assert_eq!(decoder.sen_len(), MAX_SEN_LEN);
    }

    #[test]
    fn test_chart_is_triangular() {
        let models = models_with_rules("");
        let decoder = SentenceDecoder::new(&models, &test_settings(), "a#N b#N c#N");
        assert_eq!(decoder.chart.cands.len(), 3);
        assert_eq!(decoder.chart.cands[0].len(), 3);
        assert_eq!(decoder.chart.cands[1].len(), 2);
        assert_eq!(decoder.chart.cands[2].len(), 1);
    }
}
