//! Rendering decoded output: target strings, n-best feature dumps, and the
//! derivation trace of the best candidate.

use serde::Serialize;

use crate::cand::Cand;
use crate::ruletable::RuleType;

use super::SentenceDecoder;

/// One n-best entry with its full feature decomposition, in feature order:
/// the translation sub-scores, then LM, word count, rule count, glue count,
/// and the two generalization counts.
#[derive(Debug, Clone, Serialize)]
pub struct TuneInfo {
    pub sen_id: usize,
    pub translation: String,
    pub feature_values: Vec<f64>,
    pub total_score: f64,
}

impl SentenceDecoder<'_> {
    /// N-best entries from the full-sentence beam, best first.
    pub fn get_tune_info(&self, sen_id: usize) -> Vec<TuneInfo> {
        if self.sen_len == 0 {
            return Vec::new();
        }
        let beam = &self.chart.cands[0][self.sen_len - 1];
        let n = beam.len().min(self.params.nbest_num);
        let mut infos = Vec::with_capacity(n);
        for rank in 0..n {
            let cand = beam.at(rank).expect("rank is within the beam");
            let mut feature_values = cand.trans_probs.clone();
            feature_values.push(cand.lm_prob);
            feature_values.push(f64::from(cand.tgt_word_num));
            feature_values.push(f64::from(cand.rule_num));
            feature_values.push(f64::from(cand.glue_num));
            feature_values.push(f64::from(cand.generalize_fw_num));
            feature_values.push(f64::from(cand.fwverb_terminal_num));
            infos.push(TuneInfo {
                sen_id,
                translation: self.words_to_str(&cand.tgt_wids, false),
                feature_values,
                total_score: cand.score,
            });
        }
        infos
    }

    /// Pre-order derivation trace of the best candidate, followed by the
    /// source sentence.
    pub fn get_applied_rules(&self, _sen_id: usize) -> Vec<String> {
        let mut applied_rules = Vec::new();
        if self.sen_len == 0 {
            return applied_rules;
        }
        let Some(best) = self.chart.cands[0][self.sen_len - 1].top() else {
            return applied_rules;
        };
        self.dump_rules(&mut applied_rules, best);
        applied_rules.push(" ||||| ".to_string());
        let src_sen: Vec<String> = self
            .src_wids
            .iter()
            .map(|&wid| self.models.src_vocab.get_word(wid))
            .collect();
        applied_rules.push(src_sen.join(" "));
        applied_rules
    }

    /// Walk the derivation depth first. For swapped rules the children are
    /// emitted in exchanged order, so the trace reads along the target side.
    fn dump_rules(&self, out: &mut Vec<String>, cand: &Cand) {
        out.push(" ".to_string());
        if cand.child_x1.is_some() {
            out.push(" ( ".to_string());
        }

        let rule = &cand.applied_rule;
        let is_swap = rule
            .tgt_rule
            .as_ref()
            .is_some_and(|r| r.rule_type == RuleType::Swap);
        let mut tgt_nts = ["X1_", "X2_"];
        let mut children = [cand.child_x1.as_ref(), cand.child_x2.as_ref()];
        if is_swap {
            tgt_nts.reverse();
            children.reverse();
        }

        let src_nts = ["X1_", "X2_"];
        let mut text = String::new();
        let mut nt_seen = 0;
        for &wid in &rule.src_ids {
            if wid == self.src_nt_id {
                text.push_str(src_nts[nt_seen.min(1)]);
                nt_seen += 1;
            } else {
                text.push_str(&self.models.src_vocab.get_word(wid));
                text.push('_');
            }
        }
        text.push_str("|||_");
        match &rule.tgt_rule {
            None => text.push_str("NULL_"),
            Some(tgt_rule) => {
                let mut nt_seen = 0;
                for &wid in &tgt_rule.wids {
                    if wid == self.tgt_nt_id {
                        text.push_str(tgt_nts[nt_seen.min(1)]);
                        nt_seen += 1;
                    } else {
                        text.push_str(&self.models.tgt_vocab.get_word(wid));
                        text.push('_');
                    }
                }
            }
        }
        text.push_str(&format!(
            "{}_{}",
            i32::from(rule.generalize_fw_flag),
            i32::from(rule.fwverb_terminal_flag)
        ));
        out.push(text);

        for child in children.into_iter().flatten() {
            self.dump_rules(out, child);
        }
        if cand.child_x1.is_some() {
            out.push(" ) ".to_string());
        }
    }

    /// Render target ids to a string. Negative ids are out-of-vocabulary
    /// copies: rendered from the source vocabulary, or dropped entirely.
    pub(super) fn words_to_str(&self, wids: &[i32], drop_oov: bool) -> String {
        let mut words = Vec::with_capacity(wids.len());
        for &wid in wids {
            if wid >= 0 {
                words.push(self.models.tgt_vocab.get_word(wid));
            } else if !drop_oov {
                words.push(self.models.src_vocab.get_word(-wid));
            }
        }
        words.join(" ")
    }
}
