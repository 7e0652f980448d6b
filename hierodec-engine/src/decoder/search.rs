//! Cube-pruning search over one span.
//!
//! Each span merges its sub-span beams through the enumerated rule
//! instances. A max-priority queue over candidate scores drives a lazy
//! neighbour expansion across the rank cross-product, bounded by
//! `cube_size` pops; survivors go through the span beam's dedup and
//! capacity rules.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cand::{Cand, CandBeam, CandPq, RuleInst};

use super::SentenceDecoder;

/// Identifies a (rule, sub-rank pair) position in the expansion space:
/// both sub-spans, both ranks, and the rank of the target rule.
type ExpansionKey = (i32, i32, i32, i32, i32, i32, i32);

fn expansion_key(cand: &Cand) -> ExpansionKey {
    let rule = &cand.applied_rule;
    (
        rule.span_x1.beg,
        rule.span_x1.len,
        rule.span_x2.beg,
        rule.span_x2.len,
        cand.rank_x1,
        cand.rank_x2,
        rule.tgt_rule_rank,
    )
}

impl SentenceDecoder<'_> {
    /// Fill the beam for span `(beg, len)`. All strictly shorter spans must
    /// already be decoded and sorted.
    pub(super) fn kbest_for_span(&self, beg: usize, len: usize) -> CandBeam {
        let mut pq = CandPq::new();
        for rule in &self.chart.rules[beg][len] {
            self.merge_and_push(rule, 0, 0, &mut pq);
        }

        // Lexical seeds for this span stay in contention with merged
        // candidates.
        let mut beam = self.chart.cands[beg][len].clone();
        let mut expanded: HashSet<ExpansionKey> = HashSet::new();
        let mut popped = 0;
        while popped < self.params.cube_size {
            let Some(mut cand) = pq.pop() else { break };
            // End-of-sentence scoring happens at pop time so the queue
            // ordering within the span stays stable and only survivors of
            // the cube bound are finalized.
            if len + 1 == self.sen_len {
                let inc = self.models.lm.cal_final_increased_lm_score(&cand);
                cand.lm_prob += inc;
                cand.score += self.weights.lm * inc;
            }
            if expanded.insert(expansion_key(&cand)) {
                self.push_neighbours(&cand, &mut pq);
            }
            beam.add(cand, self.params.beam_size);
            popped += 1;
        }
        // Whatever is still queued was dominated and is dropped here.
        beam.sort();
        beam
    }

    /// Merge the sub-candidates at `(rank_x1, rank_x2)` through `rule` and
    /// queue the result. Fails silently when a sub-beam has no candidate at
    /// the requested rank.
    fn merge_and_push(&self, rule: &RuleInst, rank_x1: i32, rank_x2: i32, pq: &mut CandPq) {
        let tgt_rule = rule
            .tgt_rule
            .as_ref()
            .expect("enumerated rules always carry a target side");
        let w = &self.weights;

        if tgt_rule.rule_type.nt_count() == 2 {
            let (Some(x1), Some(x2)) = (
                self.beam(rule.span_x1).at(rank_x1 as usize),
                self.beam(rule.span_x2).at(rank_x2 as usize),
            ) else {
                return;
            };
            let x1 = Arc::clone(x1);
            let x2 = Arc::clone(x2);

            let is_glue = tgt_rule.rule_type.is_glue();
            let fw_flag = i32::from(rule.generalize_fw_flag);
            let fwverb_flag = i32::from(rule.fwverb_terminal_flag);

            let mut tgt_wids =
                Vec::with_capacity(tgt_rule.word_num as usize + x1.tgt_wids.len() + x2.tgt_wids.len());
            let mut nt_seen = 0;
            for &wid in &tgt_rule.wids {
                if wid == self.tgt_nt_id {
                    let child = if nt_seen == 0 { &x1 } else { &x2 };
                    tgt_wids.extend_from_slice(&child.tgt_wids);
                    nt_seen += 1;
                } else {
                    tgt_wids.push(wid);
                }
            }
            let trans_probs: Vec<f64> = tgt_rule
                .probs
                .iter()
                .enumerate()
                .map(|(i, p)| x1.trans_probs[i] + x2.trans_probs[i] + p)
                .collect();

            let mut cand = Cand {
                tgt_wids,
                trans_probs,
                lm_prob: 0.0,
                score: 0.0,
                tgt_word_num: x1.tgt_word_num + x2.tgt_word_num + tgt_rule.word_num,
                // Glue applications count in glue_num, not rule_num
                rule_num: x1.rule_num + x2.rule_num + i32::from(!is_glue),
                glue_num: x1.glue_num + x2.glue_num + i32::from(is_glue),
                generalize_fw_num: x1.generalize_fw_num + x2.generalize_fw_num + fw_flag,
                fwverb_terminal_num: x1.fwverb_terminal_num + x2.fwverb_terminal_num + fwverb_flag,
                rank_x1,
                rank_x2,
                child_x1: Some(Arc::clone(&x1)),
                child_x2: Some(Arc::clone(&x2)),
                applied_rule: rule.clone(),
            };
            let inc = self.models.lm.cal_increased_lm_score(&cand);
            cand.lm_prob = x1.lm_prob + x2.lm_prob + inc;
            cand.score = x1.score
                + x2.score
                + tgt_rule.score
                + w.lm * inc
                + if is_glue { w.glue } else { w.rule_num }
                + w.len * f64::from(tgt_rule.word_num)
                + w.fw * f64::from(fw_flag)
                + w.fwverb * f64::from(fwverb_flag);
            pq.push(cand);
        } else {
            let Some(x1) = self.beam(rule.span_x1).at(rank_x1 as usize) else {
                return;
            };
            let x1 = Arc::clone(x1);

            let fw_flag = i32::from(rule.generalize_fw_flag);
            let fwverb_flag = i32::from(rule.fwverb_terminal_flag);

            let mut tgt_wids = Vec::with_capacity(tgt_rule.word_num as usize + x1.tgt_wids.len());
            for &wid in &tgt_rule.wids {
                if wid == self.tgt_nt_id {
                    tgt_wids.extend_from_slice(&x1.tgt_wids);
                } else {
                    tgt_wids.push(wid);
                }
            }
            let trans_probs: Vec<f64> = tgt_rule
                .probs
                .iter()
                .enumerate()
                .map(|(i, p)| x1.trans_probs[i] + p)
                .collect();

            let mut cand = Cand {
                tgt_wids,
                trans_probs,
                lm_prob: 0.0,
                score: 0.0,
                tgt_word_num: x1.tgt_word_num + tgt_rule.word_num,
                rule_num: x1.rule_num + 1,
                glue_num: x1.glue_num,
                generalize_fw_num: x1.generalize_fw_num + fw_flag,
                fwverb_terminal_num: x1.fwverb_terminal_num + fwverb_flag,
                rank_x1,
                rank_x2: -1,
                child_x1: Some(Arc::clone(&x1)),
                child_x2: None,
                applied_rule: rule.clone(),
            };
            let inc = self.models.lm.cal_increased_lm_score(&cand);
            cand.lm_prob = x1.lm_prob + inc;
            cand.score = x1.score
                + tgt_rule.score
                + w.lm * inc
                + w.rule_num
                + w.len * f64::from(tgt_rule.word_num)
                + w.fw * f64::from(fw_flag)
                + w.fwverb * f64::from(fwverb_flag);
            pq.push(cand);
        }
    }

    /// Queue the rank neighbours of a popped candidate.
    fn push_neighbours(&self, cand: &Cand, pq: &mut CandPq) {
        let rule = &cand.applied_rule;
        self.merge_and_push(rule, cand.rank_x1 + 1, cand.rank_x2, pq);
        if cand.rank_x2 != -1 {
            self.merge_and_push(rule, cand.rank_x1, cand.rank_x2 + 1, pq);
        }
    }
}
