//! Lexical seeding and enumeration of the hierarchical rule patterns.
//!
//! Source patterns come in four families besides plain phrases, named by
//! their terminal runs (A, B, C) and nonterminals (X): `AX / XA / XAX`,
//! `AXB / AXBX / XAXB`, `AXBXC`, and the glue pattern `X X`. Non-glue rule
//! instances may cover at most `span_len_max` source tokens; glue instances
//! are anchored at the sentence start and may reach the end.

use std::sync::Arc;

use crate::cand::{Cand, RuleInst, Span};
use crate::ruletable::{RuleType, TargetRule};

use super::SentenceDecoder;

impl<'a> SentenceDecoder<'a> {
    /// Seed every span that matches a lexical phrase rule. A single word
    /// with no match at all becomes a copy candidate carrying its negated
    /// source id.
    pub(super) fn seed_phrase_cands(&mut self) {
        let models = self.models;
        for beg in 0..self.sen_len {
            let matched = models.ruletable.prefix_match(&self.src_wids, beg);
            for (k, slot) in matched.iter().enumerate() {
                let Some(rules) = slot else {
                    if k == 0 {
                        let cand = self.new_oov_cand(self.src_wids[beg]);
                        self.chart.cands[beg][0].add(cand, self.params.beam_size);
                    }
                    continue;
                };
                for (rank, tgt_rule) in rules.iter().enumerate() {
                    let mut cand = Cand {
                        tgt_wids: tgt_rule.wids.clone(),
                        trans_probs: tgt_rule.probs.clone(),
                        lm_prob: 0.0,
                        score: tgt_rule.score,
                        tgt_word_num: tgt_rule.word_num,
                        rule_num: 1,
                        glue_num: 0,
                        generalize_fw_num: 0,
                        fwverb_terminal_num: 0,
                        rank_x1: -1,
                        rank_x2: -1,
                        child_x1: None,
                        child_x2: None,
                        applied_rule: RuleInst {
                            src_ids: self.src_wids[beg..=beg + k].to_vec(),
                            tgt_rule: Some(Arc::clone(tgt_rule)),
                            tgt_rule_rank: rank as i32,
                            span_x1: Span::NONE,
                            span_x2: Span::NONE,
                            generalize_fw_flag: false,
                            fwverb_terminal_flag: false,
                        },
                    };
                    cand.lm_prob = models.lm.cal_increased_lm_score(&cand);
                    cand.score += self.weights.rule_num * f64::from(cand.rule_num)
                        + self.weights.len * f64::from(cand.tgt_word_num)
                        + self.weights.lm * cand.lm_prob;
                    self.chart.cands[beg][k].add(cand, self.params.beam_size);
                }
            }
        }
    }

    fn new_oov_cand(&self, src_id: i32) -> Cand {
        let mut cand = Cand {
            tgt_wids: vec![-src_id],
            trans_probs: vec![0.0; self.params.prob_num],
            lm_prob: 0.0,
            score: 0.0,
            tgt_word_num: 1,
            rule_num: 1,
            glue_num: 0,
            generalize_fw_num: 0,
            fwverb_terminal_num: 0,
            rank_x1: -1,
            rank_x2: -1,
            child_x1: None,
            child_x2: None,
            applied_rule: RuleInst::oov(src_id),
        };
        cand.lm_prob = self.models.lm.cal_increased_lm_score(&cand);
        cand.score = self.weights.rule_num * f64::from(cand.rule_num)
            + self.weights.len * f64::from(cand.tgt_word_num)
            + self.weights.lm * cand.lm_prob;
        cand
    }

    /// Fill `chart.rules` with every applicable rule instance.
    pub(super) fn enumerate_hiero_rules(&mut self) {
        self.enumerate_ax_family();
        self.enumerate_axb_family();
        self.enumerate_axbxc_family();
        self.enumerate_glue_rules();
        let total: usize = self.chart.rules.iter().flatten().map(Vec::len).sum();
        tracing::debug!(instances = total, "rule enumeration done");
    }

    /// Ranked rules for an exact full-pattern match, if any.
    fn pattern_rules(&self, pattern: &[i32]) -> Option<&'a [Arc<TargetRule>]> {
        let models = self.models;
        let matched = models.ruletable.prefix_match(pattern, 0);
        matched.last().copied().flatten()
    }

    /// Patterns with one terminal run: `A X`, `X A`, and `X A X`.
    fn enumerate_ax_family(&mut self) {
        let n = self.sen_len;
        let max = self.params.span_len_max;
        for beg_a in 0..n {
            for len_a in 0..n - beg_a {
                if len_a + 1 > max {
                    break;
                }
                let ids_a = self.src_wids[beg_a..=beg_a + len_a].to_vec();

                // X A
                if beg_a > 0 {
                    let mut pattern = Vec::with_capacity(ids_a.len() + 1);
                    pattern.push(self.src_nt_id);
                    pattern.extend_from_slice(&ids_a);
                    if let Some(rules) = self.pattern_rules(&pattern) {
                        for len_x in 0..beg_a {
                            if len_x + len_a + 2 > max {
                                break;
                            }
                            let beg_x = beg_a - len_x - 1;
                            self.add_matched_rules(
                                rules,
                                &pattern,
                                Span::new(beg_x, len_x + len_a + 1),
                                Span::new(beg_x, len_x),
                                Span::NONE,
                            );
                        }
                    }
                }

                // A X
                if beg_a + len_a < n - 1 {
                    let mut pattern = ids_a.clone();
                    pattern.push(self.src_nt_id);
                    if let Some(rules) = self.pattern_rules(&pattern) {
                        let beg_x = beg_a + len_a + 1;
                        for len_x in 0..n - beg_x {
                            if len_a + len_x + 2 > max {
                                break;
                            }
                            self.add_matched_rules(
                                rules,
                                &pattern,
                                Span::new(beg_a, len_a + len_x + 1),
                                Span::new(beg_x, len_x),
                                Span::NONE,
                            );
                        }
                    }
                }

                // X A X
                if beg_a > 0 && beg_a + len_a < n - 1 {
                    let mut pattern = Vec::with_capacity(ids_a.len() + 2);
                    pattern.push(self.src_nt_id);
                    pattern.extend_from_slice(&ids_a);
                    pattern.push(self.src_nt_id);
                    if let Some(rules) = self.pattern_rules(&pattern) {
                        for len_x1 in 0..beg_a {
                            if len_x1 + len_a + 3 > max {
                                break;
                            }
                            let beg_x1 = beg_a - len_x1 - 1;
                            let beg_x2 = beg_a + len_a + 1;
                            for len_x2 in 0..n - beg_x2 {
                                if len_x1 + len_a + len_x2 + 3 > max {
                                    break;
                                }
                                self.add_matched_rules(
                                    rules,
                                    &pattern,
                                    Span::new(beg_x1, len_x1 + len_a + len_x2 + 2),
                                    Span::new(beg_x1, len_x1),
                                    Span::new(beg_x2, len_x2),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    /// Patterns with an inner nonterminal: `A X B`, `A X B X`, and `X A X B`.
    fn enumerate_axb_family(&mut self) {
        let n = self.sen_len;
        let max = self.params.span_len_max;
        for beg in 0..n {
            // The region holding A, the inner X, and B needs 3 tokens.
            for len in 2..n - beg {
                if len + 1 > max {
                    break;
                }
                for beg_x in beg + 1..beg + len {
                    for len_x in 0..beg + len - beg_x {
                        let mut ids_axb = self.src_wids[beg..beg_x].to_vec();
                        ids_axb.push(self.src_nt_id);
                        ids_axb.extend_from_slice(&self.src_wids[beg_x + len_x + 1..=beg + len]);

                        // X A X B
                        if beg > 0 {
                            let mut pattern = Vec::with_capacity(ids_axb.len() + 1);
                            pattern.push(self.src_nt_id);
                            pattern.extend_from_slice(&ids_axb);
                            if let Some(rules) = self.pattern_rules(&pattern) {
                                for len_x1 in 0..beg {
                                    if len_x1 + len + 2 > max {
                                        break;
                                    }
                                    let beg_x1 = beg - len_x1 - 1;
                                    self.add_matched_rules(
                                        rules,
                                        &pattern,
                                        Span::new(beg_x1, len_x1 + len + 1),
                                        Span::new(beg_x1, len_x1),
                                        Span::new(beg_x, len_x),
                                    );
                                }
                            }
                        }

                        // A X B X
                        if beg + len < n - 1 {
                            let mut pattern = ids_axb.clone();
                            pattern.push(self.src_nt_id);
                            if let Some(rules) = self.pattern_rules(&pattern) {
                                let beg_x2 = beg + len + 1;
                                for len_x2 in 0..n - beg_x2 {
                                    if len + len_x2 + 2 > max {
                                        break;
                                    }
                                    self.add_matched_rules(
                                        rules,
                                        &pattern,
                                        Span::new(beg, len + len_x2 + 1),
                                        Span::new(beg_x, len_x),
                                        Span::new(beg_x2, len_x2),
                                    );
                                }
                            }
                        }

                        // A X B
                        if let Some(rules) = self.pattern_rules(&ids_axb) {
                            self.add_matched_rules(
                                rules,
                                &ids_axb,
                                Span::new(beg, len),
                                Span::new(beg_x, len_x),
                                Span::NONE,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Patterns with two inner nonterminals: `A X B X C`.
    fn enumerate_axbxc_family(&mut self) {
        let n = self.sen_len;
        let max = self.params.span_len_max;
        for beg in 0..n {
            // A, B and C are all nonempty, so the pattern needs 5 tokens.
            for len in 4..n - beg {
                if len + 1 > max {
                    break;
                }
                let end = beg + len;
                for beg_x1 in beg + 1..end {
                    for end_x1 in beg_x1..end {
                        for beg_x2 in end_x1 + 2..end {
                            for end_x2 in beg_x2..end {
                                let mut pattern = self.src_wids[beg..beg_x1].to_vec();
                                pattern.push(self.src_nt_id);
                                pattern.extend_from_slice(&self.src_wids[end_x1 + 1..beg_x2]);
                                pattern.push(self.src_nt_id);
                                pattern.extend_from_slice(&self.src_wids[end_x2 + 1..=end]);
                                if let Some(rules) = self.pattern_rules(&pattern) {
                                    self.add_matched_rules(
                                        rules,
                                        &pattern,
                                        Span::new(beg, len),
                                        Span::new(beg_x1, end_x1 - beg_x1),
                                        Span::new(beg_x2, end_x2 - beg_x2),
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Glue concatenations, anchored at the sentence start. Glue spans are
    /// exempt from the length cap and may reach the end of the sentence.
    fn enumerate_glue_rules(&mut self) {
        let n = self.sen_len;
        let pattern = vec![self.src_nt_id, self.src_nt_id];
        let Some(rules) = self.pattern_rules(&pattern) else {
            return;
        };
        // Rank 0 of the two-nonterminal pattern is always the glue rule.
        let glue = &rules[..1];
        for len in 1..n {
            for len_x1 in 0..len {
                self.add_matched_rules(
                    glue,
                    &pattern,
                    Span::new(0, len),
                    Span::new(0, len_x1),
                    Span::new(len_x1 + 1, len - len_x1 - 1),
                );
            }
        }
    }

    /// Record every matched rule as an instance over `span`. For swapped
    /// rules the stored sub-spans are exchanged so that `span_x1` always
    /// binds the leftmost target-side nonterminal.
    fn add_matched_rules(
        &mut self,
        rules: &[Arc<TargetRule>],
        pattern: &[i32],
        span: Span,
        x1: Span,
        x2: Span,
    ) {
        let fw = self.only_function_words(x1) || self.only_function_words(x2);
        let fwverb = self.fwverb_flag(span, x1, x2);
        let slot = &mut self.chart.rules[span.beg as usize][span.len as usize];
        for (rank, tgt_rule) in rules.iter().enumerate() {
            let (span_x1, span_x2) = if tgt_rule.rule_type == RuleType::Swap {
                (x2, x1)
            } else {
                (x1, x2)
            };
            slot.push(RuleInst {
                src_ids: pattern.to_vec(),
                tgt_rule: Some(Arc::clone(tgt_rule)),
                tgt_rule_rank: rank as i32,
                span_x1,
                span_x2,
                generalize_fw_flag: fw,
                fwverb_terminal_flag: fwverb,
            });
        }
    }

    /// Whether a (present) sub-span consists only of function words.
    fn only_function_words(&self, span: Span) -> bool {
        if span.is_none() {
            return false;
        }
        (span.beg..=span.end()).all(|i| self.fw_flags[i as usize])
    }

    /// Whether every terminal adjacent to a bound sub-span inside the
    /// covering span is a verb or function word. Vacuously true when no such
    /// terminal exists, which includes glue instances.
    fn fwverb_flag(&self, span: Span, x1: Span, x2: Span) -> bool {
        let mut ok = true;
        if !x1.is_none() {
            ok &= self.fwverb_ok_at(span, x2, x1.beg - 1);
            ok &= self.fwverb_ok_at(span, x2, x1.end() + 1);
        }
        if !x2.is_none() {
            ok &= self.fwverb_ok_at(span, x1, x2.beg - 1);
            ok &= self.fwverb_ok_at(span, x1, x2.end() + 1);
        }
        ok
    }

    /// Check one adjacency position. Positions outside the covering span or
    /// inside the other sub-span are not terminals of the rule.
    fn fwverb_ok_at(&self, span: Span, other: Span, pos: i32) -> bool {
        if pos < span.beg || pos > span.end() {
            return true;
        }
        if !other.is_none() && pos >= other.beg && pos <= other.end() {
            return true;
        }
        self.verb_flags[pos as usize] || self.fw_flags[pos as usize]
    }
}
