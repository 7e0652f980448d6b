//! Rule table: ranked target rules indexed by source-side pattern.
//!
//! A rule line is
//!
//! ```text
//! src tokens ||| tgt tokens ||| p1 p2 ... pN
//! ```
//!
//! with nonterminals written `[X,1]` / `[X,2]`. The source side numbers them
//! left to right; the target-side order of the two markers distinguishes
//! monotone rules from swapped ones. Every table also carries the built-in
//! glue rule under the two-nonterminal source pattern.
//!
//! Patterns are indexed by a double-array trie over the source id sequence,
//! so all rules matching any prefix of a token window come out of a single
//! `prefix_match` walk.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use yada::DoubleArray;
use yada::builder::DoubleArrayBuilder;

use crate::config::FeatureWeight;
use crate::vocab::Vocab;

/// Errors that can occur while building a rule table.
#[derive(Debug, thiserror::Error)]
pub enum RuleTableError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid rule table: {0}")]
    Format(String),
}

type Result<T> = std::result::Result<T, RuleTableError>;

/// Source ids must fit the 28-bit trie key packing.
const MAX_ID: i32 = 1 << 28;

/// Shape of a rule, driving scoring and target surface assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Lexical phrase, no nonterminals
    Lexical,
    /// One nonterminal
    SingleNt,
    /// Two nonterminals, target side in source order
    Monotone,
    /// Two nonterminals, target side in swapped order
    Swap,
    /// The glue rule: monotone concatenation of two sub-translations
    Glue,
}

impl RuleType {
    /// Number of nonterminals on either side of the rule.
    pub fn nt_count(self) -> usize {
        match self {
            RuleType::Lexical => 0,
            RuleType::SingleNt => 1,
            RuleType::Monotone | RuleType::Swap | RuleType::Glue => 2,
        }
    }

    pub fn is_glue(self) -> bool {
        matches!(self, RuleType::Glue)
    }
}

/// The target side of a grammar rule, owned by the table and shared into
/// rule instances and candidates.
#[derive(Debug)]
pub struct TargetRule {
    /// Target token ids, nonterminal positions holding the marker id
    pub wids: Vec<i32>,
    /// Translation-model sub-scores (`prob_num` of them)
    pub probs: Vec<f64>,
    /// Weighted sub-score contribution, precomputed against the loaded weights
    pub score: f64,
    /// Number of terminal target tokens
    pub word_num: i32,
    pub rule_type: RuleType,
}

/// A trie-indexed rule table.
pub struct RuleTable {
    trie: DoubleArray<Vec<u8>>,
    /// Ranked rule lists, parallel to the trie values. Best-first by the
    /// precomputed weighted score; the glue rule is rank 0 of its pattern.
    entries: Vec<Vec<Arc<TargetRule>>>,
    src_nt_id: i32,
    tgt_nt_id: i32,
}

impl RuleTable {
    /// Load a rule table from a text file.
    ///
    /// Malformed lines are skipped with a warning. An empty file yields a
    /// table containing only the built-in glue rule.
    pub fn load(
        path: impl AsRef<Path>,
        src_vocab: &Vocab,
        tgt_vocab: &Vocab,
        weights: &FeatureWeight,
        prob_num: usize,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);

        let mut groups: HashMap<Vec<i32>, Vec<Arc<TargetRule>>> = HashMap::new();
        let mut skipped = 0usize;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_rule_line(line, src_vocab, tgt_vocab, weights, prob_num) {
                Ok((pattern, rule)) => {
                    groups.entry(pattern).or_default().push(Arc::new(rule));
                }
                Err(reason) => {
                    skipped += 1;
                    tracing::warn!("skipping rule line {}: {}", lineno + 1, reason);
                }
            }
        }
        if skipped > 0 {
            tracing::warn!("skipped {} malformed rule lines", skipped);
        }

        Self::build(groups, src_vocab, tgt_vocab, prob_num)
    }

    /// Build the trie from grouped rules, inserting the glue entry.
    fn build(
        mut groups: HashMap<Vec<i32>, Vec<Arc<TargetRule>>>,
        src_vocab: &Vocab,
        tgt_vocab: &Vocab,
        prob_num: usize,
    ) -> Result<Self> {
        let src_nt_id = src_vocab.nt_id();
        let tgt_nt_id = tgt_vocab.nt_id();

        for rules in groups.values_mut() {
            rules.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        // The glue rule stays rank 0 of its pattern regardless of what the
        // file contained for the same source side.
        let glue = Arc::new(TargetRule {
            wids: vec![tgt_nt_id, tgt_nt_id],
            probs: vec![0.0; prob_num],
            score: 0.0,
            word_num: 0,
            rule_type: RuleType::Glue,
        });
        groups
            .entry(vec![src_nt_id, src_nt_id])
            .or_default()
            .insert(0, glue);

        // Sorted ids sort identically to their packed bytes, as required by
        // the trie builder.
        let mut patterns: Vec<Vec<i32>> = groups.keys().cloned().collect();
        patterns.sort();

        let mut keys: Vec<(Vec<u8>, u32)> = Vec::with_capacity(patterns.len());
        let mut entries = Vec::with_capacity(patterns.len());
        for (i, pattern) in patterns.iter().enumerate() {
            if let Some(&id) = pattern.iter().find(|&&id| !(0..MAX_ID).contains(&id)) {
                return Err(RuleTableError::Format(format!(
                    "source id {} out of trie key range",
                    id
                )));
            }
            keys.push((encode_ids(pattern), i as u32));
            entries.push(groups.remove(pattern).expect("pattern key must exist"));
        }
        let keyset: Vec<(&[u8], u32)> = keys.iter().map(|(k, v)| (k.as_slice(), *v)).collect();

        let trie_bytes = DoubleArrayBuilder::build(&keyset)
            .ok_or_else(|| RuleTableError::Format("failed to build double-array trie".to_string()))?;

        Ok(RuleTable {
            trie: DoubleArray::new(trie_bytes),
            entries,
            src_nt_id,
            tgt_nt_id,
        })
    }

    /// Match every prefix of `ids[start..]` against the table.
    ///
    /// The result has one slot per prefix length; slot `k` holds the ranked
    /// rule list for the length-`k+1` prefix when the table has an exact
    /// entry for it.
    pub fn prefix_match<'t>(&'t self, ids: &[i32], start: usize) -> Vec<Option<&'t [Arc<TargetRule>]>> {
        let rest = ids.get(start..).unwrap_or(&[]);
        let mut out: Vec<Option<&[Arc<TargetRule>]>> = vec![None; rest.len()];
        if rest.is_empty() {
            return out;
        }
        let key = encode_ids(rest);
        for (value, len) in self.trie.common_prefix_search(&key) {
            let k = len / 4;
            if k >= 1
                && k <= rest.len()
                && let Some(entry) = self.entries.get(value as usize)
            {
                out[k - 1] = Some(entry.as_slice());
            }
        }
        out
    }

    /// Id of the source-side nonterminal marker.
    pub fn src_nt_id(&self) -> i32 {
        self.src_nt_id
    }

    /// Id of the target-side nonterminal marker.
    pub fn tgt_nt_id(&self) -> i32 {
        self.tgt_nt_id
    }

    /// Number of distinct source patterns.
    pub fn pattern_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of target rules, including the built-in glue rule.
    pub fn rule_count(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }
}

/// Pack each id into 4 bytes of 7 significant bits with the high bit set.
///
/// Trie keys are raw bytes and must not contain zeros; the fixed width also
/// keeps every match length on an id boundary.
fn encode_ids(ids: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 4);
    for &id in ids {
        let v = id as u32;
        out.push(0x80 | ((v >> 21) & 0x7f) as u8);
        out.push(0x80 | ((v >> 14) & 0x7f) as u8);
        out.push(0x80 | ((v >> 7) & 0x7f) as u8);
        out.push(0x80 | (v & 0x7f) as u8);
    }
    out
}

/// Parse one rule line into its source pattern and target rule.
fn parse_rule_line(
    line: &str,
    src_vocab: &Vocab,
    tgt_vocab: &Vocab,
    weights: &FeatureWeight,
    prob_num: usize,
) -> std::result::Result<(Vec<i32>, TargetRule), String> {
    let fields: Vec<&str> = line.split("|||").map(str::trim).collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 fields, got {}", fields.len()));
    }

    let mut pattern = Vec::new();
    let mut src_nts = 0u8;
    for tok in fields[0].split_whitespace() {
        match tok {
            "[X,1]" => {
                if src_nts != 0 {
                    return Err("source nonterminals must be numbered left to right".to_string());
                }
                src_nts = 1;
                pattern.push(src_vocab.nt_id());
            }
            "[X,2]" => {
                if src_nts != 1 {
                    return Err("source nonterminals must be numbered left to right".to_string());
                }
                src_nts = 2;
                pattern.push(src_vocab.nt_id());
            }
            _ => pattern.push(src_vocab.get_id(tok)),
        }
    }
    if pattern.is_empty() {
        return Err("empty source side".to_string());
    }

    let mut wids = Vec::new();
    let mut tgt_order: Vec<u8> = Vec::new();
    for tok in fields[1].split_whitespace() {
        match tok {
            "[X,1]" => {
                tgt_order.push(1);
                wids.push(tgt_vocab.nt_id());
            }
            "[X,2]" => {
                tgt_order.push(2);
                wids.push(tgt_vocab.nt_id());
            }
            _ => wids.push(tgt_vocab.get_id(tok)),
        }
    }

    let rule_type = match (src_nts, tgt_order.as_slice()) {
        (0, []) => RuleType::Lexical,
        (1, [1]) => RuleType::SingleNt,
        (2, [1, 2]) => RuleType::Monotone,
        (2, [2, 1]) => RuleType::Swap,
        _ => {
            return Err("nonterminals disagree between source and target sides".to_string());
        }
    };

    let probs: Vec<f64> = fields[2]
        .split_whitespace()
        .map(|p| p.parse::<f64>().map_err(|e| format!("bad score '{}': {}", p, e)))
        .collect::<std::result::Result<_, _>>()?;
    if probs.len() != prob_num {
        return Err(format!("expected {} scores, got {}", prob_num, probs.len()));
    }

    let score = probs.iter().zip(&weights.trans).map(|(p, w)| p * w).sum();
    let word_num = (wids.len() - tgt_order.len()) as i32;

    Ok((
        pattern,
        TargetRule {
            wids,
            probs,
            score,
            word_num,
            rule_type,
        },
    ))
}
