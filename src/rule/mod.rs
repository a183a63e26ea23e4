//! Horn rules, their quality measures, and the rule search machinery.
//!
//! A rule is an ordered sequence of [`Predicate`](crate::atom::Predicate)s
//! where index 0 is the head. Rules are refined by five specialization
//! operators and one generalization operator; every refined candidate
//! passes through fingerprint deduplication, structural validity,
//! tabu pruning, and a fact-coverage gate before it is scored.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cached;
pub mod fingerprint;
pub mod parse;

pub use cached::{CachedRule, EvidenceBatch, MineContext};
pub use fingerprint::{Fingerprint, MultiSet};

/// Outcome of applying an update operator to a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The update succeeded and the rule was re-evaluated.
    Normal,
    /// The updated rule duplicates a previously seen fingerprint.
    Duplicated,
    /// The updated structure is invalid (independent fragment,
    /// duplicated body atom, or head partially duplicated in the body).
    Invalid,
    /// The updated rule covers too few head facts.
    InsufficientCoverage,
    /// The updated rule is a specialization of a tabu fingerprint.
    TabuPruned,
}

/// Rule ranking metric used by the beam search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EvalMetric {
    /// τ = pos / (all + length)
    #[default]
    CompressionRatio,
    /// δ = pos − neg − length
    CompressionCapacity,
    /// h = pos · ln(1 + τ) (FOIL-style)
    InfoGain,
}

/// Quality evaluation of one rule.
///
/// `pos` and `all` are `f64` because the total-entailment term grows as
/// `|constants|^arity`.
#[derive(Clone, Copy, Debug)]
pub struct Eval {
    pos_etls: f64,
    neg_etls: f64,
    all_etls: f64,
    rule_length: usize,
    comp_ratio: f64,
    comp_capacity: f64,
    info_gain: f64,
}

impl Eval {
    pub fn new(pos_etls: f64, all_etls: f64, rule_length: usize) -> Self {
        let ratio = pos_etls / (all_etls + rule_length as f64);
        let comp_ratio = if ratio.is_nan() { 0.0 } else { ratio };
        let neg_etls = all_etls - pos_etls;
        let comp_capacity = pos_etls - neg_etls - rule_length as f64;
        let info_gain = if pos_etls == 0.0 || comp_ratio == 0.0 {
            f64::NEG_INFINITY
        } else {
            pos_etls * (1.0 + comp_ratio).ln()
        };
        Eval {
            pos_etls,
            neg_etls,
            all_etls,
            rule_length,
            comp_ratio,
            comp_capacity,
            info_gain,
        }
    }

    /// The score under the chosen metric.
    pub fn value(&self, metric: EvalMetric) -> f64 {
        match metric {
            EvalMetric::CompressionRatio => self.comp_ratio,
            EvalMetric::CompressionCapacity => self.comp_capacity,
            EvalMetric::InfoGain => self.info_gain,
        }
    }

    /// Whether the rule shrinks the KB at all.
    pub fn useful(&self) -> bool {
        self.comp_capacity > 0.0
    }

    pub fn pos_etls(&self) -> f64 {
        self.pos_etls
    }

    pub fn neg_etls(&self) -> f64 {
        self.neg_etls
    }

    pub fn all_etls(&self) -> f64 {
        self.all_etls
    }

    pub fn rule_length(&self) -> usize {
        self.rule_length
    }
}

impl PartialEq for Eval {
    fn eq(&self, other: &Self) -> bool {
        self.pos_etls == other.pos_etls
            && self.all_etls == other.all_etls
            && self.rule_length == other.rule_length
    }
}

impl fmt::Display for Eval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(+){}; (-){}; |{}|; delta={}; tau={}; h={}",
            self.pos_etls,
            self.neg_etls,
            self.rule_length,
            self.comp_capacity,
            self.comp_ratio,
            self.info_gain
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_scores() {
        let e = Eval::new(5.0, 5.0, 2);
        assert_eq!(5.0 / 7.0, e.value(EvalMetric::CompressionRatio));
        assert_eq!(5.0 - 0.0 - 2.0, e.value(EvalMetric::CompressionCapacity));
        assert!(e.value(EvalMetric::InfoGain) > 0.0);
        assert!(e.useful());
    }

    #[test]
    fn eval_zero_over_zero_ratio_is_zero() {
        let e = Eval::new(0.0, 0.0, 0);
        assert_eq!(0.0, e.value(EvalMetric::CompressionRatio));
        assert_eq!(f64::NEG_INFINITY, e.value(EvalMetric::InfoGain));
        assert!(!e.useful());
    }

    #[test]
    fn eval_without_positives_is_useless() {
        let e = Eval::new(0.0, 2.0, 3);
        assert!(!e.useful());
        assert_eq!(f64::NEG_INFINITY, e.value(EvalMetric::InfoGain));
        assert_eq!(-5.0, e.value(EvalMetric::CompressionCapacity));
    }

    #[test]
    fn eval_equality_ignores_derived_scores() {
        assert_eq!(Eval::new(2.0, 4.0, 3), Eval::new(2.0, 4.0, 3));
        assert_ne!(Eval::new(2.0, 4.0, 3), Eval::new(2.0, 5.0, 3));
    }
}
