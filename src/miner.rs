//! Per-relation rule mining: beam search over rule refinements.
//!
//! For one target relation the miner repeatedly runs `find_rule`: start
//! from the most general rule, expand every beam rule through all
//! specialization and generalization operators, keep the `beamwidth`
//! best strict improvements, and stop when a local optimum beats every
//! candidate, when the best candidate reaches the stopping compression
//! ratio, or when it has no negative entailments left. Each accepted
//! rule marks its covered head records as entailed and adds its
//! groundings to the dependency graph; mining ends when the relation is
//! fully covered or no useful rule remains.
//!
//! Candidate enumeration is deterministic: argument slots are visited
//! in ascending `(predicate, argument)` order and specializations come
//! before generalizations, so identical inputs yield identical runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::atom::{arg, ArgLocation, Predicate, Record};
use crate::graph::DependencyGraph;
use crate::kb::{SimpleKb, SimpleRelation};
use crate::rule::{CachedRule, EvalMetric, MineContext, UpdateStatus};

/// Cooperative interruption signal.
///
/// The host sets the flag (typically from a signal handler thread); the
/// miner polls it at the top of each beam round and returns the best
/// rule found so far.
#[derive(Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn should_continue(&self) -> bool {
        !self.0.load(Ordering::Relaxed)
    }
}

/// Counters of one miner's search effort.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct MinerStats {
    /// Candidates that survived all gates and were re-evaluated.
    pub evaluated_candidates: usize,
    /// Candidates discarded by each gate.
    pub duplicated: usize,
    pub invalid: usize,
    pub insufficient_coverage: usize,
    pub tabu_pruned: usize,
    /// Head records entailed by accepted rules.
    pub entailed_records: usize,
}

impl MinerStats {
    pub fn merge(&mut self, other: &MinerStats) {
        self.evaluated_candidates += other.evaluated_candidates;
        self.duplicated += other.duplicated;
        self.invalid += other.invalid;
        self.insufficient_coverage += other.insufficient_coverage;
        self.tabu_pruned += other.tabu_pruned;
        self.entailed_records += other.entailed_records;
    }
}

/// Beam-search miner for a single target relation.
pub struct RelationMiner<'a> {
    kb: &'a mut SimpleKb,
    target_relation: usize,
    eval_metric: EvalMetric,
    beamwidth: usize,
    stop_compression_ratio: f64,
    ctx: MineContext,
    graph: &'a mut DependencyGraph,
    interrupt: InterruptFlag,
    hypothesis: Vec<CachedRule>,
    counterexamples: HashSet<Record>,
    stats: MinerStats,
}

impl<'a> RelationMiner<'a> {
    pub fn new(
        kb: &'a mut SimpleKb,
        target_relation: usize,
        eval_metric: EvalMetric,
        beamwidth: usize,
        stop_compression_ratio: f64,
        min_fact_coverage: f64,
        graph: &'a mut DependencyGraph,
        interrupt: InterruptFlag,
    ) -> Self {
        let mut ctx = MineContext::new(min_fact_coverage);

        /* Size the pool for one relation's worth of operator results */
        let num_relations = kb.total_relations();
        let total_promising: usize = (0..num_relations)
            .map(|r| kb.promising_constants_of(r).iter().map(Vec::len).sum::<usize>())
            .sum();
        let sum_arity: usize = kb.relations().iter().map(SimpleRelation::arity).sum();
        let sum_sq_arity: usize = kb.relations().iter().map(|r| r.arity() * r.arity()).sum();
        ctx.pool.reserve(
            num_relations,
            total_promising,
            kb.total_constants() as usize,
            sum_sq_arity,
            sum_arity,
        );

        RelationMiner {
            kb,
            target_relation,
            eval_metric,
            beamwidth,
            stop_compression_ratio,
            ctx,
            graph,
            interrupt,
            hypothesis: Vec::new(),
            counterexamples: HashSet::new(),
            stats: MinerStats::default(),
        }
    }

    /// Mine rules until the relation is covered, no useful rule
    /// remains, or the miner is interrupted.
    pub fn run(&mut self) {
        let total_facts = self.kb.relation(self.target_relation).total_rows();
        let mut covered_facts = 0usize;
        while self.interrupt.should_continue() && covered_facts < total_facts {
            let Some(mut rule) = self.find_rule() else {
                break;
            };
            covered_facts += self.update_kb_and_graph(&rule);
            info!(
                relation = %self.kb.relation(self.target_relation).name,
                coverage = %format!("{covered_facts}/{total_facts}"),
                rule = %rule.to_dump_string(self.kb.relation_names()),
                "rule accepted"
            );
            rule.release_memory();
            self.hypothesis.push(rule);
        }
        debug!(
            relation = %self.kb.relation(self.target_relation).name,
            rules = self.hypothesis.len(),
            "relation mining done"
        );
    }

    /// The accepted rules and counterexamples, consuming the miner.
    pub fn into_results(self) -> (Vec<CachedRule>, HashSet<Record>, MinerStats, MineContext) {
        (self.hypothesis, self.counterexamples, self.stats, self.ctx)
    }

    pub fn stats(&self) -> &MinerStats {
        &self.stats
    }

    pub fn context(&self) -> &MineContext {
        &self.ctx
    }

    /// One beam search pass; returns the rule to commit, if any.
    fn find_rule(&mut self) -> Option<CachedRule> {
        self.ctx.reset_fingerprint_cache();
        let mut beams: Vec<CachedRule> =
            vec![CachedRule::new(self.target_relation, self.kb, &mut self.ctx)];
        let mut best_local_optimum: Option<CachedRule> = None;
        let metric = self.eval_metric;

        loop {
            /* Expand every beam rule into the candidate array */
            let mut top_candidates: Vec<Option<CachedRule>> =
                (0..self.beamwidth).map(|_| None).collect();
            for beam_rule in &beams {
                beam_rule.update_cache_indices(&mut self.ctx);
                debug!(
                    rule = %beam_rule.to_display_string(self.kb.relation_names()),
                    "extending"
                );
                let specializations = self.find_specializations(beam_rule, &mut top_candidates);
                let generalizations = self.find_generalizations(beam_rule, &mut top_candidates);
                if specializations == 0 && generalizations == 0 {
                    /* No strictly better refinement: a local optimum */
                    let better = best_local_optimum.as_ref().map_or(true, |best| {
                        best.eval().value(metric) < beam_rule.eval().value(metric)
                    });
                    if better {
                        best_local_optimum = Some(beam_rule.clone());
                    }
                }
            }

            if !self.interrupt.should_continue() {
                /* Interrupted: the best of everything in flight */
                let best = beams
                    .into_iter()
                    .chain(top_candidates.into_iter().flatten())
                    .reduce(|best, r| {
                        if best.eval().value(metric) < r.eval().value(metric) {
                            r
                        } else {
                            best
                        }
                    });
                return best.filter(|r| r.eval().useful());
            }

            /* First-found candidate wins ties */
            let mut best_candidate_idx: Option<usize> = None;
            let mut best_score = f64::NEG_INFINITY;
            for (i, slot) in top_candidates.iter().enumerate() {
                if let Some(candidate) = slot {
                    let score = candidate.eval().value(metric);
                    if best_candidate_idx.is_none() || score > best_score {
                        best_candidate_idx = Some(i);
                        best_score = score;
                    }
                }
            }

            /* A dominating local optimum ends the search */
            if let Some(local_optimum) = &best_local_optimum {
                let local_score = local_optimum.eval().value(metric);
                let candidate_score = best_candidate_idx
                    .and_then(|i| top_candidates[i].as_ref())
                    .map(|c| c.eval().value(metric));
                if candidate_score.map_or(true, |score| local_score > score) {
                    return best_local_optimum.filter(|r| r.eval().useful());
                }
            }

            /* The candidate array is non-empty from here on */
            let best_idx = best_candidate_idx?;
            let best_eval = *top_candidates[best_idx]
                .as_ref()
                .map(CachedRule::eval)
                .unwrap_or_else(|| unreachable!("index points at a candidate"));
            if self.stop_compression_ratio <= best_eval.value(EvalMetric::CompressionRatio)
                || best_eval.neg_etls() == 0.0
            {
                let best = top_candidates[best_idx].take();
                return best.filter(|r| r.eval().useful());
            }

            /* Next round climbs from the surviving candidates */
            beams = top_candidates.into_iter().flatten().collect();
            best_local_optimum = None;
        }
    }

    /// Apply every specialization of `rule`; returns how many strict
    /// improvements were found.
    fn find_specializations(
        &mut self,
        rule: &CachedRule,
        candidates: &mut [Option<CachedRule>],
    ) -> usize {
        let mut empty_args: Vec<ArgLocation> = Vec::new();
        for (pred_idx, predicate) in rule.structure().iter().enumerate() {
            for (arg_idx, &argument) in predicate.args.iter().enumerate() {
                if arg::is_empty(argument) {
                    empty_args.push(ArgLocation::new(pred_idx, arg_idx));
                }
            }
        }

        let num_relations = self.kb.total_relations();
        let mut improved = 0usize;

        /* Cases 1 and 2: bind to an existing LV */
        for var_id in 0..rule.used_limited_vars() {
            for vacant in &empty_args {
                let mut new_rule = rule.clone();
                let status = new_rule.specialize_case1(
                    vacant.pred_idx,
                    vacant.arg_idx,
                    var_id,
                    self.kb,
                    &mut self.ctx,
                );
                improved += self.check_then_add(status, new_rule, rule, candidates);
            }
            for rel_id in 0..num_relations {
                for arg_idx in 0..self.kb.relation(rel_id).arity() {
                    let mut new_rule = rule.clone();
                    let status =
                        new_rule.specialize_case2(rel_id, arg_idx, var_id, self.kb, &mut self.ctx);
                    improved += self.check_then_add(status, new_rule, rule, candidates);
                }
            }
        }

        /* Cases 3, 4, and 5: fresh LVs and constants */
        for (i, &vacant1) in empty_args.iter().enumerate() {
            /* Case 5: promising constants of the vacant column */
            let symbol = rule.predicate(vacant1.pred_idx).symbol;
            let constants: Vec<i32> = self
                .kb
                .promising_constants_of(symbol)
                .get(vacant1.arg_idx)
                .cloned()
                .unwrap_or_default();
            for constant in constants {
                let mut new_rule = rule.clone();
                let status = new_rule.specialize_case5(
                    vacant1.pred_idx,
                    vacant1.arg_idx,
                    constant,
                    self.kb,
                    &mut self.ctx,
                );
                improved += self.check_then_add(status, new_rule, rule, candidates);
            }

            /* Case 3: link with a later empty argument */
            for &vacant2 in &empty_args[i + 1..] {
                let mut new_rule = rule.clone();
                let status = new_rule.specialize_case3(
                    vacant1.pred_idx,
                    vacant1.arg_idx,
                    vacant2.pred_idx,
                    vacant2.arg_idx,
                    self.kb,
                    &mut self.ctx,
                );
                improved += self.check_then_add(status, new_rule, rule, candidates);
            }

            /* Case 4: link with a column of a fresh body atom */
            for rel_id in 0..num_relations {
                for arg_idx in 0..self.kb.relation(rel_id).arity() {
                    let mut new_rule = rule.clone();
                    let status = new_rule.specialize_case4(
                        rel_id,
                        arg_idx,
                        vacant1.pred_idx,
                        vacant1.arg_idx,
                        self.kb,
                        &mut self.ctx,
                    );
                    improved += self.check_then_add(status, new_rule, rule, candidates);
                }
            }
        }
        improved
    }

    /// Apply every generalization of `rule` (one non-empty argument
    /// removed); returns how many strict improvements were found.
    fn find_generalizations(
        &mut self,
        rule: &CachedRule,
        candidates: &mut [Option<CachedRule>],
    ) -> usize {
        let mut improved = 0usize;
        for pred_idx in 0..rule.num_predicates() {
            for arg_idx in 0..rule.predicate(pred_idx).arity() {
                if arg::is_non_empty(rule.predicate(pred_idx).args[arg_idx]) {
                    let mut new_rule = rule.clone();
                    let status = new_rule.generalize(pred_idx, arg_idx, &mut self.ctx);
                    improved += self.check_then_add(status, new_rule, rule, candidates);
                }
            }
        }
        improved
    }

    /// Keep a successfully updated rule if it strictly improves on its
    /// origin, evicting the weakest candidate.
    fn check_then_add(
        &mut self,
        status: UpdateStatus,
        updated: CachedRule,
        original: &CachedRule,
        candidates: &mut [Option<CachedRule>],
    ) -> usize {
        let metric = self.eval_metric;
        match status {
            UpdateStatus::Normal => {
                self.stats.evaluated_candidates += 1;
                if updated.eval().value(metric) <= original.eval().value(metric) {
                    return 0;
                }
                let mut replace_idx = None;
                let mut replaced_score = updated.eval().value(metric);
                for (i, slot) in candidates.iter().enumerate() {
                    match slot {
                        None => {
                            replace_idx = Some(i);
                            break;
                        }
                        Some(candidate) => {
                            let score = candidate.eval().value(metric);
                            if replaced_score > score {
                                replace_idx = Some(i);
                                replaced_score = score;
                            }
                        }
                    }
                }
                if let Some(i) = replace_idx {
                    candidates[i] = Some(updated);
                }
                /* An improvement counts even when every slot already
                 * holds something better */
                1
            }
            UpdateStatus::Duplicated => {
                self.stats.duplicated += 1;
                0
            }
            UpdateStatus::Invalid => {
                self.stats.invalid += 1;
                0
            }
            UpdateStatus::InsufficientCoverage => {
                self.stats.insufficient_coverage += 1;
                0
            }
            UpdateStatus::TabuPruned => {
                self.stats.tabu_pruned += 1;
                0
            }
        }
    }

    /// Commit an accepted rule: collect counterexamples, flag entailed
    /// head records, and extend the dependency graph with the rule's
    /// groundings.
    fn update_kb_and_graph(&mut self, rule: &CachedRule) -> usize {
        let counterexamples = rule.counterexamples(self.kb, &self.ctx.pool);
        self.counterexamples.extend(counterexamples);

        let batch = rule.evidence_and_mark_entailment(self.kb, &self.ctx.pool);
        for grounding in &batch.groundings {
            let head = Predicate::grounded(batch.pred_symbols[0], &grounding[0]);
            let bodies: Vec<Predicate> = grounding[1..]
                .iter()
                .zip(&batch.pred_symbols[1..])
                .map(|(record, &symbol)| Predicate::grounded(symbol, record))
                .collect();
            self.graph.add_grounding(head, &bodies);
        }
        self.stats.entailed_records += batch.groundings.len();
        batch.groundings.len()
    }
}
