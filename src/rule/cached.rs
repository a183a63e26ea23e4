//! First-order Horn rules with the compact grounding cache (CGC).
//!
//! A [`CachedRule`] owns two caches built from [`CacheFragment`]s:
//!
//! - the E+ cache (`pos_cache`): a single fragment over the head
//!   relation and every body atom, tracking the not-yet-entailed head
//!   groundings the rule covers;
//! - the E cache (`all_cache`): one fragment per maximal LV-connected
//!   component of the body, used for entailment counting and
//!   counterexample generation. The head itself is never a table of
//!   the E cache.
//!
//! Cloning a rule shares both caches; the first mutating update copies
//! them (`Rc::make_mut`), so mutations in a clone never reach the
//! parent.
//!
//! Every specialization runs the same pipeline: update the structure
//! and fingerprint, check the fingerprint cache, the structural
//! validity, and the tabu sets, update the E+ cache, gate on fact
//! coverage, update the E cache, and re-evaluate.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::atom::{arg, record_identity, ArgLocation, Predicate, Record};
use crate::cache::block::CbPool;
use crate::cache::fragment::CacheFragment;
use crate::kb::SimpleKb;
use crate::rule::fingerprint::{Fingerprint, MultiSet};
use crate::rule::parse::dump_rule;
use crate::rule::{Eval, UpdateStatus};
use crate::table::IntTable;

const HEAD_PRED_IDX: usize = 0;
const FIRST_BODY_PRED_IDX: usize = 1;

/// Mining state shared by every rule of one relation miner: the block
/// pool, the fingerprint cache of the current search round, and the
/// tabu sets keyed by body-functor multisets.
pub struct MineContext {
    pub pool: CbPool,
    pub fingerprint_cache: HashSet<Rc<Fingerprint>>,
    pub tabu_map: HashMap<MultiSet<usize>, HashSet<Rc<Fingerprint>>>,
    pub min_fact_coverage: f64,
}

impl MineContext {
    pub fn new(min_fact_coverage: f64) -> Self {
        MineContext {
            pool: CbPool::new(),
            fingerprint_cache: HashSet::new(),
            tabu_map: HashMap::new(),
            min_fact_coverage,
        }
    }

    /// Start a fresh deduplication round (one per `find_rule` pass).
    pub fn reset_fingerprint_cache(&mut self) {
        self.fingerprint_cache.clear();
    }
}

/// Maps a body predicate to its table inside the E cache.
#[derive(Clone, Copy, Debug)]
struct TabInfo {
    frag_idx: usize,
    tab_idx: usize,
}

/// The groundings one rule contributes when it is committed: per
/// grounding, one record for the head and one per body atom.
pub struct EvidenceBatch {
    pub pred_symbols: Vec<usize>,
    pub arities: Vec<usize>,
    pub groundings: Vec<Vec<Record>>,
}

/// A Horn rule with fingerprint bookkeeping and grounding caches.
#[derive(Clone)]
pub struct CachedRule {
    /// Head at index 0, body atoms after it.
    structure: Vec<Predicate>,
    /// Occurrence locations of every LV; length ≥ 2 per LV except
    /// transiently during generalization.
    limited_var_args: Vec<Vec<ArgLocation>>,
    length: usize,
    eval: Eval,
    fingerprint: Rc<Fingerprint>,
    pos_cache: Rc<CacheFragment>,
    all_cache: Rc<Vec<CacheFragment>>,
    /// Predicate index → E-cache location; the head maps to `None`.
    pred_to_frag: Vec<Option<TabInfo>>,
}

impl CachedRule {
    /// The most general rule of a target relation: `R(?, …, ?) :-`.
    pub fn new(head_symbol: usize, kb: &SimpleKb, ctx: &mut MineContext) -> Self {
        let head_relation = kb.relation(head_symbol);
        let arity = head_relation.arity();
        let structure = vec![Predicate::empty(head_symbol, arity)];
        let fingerprint = Rc::new(Fingerprint::new(&structure));
        ctx.fingerprint_cache.insert(fingerprint.clone());

        let pos_cache = Rc::new(CacheFragment::from_relation(
            head_relation.table(),
            head_symbol,
            &mut ctx.pool,
        ));

        let already_entailed = head_relation.total_entailed_records() as f64;
        let pos = head_relation.total_rows() as f64 - already_entailed;
        let all = (kb.total_constants() as f64).powi(arity as i32);
        let eval = Eval::new(pos, all - already_entailed, 0);

        CachedRule {
            structure,
            limited_var_args: Vec::new(),
            length: 0,
            eval,
            fingerprint,
            pos_cache,
            all_cache: Rc::new(Vec::new()),
            pred_to_frag: vec![None],
        }
    }

    #[inline]
    pub fn structure(&self) -> &[Predicate] {
        &self.structure
    }

    #[inline]
    pub fn head(&self) -> &Predicate {
        &self.structure[HEAD_PRED_IDX]
    }

    #[inline]
    pub fn predicate(&self, idx: usize) -> &Predicate {
        &self.structure[idx]
    }

    #[inline]
    pub fn num_predicates(&self) -> usize {
        self.structure.len()
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn used_limited_vars(&self) -> usize {
        self.limited_var_args.len()
    }

    #[inline]
    pub fn eval(&self) -> &Eval {
        &self.eval
    }

    #[inline]
    pub fn fingerprint(&self) -> &Rc<Fingerprint> {
        &self.fingerprint
    }

    pub fn pos_cache(&self) -> &CacheFragment {
        &self.pos_cache
    }

    pub fn all_cache(&self) -> &[CacheFragment] {
        &self.all_cache
    }

    /// The rule in the dump grammar, without the evaluation prefix.
    pub fn to_dump_string(&self, names: &[String]) -> String {
        dump_rule(&self.structure, names)
    }

    /// The rule with its evaluation, for logs.
    pub fn to_display_string(&self, names: &[String]) -> String {
        format!("({}){}", self.eval, self.to_dump_string(names))
    }

    /// Drop the grounding caches once the rule is committed. The block
    /// pool is cleared between target relations, so only the structure
    /// and evaluation of a committed rule stay meaningful.
    pub fn release_memory(&mut self) {
        let (symbol, arity) = (self.head().symbol, self.head().arity());
        self.pos_cache = Rc::new(CacheFragment::empty(symbol, arity));
        self.all_cache = Rc::new(Vec::new());
    }

    /// Build the indices of every cached block. Must be called before
    /// the rule is extended.
    pub fn update_cache_indices(&self, ctx: &mut MineContext) {
        self.pos_cache.build_indices(&mut ctx.pool);
        for fragment in self.all_cache.iter() {
            fragment.build_indices(&mut ctx.pool);
        }
    }

    /* ------------------------------------------------------------ */
    /* Specialization and generalization operators                   */
    /* ------------------------------------------------------------ */

    /// Case 1: bind an empty argument to an existing LV.
    pub fn specialize_case1(
        &mut self,
        pred_idx: usize,
        arg_idx: usize,
        var_id: usize,
        kb: &SimpleKb,
        ctx: &mut MineContext,
    ) -> UpdateStatus {
        self.spec_case1_structure(pred_idx, arg_idx, var_id);
        if self.cache_hit(ctx) {
            return UpdateStatus::Duplicated;
        }
        if self.is_invalid() {
            return UpdateStatus::Invalid;
        }
        if self.tabu_hit(ctx) {
            return UpdateStatus::TabuPruned;
        }
        self.pos_cache_mut()
            .update_case_1a(pred_idx, arg_idx, var_id, &mut ctx.pool);
        if self.insufficient_coverage(kb, ctx) {
            return UpdateStatus::InsufficientCoverage;
        }
        self.case1_post(pred_idx, arg_idx, var_id, ctx);
        self.eval = self.calculate_eval(kb, &ctx.pool);
        UpdateStatus::Normal
    }

    /// Case 2: append a new body atom and bind one of its arguments to
    /// an existing LV.
    pub fn specialize_case2(
        &mut self,
        pred_symbol: usize,
        arg_idx: usize,
        var_id: usize,
        kb: &SimpleKb,
        ctx: &mut MineContext,
    ) -> UpdateStatus {
        self.spec_case2_structure(pred_symbol, kb.relation(pred_symbol).arity(), arg_idx, var_id);
        if self.cache_hit(ctx) {
            return UpdateStatus::Duplicated;
        }
        if self.is_invalid() {
            return UpdateStatus::Invalid;
        }
        if self.tabu_hit(ctx) {
            return UpdateStatus::TabuPruned;
        }
        let table = kb.relation(pred_symbol).table().clone();
        self.pos_cache_mut()
            .update_case_1b(&table, pred_symbol, arg_idx, var_id, &mut ctx.pool);
        if self.insufficient_coverage(kb, ctx) {
            return UpdateStatus::InsufficientCoverage;
        }
        self.case2_post(&table, pred_symbol, arg_idx, var_id, ctx);
        self.eval = self.calculate_eval(kb, &ctx.pool);
        UpdateStatus::Normal
    }

    /// Case 3: bind two empty arguments of existing predicates to a
    /// fresh LV.
    pub fn specialize_case3(
        &mut self,
        pred_idx1: usize,
        arg_idx1: usize,
        pred_idx2: usize,
        arg_idx2: usize,
        kb: &SimpleKb,
        ctx: &mut MineContext,
    ) -> UpdateStatus {
        self.spec_case3_structure(pred_idx1, arg_idx1, pred_idx2, arg_idx2);
        if self.cache_hit(ctx) {
            return UpdateStatus::Duplicated;
        }
        if self.is_invalid() {
            return UpdateStatus::Invalid;
        }
        if self.tabu_hit(ctx) {
            return UpdateStatus::TabuPruned;
        }
        let new_vid = self.limited_var_args.len() - 1;
        self.pos_cache_mut()
            .update_case_2a(pred_idx1, arg_idx1, pred_idx2, arg_idx2, new_vid, &mut ctx.pool);
        if self.insufficient_coverage(kb, ctx) {
            return UpdateStatus::InsufficientCoverage;
        }
        self.case3_post(pred_idx1, arg_idx1, pred_idx2, arg_idx2, new_vid, ctx);
        self.eval = self.calculate_eval(kb, &ctx.pool);
        UpdateStatus::Normal
    }

    /// Case 4: append a new body atom and span a fresh LV between one
    /// of its arguments and an empty argument of an existing predicate.
    pub fn specialize_case4(
        &mut self,
        pred_symbol: usize,
        arg_idx1: usize,
        pred_idx2: usize,
        arg_idx2: usize,
        kb: &SimpleKb,
        ctx: &mut MineContext,
    ) -> UpdateStatus {
        self.spec_case4_structure(
            pred_symbol,
            kb.relation(pred_symbol).arity(),
            arg_idx1,
            pred_idx2,
            arg_idx2,
        );
        if self.cache_hit(ctx) {
            return UpdateStatus::Duplicated;
        }
        if self.is_invalid() {
            return UpdateStatus::Invalid;
        }
        if self.tabu_hit(ctx) {
            return UpdateStatus::TabuPruned;
        }
        let new_vid = self.limited_var_args.len() - 1;
        let table = kb.relation(pred_symbol).table().clone();
        self.pos_cache_mut().update_case_2b(
            &table,
            pred_symbol,
            arg_idx1,
            pred_idx2,
            arg_idx2,
            new_vid,
            &mut ctx.pool,
        );
        if self.insufficient_coverage(kb, ctx) {
            return UpdateStatus::InsufficientCoverage;
        }
        self.case4_post(&table, pred_symbol, arg_idx1, pred_idx2, arg_idx2, new_vid, ctx);
        self.eval = self.calculate_eval(kb, &ctx.pool);
        UpdateStatus::Normal
    }

    /// Case 5: bind an empty argument to a constant.
    pub fn specialize_case5(
        &mut self,
        pred_idx: usize,
        arg_idx: usize,
        constant: i32,
        kb: &SimpleKb,
        ctx: &mut MineContext,
    ) -> UpdateStatus {
        self.spec_case5_structure(pred_idx, arg_idx, constant);
        if self.cache_hit(ctx) {
            return UpdateStatus::Duplicated;
        }
        if self.is_invalid() {
            return UpdateStatus::Invalid;
        }
        if self.tabu_hit(ctx) {
            return UpdateStatus::TabuPruned;
        }
        self.pos_cache_mut()
            .update_case_3(pred_idx, arg_idx, constant, &mut ctx.pool);
        if self.insufficient_coverage(kb, ctx) {
            return UpdateStatus::InsufficientCoverage;
        }
        self.case5_post(pred_idx, arg_idx, constant, ctx);
        self.eval = self.calculate_eval(kb, &ctx.pool);
        UpdateStatus::Normal
    }

    /// Remove one non-empty argument. The cached search keeps the
    /// structure bookkeeping but rejects the move before any cache
    /// update, so generalized candidates never enter the beam.
    pub fn generalize(&mut self, pred_idx: usize, arg_idx: usize, ctx: &mut MineContext) -> UpdateStatus {
        self.generalize_structure(pred_idx, arg_idx);
        if self.cache_hit(ctx) {
            return UpdateStatus::Duplicated;
        }
        if self.is_invalid() {
            return UpdateStatus::Invalid;
        }
        if self.tabu_hit(ctx) {
            return UpdateStatus::TabuPruned;
        }
        UpdateStatus::Invalid
    }

    /* ------------------------------------------------------------ */
    /* Structure bookkeeping                                         */
    /* ------------------------------------------------------------ */

    fn spec_case1_structure(&mut self, pred_idx: usize, arg_idx: usize, var_id: usize) {
        self.structure[pred_idx].args[arg_idx] = arg::variable(var_id);
        self.limited_var_args[var_id].push(ArgLocation::new(pred_idx, arg_idx));
        self.length += 1;
        self.update_fingerprint();
    }

    fn spec_case2_structure(&mut self, pred_symbol: usize, arity: usize, arg_idx: usize, var_id: usize) {
        let mut predicate = Predicate::empty(pred_symbol, arity);
        predicate.args[arg_idx] = arg::variable(var_id);
        self.structure.push(predicate);
        self.limited_var_args[var_id].push(ArgLocation::new(self.structure.len() - 1, arg_idx));
        self.length += 1;
        self.update_fingerprint();
    }

    fn spec_case3_structure(&mut self, pred_idx1: usize, arg_idx1: usize, pred_idx2: usize, arg_idx2: usize) {
        let new_var = arg::variable(self.limited_var_args.len());
        self.structure[pred_idx1].args[arg_idx1] = new_var;
        self.structure[pred_idx2].args[arg_idx2] = new_var;
        self.limited_var_args.push(vec![
            ArgLocation::new(pred_idx1, arg_idx1),
            ArgLocation::new(pred_idx2, arg_idx2),
        ]);
        self.length += 1;
        self.update_fingerprint();
    }

    fn spec_case4_structure(
        &mut self,
        pred_symbol: usize,
        arity: usize,
        arg_idx1: usize,
        pred_idx2: usize,
        arg_idx2: usize,
    ) {
        let new_var = arg::variable(self.limited_var_args.len());
        let mut predicate = Predicate::empty(pred_symbol, arity);
        predicate.args[arg_idx1] = new_var;
        self.structure.push(predicate);
        self.structure[pred_idx2].args[arg_idx2] = new_var;
        self.limited_var_args.push(vec![
            ArgLocation::new(self.structure.len() - 1, arg_idx1),
            ArgLocation::new(pred_idx2, arg_idx2),
        ]);
        self.length += 1;
        self.update_fingerprint();
    }

    fn spec_case5_structure(&mut self, pred_idx: usize, arg_idx: usize, constant: i32) {
        self.structure[pred_idx].args[arg_idx] = arg::constant(constant);
        self.length += 1;
        self.update_fingerprint();
    }

    fn generalize_structure(&mut self, pred_idx: usize, arg_idx: usize) {
        let removed_argument = self.structure[pred_idx].args[arg_idx];
        self.structure[pred_idx].args[arg_idx] = arg::EMPTY;

        if arg::is_variable(removed_argument) {
            let removed_vid = arg::decode(removed_argument) as usize;
            if self.limited_var_args[removed_vid].len() <= 2 {
                /* The LV loses its second occurrence and is removed;
                 * the latest LV takes over its id to keep ids dense */
                let latest_vid = self.limited_var_args.len() - 1;
                let var_args = self.limited_var_args.swap_remove(removed_vid);
                for loc in &var_args {
                    self.structure[loc.pred_idx].args[loc.arg_idx] = arg::EMPTY;
                }
                if removed_vid != latest_vid {
                    for loc in self.limited_var_args[removed_vid].clone() {
                        self.structure[loc.pred_idx].args[loc.arg_idx] = removed_argument;
                    }
                }
            } else {
                self.limited_var_args[removed_vid]
                    .retain(|loc| !(loc.pred_idx == pred_idx && loc.arg_idx == arg_idx));
            }
        }
        self.length -= 1;

        /* Body atoms left with only empty arguments disappear */
        let mut idx = FIRST_BODY_PRED_IDX;
        while idx < self.structure.len() {
            if self.structure[idx].args.iter().all(|&a| arg::is_empty(a)) {
                self.structure.remove(idx);
                for locs in &mut self.limited_var_args {
                    for loc in locs {
                        if loc.pred_idx > idx {
                            loc.pred_idx -= 1;
                        }
                    }
                }
            } else {
                idx += 1;
            }
        }
        self.update_fingerprint();
    }

    fn update_fingerprint(&mut self) {
        self.fingerprint = Rc::new(Fingerprint::new(&self.structure));
    }

    /* ------------------------------------------------------------ */
    /* Pruning gates                                                 */
    /* ------------------------------------------------------------ */

    fn cache_hit(&self, ctx: &mut MineContext) -> bool {
        !ctx.fingerprint_cache.insert(self.fingerprint.clone())
    }

    /// Structural rejection: an independent body fragment, a body atom
    /// without LVs, an exact body duplicate, or a body atom that
    /// repeats a non-empty head argument of the same relation at the
    /// same position.
    fn is_invalid(&self) -> bool {
        let mut disjoint_set = DisjointSet::new(self.used_limited_vars());
        let mut complete_predicates: HashSet<&Predicate> = HashSet::new();

        /* Head: all head LVs belong to one component */
        let head = &self.structure[HEAD_PRED_IDX];
        let head_lvs: Vec<usize> = head
            .args
            .iter()
            .filter(|&&a| arg::is_variable(a))
            .map(|&a| arg::decode(a) as usize)
            .collect();
        if head_lvs.is_empty() {
            if self.structure.len() >= 2 {
                /* A body without head LVs is an independent fragment */
                return true;
            }
        } else {
            for &vid in &head_lvs[1..] {
                disjoint_set.union(head_lvs[0], vid);
            }
        }

        for body_pred in &self.structure[FIRST_BODY_PRED_IDX..] {
            /* Partial duplication of the head */
            if head.symbol == body_pred.symbol {
                for (head_arg, body_arg) in head.args.iter().zip(&body_pred.args) {
                    if arg::is_non_empty(*head_arg) && head_arg == body_arg {
                        return true;
                    }
                }
            }

            let mut args_complete = true;
            let mut lv_ids: Vec<usize> = Vec::new();
            for &argument in &body_pred.args {
                if arg::is_empty(argument) {
                    args_complete = false;
                } else if arg::is_variable(argument) {
                    lv_ids.push(arg::decode(argument) as usize);
                }
            }

            if args_complete && !complete_predicates.insert(body_pred) {
                return true;
            }

            if lv_ids.is_empty() {
                /* No LV: the atom cannot connect to the rest */
                return true;
            }
            for &vid in &lv_ids[1..] {
                disjoint_set.union(lv_ids[0], vid);
            }
        }

        disjoint_set.total_sets() >= 2
    }

    fn tabu_hit(&self, ctx: &MineContext) -> bool {
        for subset_size in 0..self.structure.len() {
            for category in self.category_subsets(subset_size) {
                let Some(tabu_set) = ctx.tabu_map.get(&category) else {
                    continue;
                };
                if tabu_set
                    .iter()
                    .any(|fp| fp.generalization_of(&self.fingerprint))
                {
                    return true;
                }
            }
        }
        false
    }

    /// All multisets of `subset_size` body functors.
    fn category_subsets(&self, subset_size: usize) -> HashSet<MultiSet<usize>> {
        let mut subsets = HashSet::new();
        if subset_size == 0 {
            subsets.insert(MultiSet::new());
            return subsets;
        }
        let mut template = vec![0usize; subset_size];
        self.collect_category_subsets(&mut subsets, &mut template, subset_size - 1, FIRST_BODY_PRED_IDX);
        subsets
    }

    fn collect_category_subsets(
        &self,
        subsets: &mut HashSet<MultiSet<usize>>,
        template: &mut Vec<usize>,
        depth: usize,
        start_idx: usize,
    ) {
        for pred_idx in start_idx..self.structure.len() {
            template[depth] = self.structure[pred_idx].symbol;
            if depth > 0 {
                self.collect_category_subsets(subsets, template, depth - 1, pred_idx + 1);
            } else {
                subsets.insert(template.iter().copied().collect());
            }
        }
    }

    fn insufficient_coverage(&mut self, kb: &SimpleKb, ctx: &mut MineContext) -> bool {
        if ctx.min_fact_coverage >= self.record_coverage(kb, &ctx.pool) {
            self.add_to_tabu(ctx);
            return true;
        }
        false
    }

    fn add_to_tabu(&self, ctx: &mut MineContext) {
        let category: MultiSet<usize> = self.structure[FIRST_BODY_PRED_IDX..]
            .iter()
            .map(|p| p.symbol)
            .collect();
        ctx.tabu_map
            .entry(category)
            .or_default()
            .insert(self.fingerprint.clone());
    }

    /// The fraction of head records covered by the E+ cache and not yet
    /// entailed by previously accepted rules.
    pub fn record_coverage(&self, kb: &SimpleKb, pool: &CbPool) -> f64 {
        let head_relation = kb.relation(self.head().symbol);
        let mut used_cbs = HashSet::with_capacity(self.pos_cache.entries().len());
        let mut used_rows = HashSet::with_capacity(head_relation.total_rows());
        let mut newly_covered = 0usize;
        for entry in self.pos_cache.entries() {
            let cb_id = entry[HEAD_PRED_IDX];
            if used_cbs.insert(cb_id) {
                for row in pool.block(cb_id).rows() {
                    if used_rows.insert(record_identity(row)) && !head_relation.is_entailed(row) {
                        newly_covered += 1;
                    }
                }
            }
        }
        newly_covered as f64 / head_relation.total_rows() as f64
    }

    /* ------------------------------------------------------------ */
    /* E-cache maintenance per specialization case                   */
    /* ------------------------------------------------------------ */

    fn pos_cache_mut(&mut self) -> &mut CacheFragment {
        Rc::make_mut(&mut self.pos_cache)
    }

    fn all_cache_mut(&mut self) -> &mut Vec<CacheFragment> {
        Rc::make_mut(&mut self.all_cache)
    }

    fn clear_all_cache(&mut self) {
        for fragment in self.all_cache_mut() {
            fragment.clear();
        }
    }

    fn case1_post(&mut self, pred_idx: usize, arg_idx: usize, var_id: usize, ctx: &mut MineContext) {
        if pred_idx == HEAD_PRED_IDX {
            /* Updates confined to the head do not touch the E cache */
            return;
        }
        let tab_info = self.pred_to_frag[pred_idx]
            .unwrap_or_else(|| unreachable!("body predicates are mapped"));
        let mut cache_empty = false;
        if self.all_cache[tab_info.frag_idx].has_lv(var_id) {
            let all = Rc::make_mut(&mut self.all_cache);
            all[tab_info.frag_idx].update_case_1a(tab_info.tab_idx, arg_idx, var_id, &mut ctx.pool);
            cache_empty = all[tab_info.frag_idx].is_empty();
        } else if let Some(frag_idx2) = (0..self.all_cache.len())
            .find(|&i| i != tab_info.frag_idx && self.all_cache[i].has_lv(var_id))
        {
            /* The LV lives in another fragment: merge the two */
            let fragment_tab_idx = tab_info.tab_idx;
            let (donor, base_idx) = self.merge_fragment_indices(frag_idx2, tab_info.frag_idx);
            let all = Rc::make_mut(&mut self.all_cache);
            all[base_idx].update_case_1c(&donor, fragment_tab_idx, arg_idx, var_id, &mut ctx.pool);
            cache_empty = all[base_idx].is_empty();
        } else {
            /* First occurrence in the body: a PLV, never empties */
            let all = Rc::make_mut(&mut self.all_cache);
            all[tab_info.frag_idx].update_case_1a(tab_info.tab_idx, arg_idx, var_id, &mut ctx.pool);
        }
        if cache_empty {
            self.clear_all_cache();
        }
    }

    fn case2_post(
        &mut self,
        table: &Arc<IntTable>,
        pred_symbol: usize,
        arg_idx: usize,
        var_id: usize,
        ctx: &mut MineContext,
    ) {
        let found = (0..self.all_cache.len()).find(|&i| self.all_cache[i].has_lv(var_id));
        let updated_idx = match found {
            Some(frag_idx) => {
                let tab_idx = self.all_cache[frag_idx].num_tables();
                self.pred_to_frag.push(Some(TabInfo { frag_idx, tab_idx }));
                let all = Rc::make_mut(&mut self.all_cache);
                all[frag_idx].update_case_1b(table, pred_symbol, arg_idx, var_id, &mut ctx.pool);
                frag_idx
            }
            None => {
                /* The LV is not in the body yet: open a new fragment */
                let frag_idx = self.all_cache.len();
                let mut fragment = CacheFragment::from_relation(table, pred_symbol, &mut ctx.pool);
                fragment.update_case_1a(0, arg_idx, var_id, &mut ctx.pool);
                self.pred_to_frag.push(Some(TabInfo { frag_idx, tab_idx: 0 }));
                Rc::make_mut(&mut self.all_cache).push(fragment);
                frag_idx
            }
        };
        if self.all_cache[updated_idx].is_empty() {
            self.clear_all_cache();
        }
    }

    fn case3_post(
        &mut self,
        pred_idx1: usize,
        arg_idx1: usize,
        pred_idx2: usize,
        arg_idx2: usize,
        new_vid: usize,
        ctx: &mut MineContext,
    ) {
        let mut touched: Vec<usize> = Vec::new();
        if pred_idx1 == HEAD_PRED_IDX {
            if pred_idx2 != HEAD_PRED_IDX {
                let tab_info2 = self.pred_to_frag[pred_idx2]
                    .unwrap_or_else(|| unreachable!("body predicates are mapped"));
                let all = Rc::make_mut(&mut self.all_cache);
                all[tab_info2.frag_idx].update_case_1a(tab_info2.tab_idx, arg_idx2, new_vid, &mut ctx.pool);
                touched.push(tab_info2.frag_idx);
            }
            /* Both in the head: the E cache is untouched */
        } else {
            let tab_info1 = self.pred_to_frag[pred_idx1]
                .unwrap_or_else(|| unreachable!("body predicates are mapped"));
            if pred_idx2 == HEAD_PRED_IDX {
                let all = Rc::make_mut(&mut self.all_cache);
                all[tab_info1.frag_idx].update_case_1a(tab_info1.tab_idx, arg_idx1, new_vid, &mut ctx.pool);
                touched.push(tab_info1.frag_idx);
            } else {
                let tab_info2 = self.pred_to_frag[pred_idx2]
                    .unwrap_or_else(|| unreachable!("body predicates are mapped"));
                if tab_info1.frag_idx == tab_info2.frag_idx {
                    let all = Rc::make_mut(&mut self.all_cache);
                    all[tab_info1.frag_idx].update_case_2a(
                        tab_info1.tab_idx,
                        arg_idx1,
                        tab_info2.tab_idx,
                        arg_idx2,
                        new_vid,
                        &mut ctx.pool,
                    );
                    touched.push(tab_info1.frag_idx);
                } else {
                    let fragment2_tab_idx = tab_info2.tab_idx;
                    let (donor, base_idx) =
                        self.merge_fragment_indices(tab_info1.frag_idx, tab_info2.frag_idx);
                    let all = Rc::make_mut(&mut self.all_cache);
                    all[base_idx].update_case_2c(
                        tab_info1.tab_idx,
                        arg_idx1,
                        &donor,
                        fragment2_tab_idx,
                        arg_idx2,
                        new_vid,
                        &mut ctx.pool,
                    );
                    touched.push(base_idx);
                }
            }
        }
        if touched.iter().any(|&i| self.all_cache[i].is_empty()) {
            self.clear_all_cache();
        }
    }

    fn case4_post(
        &mut self,
        table: &Arc<IntTable>,
        pred_symbol: usize,
        arg_idx1: usize,
        pred_idx2: usize,
        arg_idx2: usize,
        new_vid: usize,
        ctx: &mut MineContext,
    ) {
        if pred_idx2 == HEAD_PRED_IDX {
            /* The other end is the head: the new atom starts its own
             * fragment, filtered by nothing yet (the LV is a PLV) */
            let frag_idx = self.all_cache.len();
            self.pred_to_frag.push(Some(TabInfo { frag_idx, tab_idx: 0 }));
            let mut fragment = CacheFragment::from_relation(table, pred_symbol, &mut ctx.pool);
            fragment.update_case_1a(0, arg_idx1, new_vid, &mut ctx.pool);
            Rc::make_mut(&mut self.all_cache).push(fragment);
        } else {
            let tab_info2 = self.pred_to_frag[pred_idx2]
                .unwrap_or_else(|| unreachable!("body predicates are mapped"));
            let tab_idx = self.all_cache[tab_info2.frag_idx].num_tables();
            self.pred_to_frag.push(Some(TabInfo {
                frag_idx: tab_info2.frag_idx,
                tab_idx,
            }));
            let all = Rc::make_mut(&mut self.all_cache);
            all[tab_info2.frag_idx].update_case_2b(
                table,
                pred_symbol,
                arg_idx1,
                tab_info2.tab_idx,
                arg_idx2,
                new_vid,
                &mut ctx.pool,
            );
            if all[tab_info2.frag_idx].is_empty() {
                self.clear_all_cache();
            }
        }
    }

    fn case5_post(&mut self, pred_idx: usize, arg_idx: usize, constant: i32, ctx: &mut MineContext) {
        if pred_idx == HEAD_PRED_IDX {
            return;
        }
        let tab_info = self.pred_to_frag[pred_idx]
            .unwrap_or_else(|| unreachable!("body predicates are mapped"));
        let all = Rc::make_mut(&mut self.all_cache);
        all[tab_info.frag_idx].update_case_3(tab_info.tab_idx, arg_idx, constant, &mut ctx.pool);
        if all[tab_info.frag_idx].is_empty() {
            self.clear_all_cache();
        }
    }

    /// Remove the merging fragment from the E cache (swapping the last
    /// fragment into its slot) and patch the predicate mapping. Returns
    /// the removed fragment and the base fragment's current index.
    fn merge_fragment_indices(&mut self, base_idx: usize, merging_idx: usize) -> (CacheFragment, usize) {
        let all = Rc::make_mut(&mut self.all_cache);
        let last_idx = all.len() - 1;
        let tabs_in_base = all[base_idx].num_tables();
        let donor = all.swap_remove(merging_idx);

        for info in self.pred_to_frag.iter_mut().flatten() {
            if info.frag_idx == merging_idx {
                info.frag_idx = base_idx;
                info.tab_idx += tabs_in_base;
            }
            if info.frag_idx == last_idx {
                info.frag_idx = merging_idx;
            }
        }
        let base_now = if base_idx == last_idx { merging_idx } else { base_idx };
        (donor, base_now)
    }

    /* ------------------------------------------------------------ */
    /* Scoring, evidence, and counterexamples                        */
    /* ------------------------------------------------------------ */

    /// Recompute the rule's evaluation.
    ///
    /// `all` is `|constants|^(UVs + head-only LVs)` multiplied by the
    /// distinct GV combinations of every E-cache fragment, minus the
    /// head records already entailed by other rules.
    pub fn calculate_eval(&self, kb: &SimpleKb, pool: &CbPool) -> Eval {
        let head = self.head();
        let mut head_uv_cnt = 0usize;
        let mut head_only_lvs: Vec<usize> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        for &argument in &head.args {
            if arg::is_empty(argument) {
                head_uv_cnt += 1;
            } else if arg::is_variable(argument) {
                let vid = arg::decode(argument) as usize;
                if seen.insert(vid) {
                    head_only_lvs.push(vid);
                }
            }
        }

        /* GVs are head LVs bound inside some body fragment */
        let mut gvs_per_fragment: Vec<Vec<usize>> = vec![Vec::new(); self.all_cache.len()];
        head_only_lvs.retain(|&vid| {
            for (frag_idx, fragment) in self.all_cache.iter().enumerate() {
                if fragment.has_lv(vid) {
                    gvs_per_fragment[frag_idx].push(vid);
                    return false;
                }
            }
            true
        });

        let mut all_ent =
            (kb.total_constants() as f64).powi((head_uv_cnt + head_only_lvs.len()) as i32);
        for (frag_idx, gvs) in gvs_per_fragment.iter().enumerate() {
            if !gvs.is_empty() {
                all_ent *= self.all_cache[frag_idx].count_combinations(gvs, pool) as f64;
            }
        }

        let head_relation = kb.relation(head.symbol);
        let mut used_cbs = HashSet::with_capacity(self.pos_cache.entries().len());
        let mut used_rows = HashSet::with_capacity(head_relation.total_rows());
        let mut new_pos_ent = 0usize;
        let mut already_ent = 0usize;
        for entry in self.pos_cache.entries() {
            let cb_id = entry[HEAD_PRED_IDX];
            if used_cbs.insert(cb_id) {
                for row in pool.block(cb_id).rows() {
                    if used_rows.insert(record_identity(row)) {
                        if head_relation.is_entailed(row) {
                            already_ent += 1;
                        } else {
                            new_pos_ent += 1;
                        }
                    }
                }
            }
        }

        /* Already-proved records are excluded from the entire set so
         * they are not counted as negative entailments */
        Eval::new(new_pos_ent as f64, all_ent - already_ent as f64, self.length)
    }

    /// Collect the rule's groundings and flag every covered head record
    /// as entailed. Re-running over the same groundings changes
    /// nothing: each record is flagged at most once.
    pub fn evidence_and_mark_entailment(
        &self,
        kb: &mut SimpleKb,
        pool: &CbPool,
    ) -> EvidenceBatch {
        let mut batch = EvidenceBatch {
            pred_symbols: self.structure.iter().map(|p| p.symbol).collect(),
            arities: self.structure.iter().map(Predicate::arity).collect(),
            groundings: Vec::new(),
        };

        let head_symbol = self.head().symbol;
        for entry in self.pos_cache.entries() {
            /* Body blocks are singletons w.r.t. the grounding: their
             * first row stands for the whole entry */
            let body: Vec<Record> = entry[FIRST_BODY_PRED_IDX..]
                .iter()
                .map(|&cb| pool.block(cb).rows()[0].clone())
                .collect();
            for head_row in pool.block(entry[HEAD_PRED_IDX]).rows() {
                if kb.relation_mut(head_symbol).entail_if_not(head_row) {
                    let mut grounding = Vec::with_capacity(self.structure.len());
                    grounding.push(head_row.clone());
                    grounding.extend(body.iter().cloned());
                    batch.groundings.push(grounding);
                }
            }
        }
        batch
    }

    /// Head groundings the rule entails that are absent from the head
    /// relation: GV bindings come from the E cache, remaining head
    /// variables range over the whole constant domain.
    pub fn counterexamples(&self, kb: &SimpleKb, pool: &CbPool) -> HashSet<Record> {
        let head = self.head();
        let head_arity = head.arity();
        let head_relation = kb.relation(head.symbol);

        /* Head variables and their argument positions; UVs get fresh
         * ids past the LV range */
        let mut vid_to_locs: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut next_uv_id = self.used_limited_vars();
        for (arg_idx, &argument) in head.args.iter().enumerate() {
            if arg::is_empty(argument) {
                vid_to_locs.insert(next_uv_id, vec![arg_idx]);
                next_uv_id += 1;
            } else if arg::is_variable(argument) {
                vid_to_locs
                    .entry(arg::decode(argument) as usize)
                    .or_default()
                    .push(arg_idx);
            }
        }

        let mut head_templates: HashSet<Vec<i32>> = HashSet::new();
        let base_template: Vec<i32> = head.args.clone();
        if self.all_cache.is_empty() {
            head_templates.insert(base_template);
        } else {
            /* Pull GVs out of the head-variable map */
            let mut gvids_per_fragment: Vec<Vec<usize>> = vec![Vec::new(); self.all_cache.len()];
            let mut arg_locs_per_fragment: Vec<Vec<Vec<usize>>> =
                vec![Vec::new(); self.all_cache.len()];
            vid_to_locs.retain(|&vid, locs| {
                for (frag_idx, fragment) in self.all_cache.iter().enumerate() {
                    if fragment.has_lv(vid) {
                        gvids_per_fragment[frag_idx].push(vid);
                        arg_locs_per_fragment[frag_idx].push(locs.clone());
                        return false;
                    }
                }
                true
            });

            let valid_fragments: Vec<usize> = (0..self.all_cache.len())
                .filter(|&i| !gvids_per_fragment[i].is_empty())
                .collect();
            if valid_fragments.is_empty() {
                head_templates.insert(base_template);
            } else {
                let bindings: Vec<HashSet<Record>> = valid_fragments
                    .iter()
                    .map(|&i| self.all_cache[i].enumerate_combinations(&gvids_per_fragment[i], pool))
                    .collect();
                let links: Vec<&[Vec<usize>]> = valid_fragments
                    .iter()
                    .map(|&i| arg_locs_per_fragment[i].as_slice())
                    .collect();
                let mut template = base_template;
                Self::generate_head_templates(
                    &mut head_templates,
                    &bindings,
                    &links,
                    &mut template,
                    0,
                );
            }
        }

        if vid_to_locs.is_empty() {
            /* No head variable left unbound: filter the templates */
            head_templates
                .into_iter()
                .filter(|t| !head_relation.has_row(t))
                .map(Record::from)
                .collect()
        } else {
            /* Expand the remaining head variables over all constants */
            let var_locs: Vec<&Vec<usize>> = vid_to_locs.values().collect();
            let mut counterexamples = HashSet::new();
            for template in &head_templates {
                let mut working = template.clone();
                Self::expand_head_uvs(
                    head_relation,
                    kb.total_constants(),
                    &mut counterexamples,
                    &mut working,
                    &var_locs,
                    0,
                );
            }
            counterexamples
        }
    }

    fn generate_head_templates(
        templates: &mut HashSet<Vec<i32>>,
        bindings: &[HashSet<Record>],
        links: &[&[Vec<usize>]],
        template: &mut Vec<i32>,
        idx: usize,
    ) {
        for binding in &bindings[idx] {
            for (gv_idx, locs) in links[idx].iter().enumerate() {
                for &loc in locs {
                    template[loc] = binding[gv_idx];
                }
            }
            if idx == bindings.len() - 1 {
                templates.insert(template.clone());
            } else {
                Self::generate_head_templates(templates, bindings, links, template, idx + 1);
            }
        }
    }

    fn expand_head_uvs(
        head_relation: &crate::kb::SimpleRelation,
        total_constants: i32,
        counterexamples: &mut HashSet<Record>,
        template: &mut Vec<i32>,
        var_locs: &[&Vec<usize>],
        idx: usize,
    ) {
        for constant in 1..=total_constants {
            let argument = arg::constant(constant);
            for &loc in var_locs[idx] {
                template[loc] = argument;
            }
            if idx == var_locs.len() - 1 {
                if !head_relation.has_row(template) {
                    counterexamples.insert(Record::from(template.clone()));
                }
            } else {
                Self::expand_head_uvs(
                    head_relation,
                    total_constants,
                    counterexamples,
                    template,
                    var_locs,
                    idx + 1,
                );
            }
        }
    }
}


/// Union-find over dense LV ids.
struct DisjointSet {
    parents: Vec<usize>,
    total_sets: usize,
}

impl DisjointSet {
    fn new(capacity: usize) -> Self {
        DisjointSet {
            parents: (0..capacity).collect(),
            total_sets: capacity,
        }
    }

    fn find(&mut self, idx: usize) -> usize {
        if self.parents[idx] != idx {
            let root = self.find(self.parents[idx]);
            self.parents[idx] = root;
        }
        self.parents[idx]
    }

    fn union(&mut self, idx1: usize, idx2: usize) {
        let root1 = self.find(idx1);
        let root2 = self.find(idx2);
        if root1 != root2 {
            self.parents[root2] = root1;
            self.total_sets -= 1;
        }
    }

    fn total_sets(&self) -> usize {
        self.total_sets
    }
}
