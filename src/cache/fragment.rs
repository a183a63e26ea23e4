//! Cache fragments: joined relation groups linked by limited variables.
//!
//! A fragment holds a partially-assigned rule (PAR) — one predicate slot
//! per table — together with cache entries. An entry carries one
//! complied block per PAR predicate, and the Cartesian product of rows
//! across the blocks of an entry is exactly the set of body groundings
//! that survive the fragment's variable constraints. No relation in a
//! fragment is disconnected from the rest: every non-pseudo LV spans at
//! least two `(table, column)` slots.
//!
//! Fragment updates come in seven cases:
//!
//! - `1a`: bind an empty slot to an LV already known to this fragment
//! - `1b`: append a new relation and bind one of its columns to an
//!   existing LV
//! - `1c`: merge another fragment by binding a slot of it to an LV of
//!   this fragment
//! - `2a`: bind two empty slots of this fragment to a fresh LV
//! - `2b`: append a new relation and span a fresh LV between an
//!   existing slot and a column of the new relation
//! - `2c`: merge another fragment via a fresh LV, one slot on each side
//! - `3`: bind an empty slot to a constant
//!
//! Every update rebuilds the entry list through the pool operators; the
//! previous entries are dropped wholesale.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::atom::{arg, Predicate, Record, record_identity};
use crate::cache::block::{CbId, CbPool};
use crate::table::IntTable;

/// Location of one occurrence of a limited variable in a fragment.
///
/// `is_plv` marks a *pseudo* limited variable: the variable currently
/// occurs in exactly one slot of this fragment and constrains rows
/// within a block rather than across blocks. It is promoted to a proper
/// LV the next time a second occurrence is linked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarInfo {
    pub tab_idx: usize,
    pub col_idx: usize,
    pub is_plv: bool,
}

/// One cache entry: one block per fragment predicate.
pub type Entry = Vec<CbId>;

/// A chain of complied blocks linked by limited variables.
#[derive(Clone)]
pub struct CacheFragment {
    part_assigned_rule: Vec<Predicate>,
    entries: Vec<Entry>,
    /// Indexed by LV id; `None` for ids not present in this fragment.
    var_info: Vec<Option<VarInfo>>,
}

impl CacheFragment {
    /// A fragment over a whole relation: a single entry holding the
    /// relation's base block.
    pub fn from_relation(table: &Arc<IntTable>, symbol: usize, pool: &mut CbPool) -> Self {
        let cb = pool.base_block(table);
        CacheFragment {
            part_assigned_rule: vec![Predicate::empty(symbol, table.arity())],
            entries: vec![vec![cb]],
            var_info: Vec::new(),
        }
    }

    /// A fragment over an existing block.
    pub fn from_block(cb: CbId, symbol: usize, pool: &CbPool) -> Self {
        let arity = pool.block(cb).arity();
        CacheFragment {
            part_assigned_rule: vec![Predicate::empty(symbol, arity)],
            entries: vec![vec![cb]],
            var_info: Vec::new(),
        }
    }

    /// A fragment with no entries.
    pub fn empty(symbol: usize, arity: usize) -> Self {
        CacheFragment {
            part_assigned_rule: vec![Predicate::empty(symbol, arity)],
            entries: Vec::new(),
            var_info: Vec::new(),
        }
    }

    /// Case 1a. If the LV is new to this fragment, record it as a PLV
    /// and leave the entries unchanged.
    pub fn update_case_1a(&mut self, tab_idx: usize, col_idx: usize, vid: usize, pool: &mut CbPool) {
        self.part_assigned_rule[tab_idx].args[col_idx] = arg::variable(vid);
        match self.var_info.get(vid).copied().flatten() {
            Some(info) if info.is_plv => {
                /* Second occurrence: promote and split by the two columns */
                if let Some(slot) = self.var_info.get_mut(vid).and_then(Option::as_mut) {
                    slot.is_plv = false;
                }
                self.split_cache_entries(info.tab_idx, info.col_idx, tab_idx, col_idx, pool);
            }
            Some(info) => {
                /* Already a proper LV: filter the new column against it */
                self.match_cache_entries(info.tab_idx, info.col_idx, tab_idx, col_idx, pool);
            }
            None => self.add_var_info(vid, tab_idx, col_idx, true),
        }
    }

    /// Case 1b. The LV must already be assigned in this fragment.
    pub fn update_case_1b(
        &mut self,
        new_relation: &Arc<IntTable>,
        symbol: usize,
        col_idx: usize,
        vid: usize,
        pool: &mut CbPool,
    ) {
        let mut pred = Predicate::empty(symbol, new_relation.arity());
        pred.args[col_idx] = arg::variable(vid);
        self.part_assigned_rule.push(pred);

        let info = self.var_info[vid].unwrap_or_else(|| unreachable!("case 1b requires a bound LV"));
        if info.is_plv {
            if let Some(slot) = self.var_info.get_mut(vid).and_then(Option::as_mut) {
                slot.is_plv = false;
            }
            self.split_entries_with_new(info.tab_idx, info.col_idx, new_relation, col_idx, pool);
        } else {
            self.match_entries_with_new(info.tab_idx, info.col_idx, new_relation, col_idx, pool);
        }
    }

    /// Case 1c. `donor` is merged into this fragment; `(tab_idx,
    /// col_idx)` is the donor slot unified with `vid`, an LV of this
    /// fragment.
    pub fn update_case_1c(
        &mut self,
        donor: &CacheFragment,
        tab_idx: usize,
        col_idx: usize,
        vid: usize,
        pool: &mut CbPool,
    ) {
        let original_tabs = self.part_assigned_rule.len();
        self.part_assigned_rule
            .extend(donor.part_assigned_rule.iter().cloned());
        self.part_assigned_rule[original_tabs + tab_idx].args[col_idx] = arg::variable(vid);
        self.merge_var_info(donor, original_tabs);

        let merging_map = Self::const_to_entries_map(&donor.entries, tab_idx, col_idx, pool);
        let info = self.var_info[vid].unwrap_or_else(|| unreachable!("case 1c requires a bound LV"));
        if info.is_plv {
            if let Some(slot) = self.var_info.get_mut(vid).and_then(Option::as_mut) {
                slot.is_plv = false;
            }
            let base_map = Self::const_to_entries_map(&self.entries, info.tab_idx, info.col_idx, pool);
            self.merge_entry_maps(&base_map, &merging_map);
        } else {
            self.merge_entries_by_column(info.tab_idx, info.col_idx, &merging_map, pool);
        }
    }

    /// Case 2a.
    pub fn update_case_2a(
        &mut self,
        tab_idx1: usize,
        col_idx1: usize,
        tab_idx2: usize,
        col_idx2: usize,
        new_vid: usize,
        pool: &mut CbPool,
    ) {
        self.add_var_info(new_vid, tab_idx1, col_idx1, false);
        let var_arg = arg::variable(new_vid);
        self.part_assigned_rule[tab_idx1].args[col_idx1] = var_arg;
        self.part_assigned_rule[tab_idx2].args[col_idx2] = var_arg;
        self.split_cache_entries(tab_idx1, col_idx1, tab_idx2, col_idx2, pool);
    }

    /// Case 2b.
    pub fn update_case_2b(
        &mut self,
        new_relation: &Arc<IntTable>,
        symbol: usize,
        col_idx1: usize,
        tab_idx2: usize,
        col_idx2: usize,
        new_vid: usize,
        pool: &mut CbPool,
    ) {
        self.add_var_info(new_vid, tab_idx2, col_idx2, false);
        let var_arg = arg::variable(new_vid);
        self.part_assigned_rule[tab_idx2].args[col_idx2] = var_arg;
        let mut pred = Predicate::empty(symbol, new_relation.arity());
        pred.args[col_idx1] = var_arg;
        self.part_assigned_rule.push(pred);
        self.split_entries_with_new(tab_idx2, col_idx2, new_relation, col_idx1, pool);
    }

    /// Case 2c. `(tab_idx, col_idx)` is the slot in this fragment,
    /// `(tab_idx2, col_idx2)` the slot in `donor`.
    pub fn update_case_2c(
        &mut self,
        tab_idx: usize,
        col_idx: usize,
        donor: &CacheFragment,
        tab_idx2: usize,
        col_idx2: usize,
        new_vid: usize,
        pool: &mut CbPool,
    ) {
        let original_tabs = self.part_assigned_rule.len();
        self.part_assigned_rule
            .extend(donor.part_assigned_rule.iter().cloned());
        let var_arg = arg::variable(new_vid);
        self.part_assigned_rule[tab_idx].args[col_idx] = var_arg;
        self.part_assigned_rule[original_tabs + tab_idx2].args[col_idx2] = var_arg;

        self.add_var_info(new_vid, tab_idx, col_idx, false);
        self.merge_var_info(donor, original_tabs);

        let merging_map = Self::const_to_entries_map(&donor.entries, tab_idx2, col_idx2, pool);
        let base_map = Self::const_to_entries_map(&self.entries, tab_idx, col_idx, pool);
        self.merge_entry_maps(&base_map, &merging_map);
    }

    /// Case 3: bind a slot to a constant.
    pub fn update_case_3(&mut self, tab_idx: usize, col_idx: usize, constant: i32, pool: &mut CbPool) {
        self.part_assigned_rule[tab_idx].args[col_idx] = arg::constant(constant);
        self.assign_cache_entries(tab_idx, col_idx, constant, pool);
    }

    /// Build the index of every block in the entries. Must run before
    /// an update that slices the blocks.
    pub fn build_indices(&self, pool: &mut CbPool) {
        for entry in &self.entries {
            for &cb in entry {
                pool.build_index(cb);
            }
        }
    }

    pub fn has_lv(&self, vid: usize) -> bool {
        self.var_info.get(vid).copied().flatten().is_some()
    }

    /// The number of unique value combinations of the listed variables.
    ///
    /// `vids` must not contain duplicates or variables absent from this
    /// fragment. Proper LVs are read from any row of their block (those
    /// blocks are row-homogeneous on the LV column); PLVs contribute the
    /// distinct tuples of their columns within each block, multiplied
    /// across tables and deduplicated under the LV key.
    pub fn count_combinations(&self, vids: &[usize], pool: &CbPool) -> usize {
        let num_tabs = self.part_assigned_rule.len();
        let mut lvs: Vec<VarInfo> = Vec::with_capacity(vids.len());
        let mut plv_cols: Vec<Vec<usize>> = vec![Vec::new(); num_tabs];
        let mut tabs_with_plvs: Vec<usize> = Vec::new();
        for &vid in vids {
            let info = self.var_info[vid].unwrap_or_else(|| unreachable!("vid must be bound"));
            if info.is_plv {
                if plv_cols[info.tab_idx].is_empty() {
                    tabs_with_plvs.push(info.tab_idx);
                }
                plv_cols[info.tab_idx].push(info.col_idx);
            } else {
                lvs.push(info);
            }
        }

        if tabs_with_plvs.is_empty() {
            /* No PLV: one LV tuple per entry, deduplicated */
            let mut lv_bindings: HashSet<Vec<i32>> = HashSet::with_capacity(self.entries.len());
            for entry in &self.entries {
                let binding: Vec<i32> = lvs
                    .iter()
                    .map(|info| pool.block(entry[info.tab_idx]).rows()[0][info.col_idx])
                    .collect();
                lv_bindings.insert(binding);
            }
            lv_bindings.len()
        } else {
            let mut by_lv_binding: HashMap<Vec<i32>, HashSet<Vec<i32>>> =
                HashMap::with_capacity(self.entries.len());
            for entry in &self.entries {
                let lv_binding: Vec<i32> = lvs
                    .iter()
                    .map(|info| pool.block(entry[info.tab_idx]).rows()[0][info.col_idx])
                    .collect();
                let complete = by_lv_binding.entry(lv_binding).or_default();

                /* Distinct PLV tuples per table, then their product */
                let mut per_tab_sets: Vec<HashSet<Vec<i32>>> =
                    Vec::with_capacity(tabs_with_plvs.len());
                for &tab_idx in &tabs_with_plvs {
                    let cols = &plv_cols[tab_idx];
                    let mut set = HashSet::new();
                    for row in pool.block(entry[tab_idx]).rows() {
                        set.insert(cols.iter().map(|&c| row[c]).collect::<Vec<i32>>());
                    }
                    per_tab_sets.push(set);
                }
                let mut product: Vec<Vec<i32>> = vec![Vec::new()];
                for set in &per_tab_sets {
                    let mut next = Vec::with_capacity(product.len() * set.len());
                    for prefix in &product {
                        for tuple in set {
                            let mut combined = prefix.clone();
                            combined.extend_from_slice(tuple);
                            next.push(combined);
                        }
                    }
                    product = next;
                }
                complete.extend(product);
            }
            by_lv_binding.values().map(HashSet::len).sum()
        }
    }

    /// The set of value combinations of the listed variables, each in
    /// the order of `vids`.
    pub fn enumerate_combinations(&self, vids: &[usize], pool: &CbPool) -> HashSet<Record> {
        let num_tabs = self.part_assigned_rule.len();
        let mut lvs: Vec<(usize, VarInfo)> = Vec::with_capacity(vids.len());
        let mut plv_cols: Vec<Vec<usize>> = vec![Vec::new(); num_tabs];
        let mut plv_template_idxs: Vec<Vec<usize>> = vec![Vec::new(); num_tabs];
        let mut tabs_with_plvs: Vec<usize> = Vec::new();
        for (template_idx, &vid) in vids.iter().enumerate() {
            let info = self.var_info[vid].unwrap_or_else(|| unreachable!("vid must be bound"));
            if info.is_plv {
                if plv_cols[info.tab_idx].is_empty() {
                    tabs_with_plvs.push(info.tab_idx);
                }
                plv_cols[info.tab_idx].push(info.col_idx);
                plv_template_idxs[info.tab_idx].push(template_idx);
            } else {
                lvs.push((template_idx, info));
            }
        }

        let mut bindings: HashSet<Record> = HashSet::with_capacity(self.entries.len());
        if tabs_with_plvs.is_empty() {
            for entry in &self.entries {
                let mut binding = vec![0i32; vids.len()];
                for (template_idx, info) in &lvs {
                    binding[*template_idx] =
                        pool.block(entry[info.tab_idx]).rows()[0][info.col_idx];
                }
                bindings.insert(Record::from(binding));
            }
        } else {
            let mut template = vec![0i32; vids.len()];
            for entry in &self.entries {
                for (template_idx, info) in &lvs {
                    template[*template_idx] =
                        pool.block(entry[info.tab_idx]).rows()[0][info.col_idx];
                }

                let mut per_tab_sets: Vec<HashSet<Vec<i32>>> =
                    Vec::with_capacity(tabs_with_plvs.len());
                for &tab_idx in &tabs_with_plvs {
                    let cols = &plv_cols[tab_idx];
                    let mut set = HashSet::new();
                    for row in pool.block(entry[tab_idx]).rows() {
                        set.insert(cols.iter().map(|&c| row[c]).collect::<Vec<i32>>());
                    }
                    per_tab_sets.push(set);
                }
                Self::fill_plv_templates(
                    &mut bindings,
                    &per_tab_sets,
                    &tabs_with_plvs
                        .iter()
                        .map(|&t| plv_template_idxs[t].as_slice())
                        .collect::<Vec<_>>(),
                    &mut template,
                    0,
                );
            }
        }
        bindings
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[inline]
    pub fn num_tables(&self) -> usize {
        self.part_assigned_rule.len()
    }

    #[inline]
    pub fn part_assigned_rule(&self) -> &[Predicate] {
        &self.part_assigned_rule
    }

    #[inline]
    pub fn var_infos(&self) -> &[Option<VarInfo>] {
        &self.var_info
    }

    /// The number of unique records covered by one table of the
    /// fragment, across all entries.
    pub fn count_table_size(&self, tab_idx: usize, pool: &CbPool) -> usize {
        /* Rows come from the original KB storage, so identity equality
         * coincides with value equality here */
        let mut seen: HashSet<usize> = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            for row in pool.block(entry[tab_idx]).rows() {
                seen.insert(record_identity(row));
            }
        }
        seen.len()
    }

    /* ------------------------------------------------------------ */
    /* Entry rebuilding primitives                                   */
    /* ------------------------------------------------------------ */

    /// Split entries so the two columns agree within every new entry.
    fn split_cache_entries(
        &mut self,
        tab_idx1: usize,
        col_idx1: usize,
        tab_idx2: usize,
        col_idx2: usize,
        pool: &mut CbPool,
    ) {
        let mut new_entries = Vec::new();
        if tab_idx1 == tab_idx2 {
            for entry in &self.entries {
                if let Some(cbs) = pool.match_slices_within(entry[tab_idx1], col_idx1, col_idx2) {
                    for cb in cbs {
                        let mut new_entry = entry.clone();
                        new_entry[tab_idx1] = cb;
                        new_entries.push(new_entry);
                    }
                }
            }
        } else {
            for entry in &self.entries {
                let cb1 = entry[tab_idx1];
                let cb2 = entry[tab_idx2];
                if let Some((lo, hi)) = pool.match_slices(cb1, col_idx1, cb2, col_idx2) {
                    let (cbs1, cbs2) = if cb1 <= cb2 { (lo, hi) } else { (hi, lo) };
                    for (new_cb1, new_cb2) in cbs1.into_iter().zip(cbs2) {
                        let mut new_entry = entry.clone();
                        new_entry[tab_idx1] = new_cb1;
                        new_entry[tab_idx2] = new_cb2;
                        new_entries.push(new_entry);
                    }
                }
            }
        }
        self.entries = new_entries;
    }

    /// Split entries against a newly appended relation.
    fn split_entries_with_new(
        &mut self,
        tab_idx1: usize,
        col_idx1: usize,
        new_relation: &Arc<IntTable>,
        col_idx2: usize,
        pool: &mut CbPool,
    ) {
        let mut new_entries = Vec::new();
        for entry in &self.entries {
            let cb1 = entry[tab_idx1];
            let cb2 = pool.base_block(new_relation);
            if let Some((lo, hi)) = pool.match_slices(cb1, col_idx1, cb2, col_idx2) {
                let (cbs1, cbs2) = if cb1 <= cb2 { (lo, hi) } else { (hi, lo) };
                for (new_cb1, new_cb2) in cbs1.into_iter().zip(cbs2) {
                    let mut new_entry = entry.clone();
                    new_entry[tab_idx1] = new_cb1;
                    new_entry.push(new_cb2);
                    new_entries.push(new_entry);
                }
            }
        }
        self.entries = new_entries;
    }

    /// Filter a column to the constant already pinned at an LV column.
    fn match_cache_entries(
        &mut self,
        matched_tab: usize,
        matched_col: usize,
        matching_tab: usize,
        matching_col: usize,
        pool: &mut CbPool,
    ) {
        let mut new_entries = Vec::new();
        for entry in &self.entries {
            let pinned = pool.block(entry[matched_tab]).rows()[0][matched_col];
            if let Some(cb) = pool.get_slice(entry[matching_tab], matching_col, pinned) {
                let mut new_entry = entry.clone();
                new_entry[matching_tab] = cb;
                new_entries.push(new_entry);
            }
        }
        self.entries = new_entries;
    }

    /// Append a new relation filtered to the pinned LV value.
    fn match_entries_with_new(
        &mut self,
        matched_tab: usize,
        matched_col: usize,
        new_relation: &Arc<IntTable>,
        matching_col: usize,
        pool: &mut CbPool,
    ) {
        let mut new_entries = Vec::new();
        for entry in &self.entries {
            let pinned = pool.block(entry[matched_tab]).rows()[0][matched_col];
            let rel_cb = pool.base_block(new_relation);
            if let Some(cb) = pool.get_slice(rel_cb, matching_col, pinned) {
                let mut new_entry = entry.clone();
                new_entry.push(cb);
                new_entries.push(new_entry);
            }
        }
        self.entries = new_entries;
    }

    /// Filter one column to a constant.
    fn assign_cache_entries(&mut self, tab_idx: usize, col_idx: usize, constant: i32, pool: &mut CbPool) {
        let mut new_entries = Vec::new();
        for entry in &self.entries {
            if let Some(cb) = pool.get_slice(entry[tab_idx], col_idx, constant) {
                let mut new_entry = entry.clone();
                new_entry[tab_idx] = cb;
                new_entries.push(new_entry);
            }
        }
        self.entries = new_entries;
    }

    /// Group entries by the constant value at one column, splitting the
    /// addressed block per distinct value. Ordered by constant so the
    /// merged entry list is reproducible run to run.
    fn const_to_entries_map(
        entries: &[Entry],
        tab_idx: usize,
        col_idx: usize,
        pool: &mut CbPool,
    ) -> BTreeMap<i32, Vec<Entry>> {
        let mut map: BTreeMap<i32, Vec<Entry>> = BTreeMap::new();
        for entry in entries {
            for slice in pool.split_slices(entry[tab_idx], col_idx) {
                let constant = pool.block(slice).rows()[0][col_idx];
                let mut new_entry = entry.clone();
                new_entry[tab_idx] = slice;
                map.entry(constant).or_default().push(new_entry);
            }
        }
        map
    }

    /// Hash-join two groupings on the shared constant; the cross product
    /// of matching groups becomes the new entry list.
    fn merge_entry_maps(
        &mut self,
        base_map: &BTreeMap<i32, Vec<Entry>>,
        merging_map: &BTreeMap<i32, Vec<Entry>>,
    ) {
        let mut new_entries = Vec::new();
        for (constant, base_entries) in base_map {
            if let Some(merging_entries) = merging_map.get(constant) {
                for base_entry in base_entries {
                    for merging_entry in merging_entries {
                        let mut new_entry = base_entry.clone();
                        new_entry.extend_from_slice(merging_entry);
                        new_entries.push(new_entry);
                    }
                }
            }
        }
        self.entries = new_entries;
    }

    /// Join the current entries (keyed by an LV-pinned column) against a
    /// grouping of donor entries.
    fn merge_entries_by_column(
        &mut self,
        tab_idx: usize,
        col_idx: usize,
        merging_map: &BTreeMap<i32, Vec<Entry>>,
        pool: &CbPool,
    ) {
        let mut new_entries = Vec::new();
        for base_entry in &self.entries {
            let constant = pool.block(base_entry[tab_idx]).rows()[0][col_idx];
            if let Some(merging_entries) = merging_map.get(&constant) {
                for merging_entry in merging_entries {
                    let mut new_entry = base_entry.clone();
                    new_entry.extend_from_slice(merging_entry);
                    new_entries.push(new_entry);
                }
            }
        }
        self.entries = new_entries;
    }

    fn add_var_info(&mut self, vid: usize, tab_idx: usize, col_idx: usize, is_plv: bool) {
        if vid >= self.var_info.len() {
            self.var_info.resize(vid + 1, None);
        }
        self.var_info[vid] = Some(VarInfo {
            tab_idx,
            col_idx,
            is_plv,
        });
    }

    /// Import the donor's variable locations, shifted by the donor's
    /// table offset. Variables already known here keep their location.
    fn merge_var_info(&mut self, donor: &CacheFragment, original_tabs: usize) {
        for (vid, info) in donor.var_info.iter().enumerate().rev() {
            if let Some(info) = info {
                let known = self.var_info.get(vid).copied().flatten().is_some();
                if !known {
                    self.add_var_info(
                        vid,
                        original_tabs + info.tab_idx,
                        info.col_idx,
                        info.is_plv,
                    );
                }
            }
        }
    }

    /// Recursively substitute per-table PLV tuples into the template and
    /// collect the finished bindings.
    fn fill_plv_templates(
        bindings: &mut HashSet<Record>,
        per_tab_sets: &[HashSet<Vec<i32>>],
        template_idx_lists: &[&[usize]],
        template: &mut Vec<i32>,
        set_idx: usize,
    ) {
        let idxs = template_idx_lists[set_idx];
        if set_idx == per_tab_sets.len() - 1 {
            for tuple in &per_tab_sets[set_idx] {
                for (i, &template_idx) in idxs.iter().enumerate() {
                    template[template_idx] = tuple[i];
                }
                bindings.insert(Record::from(template.clone()));
            }
        } else {
            for tuple in &per_tab_sets[set_idx] {
                for (i, &template_idx) in idxs.iter().enumerate() {
                    template[template_idx] = tuple[i];
                }
                Self::fill_plv_templates(
                    bindings,
                    per_tab_sets,
                    template_idx_lists,
                    template,
                    set_idx + 1,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::record;

    fn shared_table(rows: &[&[i32]]) -> Arc<IntTable> {
        Arc::new(IntTable::new(
            rows.iter().map(|r| record(r)).collect(),
            rows[0].len(),
        ))
    }

    /// parent rows of the family fixture used across the rule tests.
    fn parent_table() -> Arc<IntTable> {
        shared_table(&[
            &[5, 10],
            &[5, 14],
            &[6, 11],
            &[6, 15],
            &[9, 15],
            &[1, 5],
            &[2, 6],
            &[2, 9],
            &[3, 7],
        ])
    }

    #[test]
    fn new_lv_is_recorded_as_plv_without_touching_entries() {
        let mut pool = CbPool::new();
        let table = parent_table();
        let mut frag = CacheFragment::from_relation(&table, 1, &mut pool);
        assert_eq!(1, frag.entries().len());

        frag.update_case_1a(0, 0, 0, &mut pool);
        assert!(frag.has_lv(0));
        assert_eq!(1, frag.entries().len());
        assert!(frag.var_infos()[0].map(|i| i.is_plv).unwrap_or(false));
    }

    #[test]
    fn promoting_a_plv_splits_entries() {
        let mut pool = CbPool::new();
        let table = shared_table(&[&[1, 1], &[1, 2], &[2, 2], &[3, 4]]);
        let mut frag = CacheFragment::from_relation(&table, 0, &mut pool);
        frag.build_indices(&mut pool);
        frag.update_case_1a(0, 0, 0, &mut pool);
        /* Second occurrence in the same table: rows where col0 == col1 */
        frag.update_case_1a(0, 1, 0, &mut pool);
        assert_eq!(2, frag.entries().len());
        for entry in frag.entries() {
            for row in pool.block(entry[0]).rows() {
                assert_eq!(row[0], row[1]);
            }
        }
    }

    #[test]
    fn case_2b_joins_against_a_new_relation() {
        let mut pool = CbPool::new();
        let table = parent_table();
        let mut frag = CacheFragment::from_relation(&table, 1, &mut pool);
        frag.build_indices(&mut pool);
        /* parent(?, X0), parent(X0, ?) */
        frag.update_case_2b(&table, 1, 0, 0, 1, 0, &mut pool);
        assert_eq!(2, frag.num_tables());
        /* col1 of tab0 joined with col0 of tab1: values 5, 6, 9 */
        assert_eq!(3, frag.entries().len());
        for entry in frag.entries() {
            let v = pool.block(entry[0]).rows()[0][1];
            assert!(pool.block(entry[0]).rows().iter().all(|r| r[1] == v));
            assert!(pool.block(entry[1]).rows().iter().all(|r| r[0] == v));
        }
    }

    #[test]
    fn case_3_filters_by_constant() {
        let mut pool = CbPool::new();
        let table = parent_table();
        let mut frag = CacheFragment::from_relation(&table, 1, &mut pool);
        frag.build_indices(&mut pool);
        frag.update_case_3(0, 0, 6, &mut pool);
        assert_eq!(1, frag.entries().len());
        assert_eq!(2, pool.block(frag.entries()[0][0]).total_rows());

        frag.build_indices(&mut pool);
        frag.update_case_3(0, 1, 999, &mut pool);
        assert!(frag.is_empty());
    }

    #[test]
    fn count_combinations_of_plvs_multiplies_within_entries() {
        let mut pool = CbPool::new();
        let table = parent_table();
        let mut frag = CacheFragment::from_relation(&table, 1, &mut pool);
        frag.build_indices(&mut pool);
        /* parent(X0, X1), parent(X1, X2): X1 is the LV, X0/X2 are PLVs */
        frag.update_case_1a(0, 0, 0, &mut pool);
        frag.update_case_2b(&table, 1, 0, 0, 1, 1, &mut pool);
        frag.build_indices(&mut pool);
        frag.update_case_1a(1, 1, 2, &mut pool);

        /* grandparent pairs: (1,10),(1,14),(2,11),(2,15),(3,7)x0 -> via
         * f1: {1}x{10,14}, f2: {2}x{11,15}, m2: {2}x{15} */
        assert_eq!(4, frag.count_combinations(&[0, 2], &pool));
        let combos = frag.enumerate_combinations(&[0, 2], &pool);
        assert_eq!(4, combos.len());
        assert!(combos.contains(&record(&[1, 10])));
        assert!(combos.contains(&record(&[1, 14])));
        assert!(combos.contains(&record(&[2, 11])));
        assert!(combos.contains(&record(&[2, 15])));
    }

    #[test]
    fn case_1c_merge_with_empty_donor_keeps_base_empty_of_matches() {
        let mut pool = CbPool::new();
        let table = parent_table();
        let mut base = CacheFragment::from_relation(&table, 1, &mut pool);
        base.build_indices(&mut pool);
        base.update_case_1a(0, 0, 0, &mut pool);

        let donor = CacheFragment::empty(1, 2);
        let tabs_before = base.num_tables();
        base.update_case_1c(&donor, 0, 1, 0, &mut pool);
        /* PAR is extended even though the donor carried no entries */
        assert_eq!(tabs_before + 1, base.num_tables());
        assert!(base.is_empty());
    }
}
