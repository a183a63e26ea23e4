//! Complied blocks and the process-wide block pool.
//!
//! A [`CompliedBlock`] (CB) is an immutable view of a record subset plus
//! an optional [`IntTable`] index. Every CB lives in a [`CbPool`] arena
//! and is addressed by its dense [`CbId`]; the id equals the block's
//! insertion position. The pool memoizes the four update operators, so
//! no two blocks in the pool represent the same operator result and
//! repeated cache-fragment updates reuse already-indexed sub-tables.
//!
//! The pool lives for one target relation: it is constructed when a
//! relation miner starts and cleared when it finishes. Operator
//! statistics survive `clear` and feed the final run report.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::atom::Record;
use crate::table::IntTable;

/// Handle of a block inside its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CbId(pub usize);

/// An immutable record subset with an optional column index.
pub struct CompliedBlock {
    id: CbId,
    rows: Vec<Record>,
    arity: usize,
    index: Option<Arc<IntTable>>,
}

impl CompliedBlock {
    #[inline]
    pub fn id(&self) -> CbId {
        self.id
    }

    #[inline]
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    #[inline]
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// The block's index, if it has been built.
    #[inline]
    pub fn index(&self) -> Option<&Arc<IntTable>> {
        self.index.as_ref()
    }
}

/// Invocation and memoization-hit counters of one operator.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct OpStats {
    pub invocations: usize,
    pub hits: usize,
}

impl OpStats {
    fn invoke(&mut self) {
        self.invocations += 1;
    }

    fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn merge(&mut self, other: &OpStats) {
        self.invocations += other.invocations;
        self.hits += other.hits;
    }
}

/// Cumulative operator statistics of a pool.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CbPoolStats {
    pub creation: OpStats,
    pub get_slice: OpStats,
    pub split_slices: OpStats,
    pub match_slices_one: OpStats,
    pub match_slices_two: OpStats,
    /// High-water mark of the block count, sampled at `clear`.
    pub max_pool_size: usize,
}

impl CbPoolStats {
    pub fn total_invocations(&self) -> usize {
        self.creation.invocations
            + self.get_slice.invocations
            + self.split_slices.invocations
            + self.match_slices_one.invocations
            + self.match_slices_two.invocations
    }

    pub fn total_hits(&self) -> usize {
        self.creation.hits
            + self.get_slice.hits
            + self.split_slices.hits
            + self.match_slices_one.hits
            + self.match_slices_two.hits
    }

    /// Fold another pool's counters into this one (per-relation pools
    /// accumulate into the run totals).
    pub fn merge(&mut self, other: &CbPoolStats) {
        self.creation.merge(&other.creation);
        self.get_slice.merge(&other.get_slice);
        self.split_slices.merge(&other.split_slices);
        self.match_slices_one.merge(&other.match_slices_one);
        self.match_slices_two.merge(&other.match_slices_two);
        self.max_pool_size = self.max_pool_size.max(other.max_pool_size);
    }
}

/// Arena of complied blocks with memoized update operators.
#[derive(Default)]
pub struct CbPool {
    blocks: Vec<CompliedBlock>,
    /// Base blocks of whole relations, keyed by table identity.
    creation_memo: HashMap<usize, CbId>,
    get_slice_memo: HashMap<(CbId, usize, i32), CbId>,
    split_memo: HashMap<(CbId, usize), Vec<CbId>>,
    match_one_memo: HashMap<(CbId, usize, usize), Option<Vec<CbId>>>,
    match_two_memo: HashMap<(CbId, usize, CbId, usize), Option<(Vec<CbId>, Vec<CbId>)>>,
    stats: CbPoolStats,
}

impl CbPool {
    pub fn new() -> Self {
        CbPool::default()
    }

    /// Pre-reserve the arena and memo maps.
    ///
    /// The estimates are proportional to relation count, arity, and the
    /// number of promising constants, which bound how many operator
    /// results one mining round can materialize.
    pub fn reserve(
        &mut self,
        num_relations: usize,
        total_promising_constants: usize,
        total_constants: usize,
        sum_sq_arity: usize,
        sum_arity: usize,
    ) {
        let est_get_slice = total_promising_constants * num_relations;
        let est_split = total_constants;
        let est_match_one = sum_sq_arity;
        let est_match_two = sum_arity * sum_arity;
        self.creation_memo.reserve(num_relations);
        self.get_slice_memo.reserve(est_get_slice);
        self.split_memo.reserve(est_split);
        self.match_one_memo.reserve(est_match_one);
        self.match_two_memo.reserve(est_match_two);
        self.blocks
            .reserve(num_relations + est_get_slice + est_split + est_match_one + est_match_two);
    }

    #[inline]
    pub fn block(&self, id: CbId) -> &CompliedBlock {
        &self.blocks[id.0]
    }

    #[inline]
    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn stats(&self) -> &CbPoolStats {
        &self.stats
    }

    /// Register a new block. Not memoized; every call creates a block.
    pub fn create(&mut self, rows: Vec<Record>, arity: usize) -> CbId {
        self.register(rows, arity, None)
    }

    /// The block covering a whole indexed table, created on first use
    /// and shared afterwards. The table serves as the block's index, so
    /// no re-indexing happens for base relations.
    pub fn base_block(&mut self, table: &Arc<IntTable>) -> CbId {
        self.stats.creation.invoke();
        let key = Arc::as_ptr(table) as usize;
        if let Some(&id) = self.creation_memo.get(&key) {
            self.stats.creation.hit();
            return id;
        }
        let id = self.register(table.rows().to_vec(), table.arity(), Some(table.clone()));
        self.creation_memo.insert(key, id);
        id
    }

    /// Build the block's index if it does not exist yet.
    pub fn build_index(&mut self, id: CbId) {
        let block = &mut self.blocks[id.0];
        if block.index.is_none() {
            block.index = Some(Arc::new(IntTable::new(block.rows.clone(), block.arity)));
        }
    }

    /// Rows of `cb` with `row[col] == val` as a block, or `None` when
    /// the selection is empty. Non-empty results are memoized.
    pub fn get_slice(&mut self, cb: CbId, col: usize, val: i32) -> Option<CbId> {
        self.stats.get_slice.invoke();
        let key = (cb, col, val);
        if let Some(&id) = self.get_slice_memo.get(&key) {
            self.stats.get_slice.hit();
            return Some(id);
        }
        let index = self.index_of(cb);
        let arity = self.blocks[cb.0].arity;
        let slice = index.get_slice(col, val)?.to_vec();
        let id = self.register(slice, arity, None);
        self.get_slice_memo.insert(key, id);
        Some(id)
    }

    /// Partition of `cb` by the value in `col`, one block per distinct
    /// value. The result vector is shared across callers.
    pub fn split_slices(&mut self, cb: CbId, col: usize) -> Vec<CbId> {
        self.stats.split_slices.invoke();
        let key = (cb, col);
        if let Some(ids) = self.split_memo.get(&key) {
            self.stats.split_slices.hit();
            return ids.clone();
        }
        let index = self.index_of(cb);
        let arity = self.blocks[cb.0].arity;
        let ids: Vec<CbId> = index
            .split_slices(col)
            .into_iter()
            .map(|slice| self.register(slice.to_vec(), arity, None))
            .collect();
        self.split_memo.insert(key, ids.clone());
        ids
    }

    /// Partition of the rows of `cb` where `row[col1] == row[col2]`,
    /// grouped by the shared value; `None` when no row qualifies.
    pub fn match_slices_within(
        &mut self,
        cb: CbId,
        col1: usize,
        col2: usize,
    ) -> Option<Vec<CbId>> {
        self.stats.match_slices_one.invoke();
        let key = (cb, col1.min(col2), col1.max(col2));
        if let Some(cached) = self.match_one_memo.get(&key) {
            self.stats.match_slices_one.hit();
            return cached.clone();
        }
        let index = self.index_of(cb);
        let arity = self.blocks[cb.0].arity;
        let slices = index.match_slices_within(key.1, key.2);
        let result = if slices.is_empty() {
            None
        } else {
            Some(
                slices
                    .into_iter()
                    .map(|rows| self.register(rows, arity, None))
                    .collect::<Vec<CbId>>(),
            )
        };
        self.match_one_memo.insert(key, result.clone());
        result
    }

    /// Aligned partitions of two blocks by equal value of `cb1[col1]`
    /// and `cb2[col2]`; `None` when the columns share no value.
    ///
    /// Symmetric calls collapse to one memo entry: the first sequence of
    /// the returned pair always belongs to the block with the smaller
    /// id, so callers that passed arguments in the opposite order must
    /// swap the sequences.
    pub fn match_slices(
        &mut self,
        cb1: CbId,
        col1: usize,
        cb2: CbId,
        col2: usize,
    ) -> Option<(Vec<CbId>, Vec<CbId>)> {
        self.stats.match_slices_two.invoke();
        let (lo, lo_col, hi, hi_col) = if cb1 <= cb2 {
            (cb1, col1, cb2, col2)
        } else {
            (cb2, col2, cb1, col1)
        };
        let key = (lo, lo_col, hi, hi_col);
        if let Some(cached) = self.match_two_memo.get(&key) {
            self.stats.match_slices_two.hit();
            return cached.clone();
        }
        let index_lo = self.index_of(lo);
        let index_hi = self.index_of(hi);
        let arity_lo = self.blocks[lo.0].arity;
        let arity_hi = self.blocks[hi.0].arity;
        let matched = IntTable::match_slices(&index_lo, lo_col, &index_hi, hi_col);
        let result = if matched.slices1.is_empty() {
            None
        } else {
            let ids_lo: Vec<CbId> = matched
                .slices1
                .iter()
                .map(|slice| self.register(slice.to_vec(), arity_lo, None))
                .collect();
            let ids_hi: Vec<CbId> = matched
                .slices2
                .iter()
                .map(|slice| self.register(slice.to_vec(), arity_hi, None))
                .collect();
            Some((ids_lo, ids_hi))
        };
        self.match_two_memo.insert(key, result.clone());
        result
    }

    /// Drop every block and memo entry. Statistics are kept; the block
    /// high-water mark is sampled before the drop.
    pub fn clear(&mut self) {
        self.stats.max_pool_size = self.stats.max_pool_size.max(self.blocks.len());
        self.blocks.clear();
        self.creation_memo.clear();
        self.get_slice_memo.clear();
        self.split_memo.clear();
        self.match_one_memo.clear();
        self.match_two_memo.clear();
    }

    fn register(&mut self, rows: Vec<Record>, arity: usize, index: Option<Arc<IntTable>>) -> CbId {
        let id = CbId(self.blocks.len());
        self.blocks.push(CompliedBlock {
            id,
            rows,
            arity,
            index,
        });
        id
    }

    /// The block's index, building it on demand.
    fn index_of(&mut self, id: CbId) -> Arc<IntTable> {
        self.build_index(id);
        self.blocks[id.0]
            .index
            .clone()
            .unwrap_or_else(|| unreachable!("index was just built"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::record;

    fn pool_with_block(rows: &[&[i32]]) -> (CbPool, CbId) {
        let mut pool = CbPool::new();
        let records = rows.iter().map(|r| record(r)).collect();
        let id = pool.create(records, rows[0].len());
        (pool, id)
    }

    #[test]
    fn get_slice_selects_and_memoizes() {
        let (mut pool, cb) = pool_with_block(&[&[1, 2], &[1, 3], &[2, 2]]);
        let s1 = pool.get_slice(cb, 0, 1).expect("rows with col0 = 1");
        assert_eq!(2, pool.block(s1).total_rows());
        assert!(pool.block(s1).rows().iter().all(|r| r[0] == 1));

        let s2 = pool.get_slice(cb, 0, 1).expect("memoized");
        assert_eq!(s1, s2);
        assert_eq!(2, pool.stats().get_slice.invocations);
        assert_eq!(1, pool.stats().get_slice.hits);

        assert!(pool.get_slice(cb, 0, 9).is_none());
    }

    #[test]
    fn split_slices_shares_result_vector() {
        let (mut pool, cb) = pool_with_block(&[&[1, 2], &[1, 3], &[2, 2]]);
        let first = pool.split_slices(cb, 0);
        let second = pool.split_slices(cb, 0);
        assert_eq!(first, second);
        assert_eq!(2, first.len());
        assert_eq!(1, pool.stats().split_slices.hits);
    }

    #[test]
    fn match_within_single_block() {
        let (mut pool, cb) = pool_with_block(&[&[1, 1], &[2, 3], &[4, 4]]);
        let ids = pool.match_slices_within(cb, 0, 1).expect("two matches");
        assert_eq!(2, ids.len());
        // symmetric column order hits the same entry
        let ids2 = pool.match_slices_within(cb, 1, 0).expect("memoized");
        assert_eq!(ids, ids2);
        assert_eq!(1, pool.stats().match_slices_one.hits);

        let (mut pool, cb) = pool_with_block(&[&[1, 2], &[2, 3]]);
        assert!(pool.match_slices_within(cb, 0, 1).is_none());
        // the empty result is memoized as well
        assert!(pool.match_slices_within(cb, 0, 1).is_none());
        assert_eq!(1, pool.stats().match_slices_one.hits);
    }

    #[test]
    fn match_two_blocks_collapses_symmetric_calls() {
        let mut pool = CbPool::new();
        let a = pool.create(vec![record(&[1, 2]), record(&[3, 4])], 2);
        let b = pool.create(vec![record(&[2, 1]), record(&[4, 3]), record(&[9, 9])], 2);

        let (lo, hi) = pool.match_slices(a, 0, b, 1).expect("values 1 and 3 match");
        assert_eq!(2, lo.len());
        assert_eq!(2, hi.len());
        for (x, y) in lo.iter().zip(&hi) {
            assert_eq!(pool.block(*x).rows()[0][0], pool.block(*y).rows()[0][1]);
        }

        // swapped argument order: same memo entry, first sequence still
        // belongs to the lower id
        let (lo2, hi2) = pool.match_slices(b, 1, a, 0).expect("memoized");
        assert_eq!(lo, lo2);
        assert_eq!(hi, hi2);
        assert_eq!(1, pool.stats().match_slices_two.hits);
    }

    #[test]
    fn base_block_is_deduplicated_by_table() {
        let mut pool = CbPool::new();
        let table = Arc::new(IntTable::new(vec![record(&[1, 2]), record(&[3, 4])], 2));
        let a = pool.base_block(&table);
        let b = pool.base_block(&table);
        assert_eq!(a, b);
        assert_eq!(1, pool.stats().creation.hits);
        assert!(pool.block(a).index().is_some());
    }

    #[test]
    fn clear_keeps_statistics() {
        let (mut pool, cb) = pool_with_block(&[&[1, 2], &[2, 3]]);
        let _ = pool.get_slice(cb, 0, 1);
        pool.clear();
        assert_eq!(0, pool.total_blocks());
        assert_eq!(1, pool.stats().get_slice.invocations);
        assert!(pool.stats().max_pool_size >= 2);
    }
}
