//! Hash-free indexed table of integer records.
//!
//! An [`IntTable`] indexes a fixed set of same-arity records by every
//! column. For each column it keeps the rows stably sorted by that
//! column, the sorted array of distinct values, and the `[start, end)`
//! offsets of each value's run inside the sorted view. Columns are
//! sorted from the last to the first with a stable sort, so the view of
//! column 0 is the lexicographic order of the whole table.
//!
//! With row memory `M` the index costs no more than `3M`; queries are
//! binary searches over the distinct-value arrays followed by interval
//! scans.
//!
//! The table requires non-empty, duplicate-free input of uniform arity;
//! violations are caller bugs (checked by `debug_assert!`).

use crate::atom::Record;

/// Aligned partitions produced by matching one column of each of two
/// tables on value equality.
pub struct MatchedSlices<'a, 'b> {
    /// Sub-slices of the first table, one per matched value.
    pub slices1: Vec<&'a [Record]>,
    /// Sub-slices of the second table, aligned with `slices1`.
    pub slices2: Vec<&'b [Record]>,
}

/// Multi-column index over a set of records.
pub struct IntTable {
    arity: usize,
    /// Row views per column; `sorted_by_col[0]` is the global sort order.
    sorted_by_col: Vec<Vec<Record>>,
    /// Distinct values per column, ascending.
    values_by_col: Vec<Vec<i32>>,
    /// Start offsets per column; one extra trailing element = total rows.
    offsets_by_col: Vec<Vec<usize>>,
}

impl IntTable {
    /// Build the per-column views of `rows`.
    ///
    /// `rows` must be non-empty, duplicate-free, and every record must
    /// have length `arity`.
    pub fn new(mut rows: Vec<Record>, arity: usize) -> Self {
        debug_assert!(!rows.is_empty(), "IntTable requires at least one row");
        debug_assert!(rows.iter().all(|r| r.len() == arity));

        let total_rows = rows.len();
        let mut sorted_by_col = vec![Vec::new(); arity];
        let mut values_by_col = vec![Vec::new(); arity];
        let mut offsets_by_col = vec![Vec::new(); arity];

        for col in (0..arity).rev() {
            rows.sort_by_key(|r| r[col]);

            let mut values = Vec::new();
            let mut offsets = Vec::new();
            let mut current = rows[0][col];
            values.push(current);
            offsets.push(0);
            for (i, row) in rows.iter().enumerate().skip(1) {
                if row[col] != current {
                    current = row[col];
                    values.push(current);
                    offsets.push(i);
                }
            }
            offsets.push(total_rows);

            sorted_by_col[col] = rows.clone();
            values_by_col[col] = values;
            offsets_by_col[col] = offsets;
        }

        IntTable {
            arity,
            sorted_by_col,
            values_by_col,
            offsets_by_col,
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[inline]
    pub fn total_rows(&self) -> usize {
        self.sorted_by_col[0].len()
    }

    /// All rows in lexicographic order.
    #[inline]
    pub fn rows(&self) -> &[Record] {
        &self.sorted_by_col[0]
    }

    /// Whether `row` is in the table. `row` must have the table's arity.
    pub fn has_row(&self, row: &[i32]) -> bool {
        self.where_is(row).is_some()
    }

    /// The offset of `row` in the lexicographic view, if present.
    pub fn where_is(&self, row: &[i32]) -> Option<usize> {
        let rows = self.rows();
        let idx = rows.partition_point(|r| r.as_ref() < row);
        (idx < rows.len() && rows[idx].as_ref() == row).then_some(idx)
    }

    /// Rows with `row[col] == val`, or `None` if no such row exists.
    pub fn get_slice(&self, col: usize, val: i32) -> Option<&[Record]> {
        let values = &self.values_by_col[col];
        let idx = values.binary_search(&val).ok()?;
        let offsets = &self.offsets_by_col[col];
        Some(&self.sorted_by_col[col][offsets[idx]..offsets[idx + 1]])
    }

    /// Partition the rows by the value in `col`, one slice per distinct
    /// value, values ascending. The concatenation of the result is a
    /// permutation of the full row set.
    pub fn split_slices(&self, col: usize) -> Vec<&[Record]> {
        let offsets = &self.offsets_by_col[col];
        let view = &self.sorted_by_col[col];
        (0..self.values_by_col[col].len())
            .map(|i| &view[offsets[i]..offsets[i + 1]])
            .collect()
    }

    /// Partition the rows where `row[col1] == row[col2]`, grouped by the
    /// shared value. Groups with no satisfying row are dropped.
    pub fn match_slices_within(&self, col1: usize, col2: usize) -> Vec<Vec<Record>> {
        let values = &self.values_by_col[col1];
        let offsets = &self.offsets_by_col[col1];
        let view = &self.sorted_by_col[col1];
        let mut slices = Vec::new();
        for (i, &val) in values.iter().enumerate() {
            let slice: Vec<Record> = view[offsets[i]..offsets[i + 1]]
                .iter()
                .filter(|r| r[col2] == val)
                .cloned()
                .collect();
            if !slice.is_empty() {
                slices.push(slice);
            }
        }
        slices
    }

    /// Match the values of one column in each of two tables. For every
    /// value present in both columns the result carries the pair of row
    /// runs holding that value, aligned by position.
    pub fn match_slices<'a, 'b>(
        tab1: &'a IntTable,
        col1: usize,
        tab2: &'b IntTable,
        col2: usize,
    ) -> MatchedSlices<'a, 'b> {
        let values1 = &tab1.values_by_col[col1];
        let values2 = &tab2.values_by_col[col2];
        let offsets1 = &tab1.offsets_by_col[col1];
        let offsets2 = &tab2.offsets_by_col[col2];
        let view1 = &tab1.sorted_by_col[col1];
        let view2 = &tab2.sorted_by_col[col2];

        let mut result = MatchedSlices {
            slices1: Vec::new(),
            slices2: Vec::new(),
        };
        let mut idx1 = 0;
        let mut idx2 = 0;
        while idx1 < values1.len() && idx2 < values2.len() {
            let val1 = values1[idx1];
            let val2 = values2[idx2];
            if val1 < val2 {
                idx1 += 1 + values1[idx1 + 1..].partition_point(|&v| v < val2);
            } else if val1 > val2 {
                idx2 += 1 + values2[idx2 + 1..].partition_point(|&v| v < val1);
            } else {
                result
                    .slices1
                    .push(&view1[offsets1[idx1]..offsets1[idx1 + 1]]);
                result
                    .slices2
                    .push(&view2[offsets2[idx2]..offsets2[idx2 + 1]]);
                idx1 += 1;
                idx2 += 1;
            }
        }
        result
    }

    /// Extend the binary match to `n` tables: per table, the runs of the
    /// values present in the matched column of every table, aligned by
    /// position across tables.
    ///
    /// The cursors advance the lagging table to the maximum observed
    /// value and re-check until one distinct-value array is exhausted.
    pub fn match_slices_n<'a>(
        tables: &[&'a IntTable],
        cols: &[usize],
    ) -> Vec<Vec<&'a [Record]>> {
        debug_assert_eq!(tables.len(), cols.len());
        let n = tables.len();
        let mut slices_per_table: Vec<Vec<&[Record]>> = vec![Vec::new(); n];
        let mut idxs = vec![0usize; n];

        'outer: loop {
            /* Locate the maximum value at the cursors */
            let mut max_val = tables[0].values_by_col[cols[0]][idxs[0]];
            let mut max_idx = 0;
            let mut all_match = true;
            for i in 1..n {
                let val = tables[i].values_by_col[cols[i]][idxs[i]];
                all_match &= val == max_val;
                if val > max_val {
                    max_val = val;
                    max_idx = i;
                }
            }

            if all_match {
                for i in 0..n {
                    let offsets = &tables[i].offsets_by_col[cols[i]];
                    let view = &tables[i].sorted_by_col[cols[i]];
                    slices_per_table[i].push(&view[offsets[idxs[i]]..offsets[idxs[i] + 1]]);
                    idxs[i] += 1;
                    if idxs[i] >= tables[i].values_by_col[cols[i]].len() {
                        break 'outer;
                    }
                }
            } else {
                for i in 0..n {
                    if i == max_idx {
                        continue;
                    }
                    let values = &tables[i].values_by_col[cols[i]];
                    idxs[i] += values[idxs[i]..].partition_point(|&v| v < max_val);
                    if idxs[i] >= values.len() {
                        break 'outer;
                    }
                }
            }
        }
        slices_per_table
    }

    /// The distinct values in `col`, ascending.
    #[inline]
    pub fn values_in_column(&self, col: usize) -> &[i32] {
        &self.values_by_col[col]
    }

    #[inline]
    pub fn num_values_in_column(&self, col: usize) -> usize {
        self.values_by_col[col].len()
    }

    /// The row run boundaries of `col`'s distinct values; one trailing
    /// element equal to the row count.
    #[inline]
    pub fn start_offsets_in_column(&self, col: usize) -> &[usize] {
        &self.offsets_by_col[col]
    }

    #[inline]
    pub fn min_value(&self, col: usize) -> i32 {
        self.values_by_col[col][0]
    }

    #[inline]
    pub fn max_value(&self, col: usize) -> i32 {
        *self.values_by_col[col]
            .last()
            .unwrap_or(&i32::MIN)
    }

    /// The maximum value over all columns.
    pub fn max_value_all(&self) -> i32 {
        (0..self.arity)
            .map(|col| self.max_value(col))
            .max()
            .unwrap_or(i32::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::record;
    use proptest::prelude::*;

    fn table(rows: &[&[i32]]) -> IntTable {
        let arity = rows[0].len();
        IntTable::new(rows.iter().map(|r| record(r)).collect(), arity)
    }

    #[test]
    fn rows_are_lexicographically_sorted() {
        let t = table(&[&[3, 1], &[1, 2], &[1, 1], &[2, 5]]);
        let rows: Vec<Vec<i32>> = t.rows().iter().map(|r| r.to_vec()).collect();
        assert_eq!(
            vec![vec![1, 1], vec![1, 2], vec![2, 5], vec![3, 1]],
            rows
        );
    }

    #[test]
    fn membership_queries() {
        let t = table(&[&[1, 2, 3], &[4, 5, 6], &[1, 5, 3]]);
        assert!(t.has_row(&[1, 2, 3]));
        assert!(t.has_row(&[1, 5, 3]));
        assert!(!t.has_row(&[1, 2, 4]));
        assert_eq!(Some(0), t.where_is(&[1, 2, 3]));
        assert_eq!(None, t.where_is(&[9, 9, 9]));
    }

    #[test]
    fn get_slice_selects_by_value() {
        let t = table(&[&[1, 2], &[2, 2], &[1, 3]]);
        let slice = t.get_slice(0, 1).expect("value 1 present");
        assert_eq!(2, slice.len());
        assert!(slice.iter().all(|r| r[0] == 1));
        assert!(t.get_slice(0, 7).is_none());

        let slice = t.get_slice(1, 2).expect("value 2 present");
        assert_eq!(2, slice.len());
        assert!(slice.iter().all(|r| r[1] == 2));
    }

    #[test]
    fn split_slices_partitions_rows() {
        let t = table(&[&[1, 2], &[2, 2], &[1, 3], &[3, 9]]);
        let slices = t.split_slices(0);
        assert_eq!(3, slices.len());
        let total: usize = slices.iter().map(|s| s.len()).sum();
        assert_eq!(t.total_rows(), total);
        for s in &slices {
            let v = s[0][0];
            assert!(s.iter().all(|r| r[0] == v));
        }
    }

    #[test]
    fn match_within_grouped_by_shared_value() {
        let t = table(&[&[1, 1], &[2, 2], &[2, 3], &[5, 5], &[3, 2]]);
        let slices = t.match_slices_within(0, 1);
        assert_eq!(3, slices.len());
        let mut matched: Vec<i32> = slices.iter().map(|s| s[0][0]).collect();
        matched.sort_unstable();
        assert_eq!(vec![1, 2, 5], matched);
    }

    #[test]
    fn match_two_tables_aligns_partitions() {
        let t1 = table(&[&[1, 2], &[2, 3], &[4, 4]]);
        let t2 = table(&[&[2, 9], &[4, 8], &[5, 7]]);
        let matched = IntTable::match_slices(&t1, 0, &t2, 0);
        assert_eq!(2, matched.slices1.len());
        assert_eq!(2, matched.slices2.len());
        for (s1, s2) in matched.slices1.iter().zip(&matched.slices2) {
            assert_eq!(s1[0][0], s2[0][0]);
        }
    }

    #[test]
    fn match_n_tables() {
        let t1 = table(&[&[1, 0], &[2, 0], &[3, 0]]);
        let t2 = table(&[&[2, 1], &[3, 1], &[9, 1]]);
        let t3 = table(&[&[0, 3], &[1, 2], &[8, 9]]);
        let slices = IntTable::match_slices_n(&[&t1, &t2, &t3], &[0, 0, 1]);
        // shared values across (t1.c0, t2.c0, t3.c1): {2, 3}
        assert_eq!(2, slices[0].len());
        assert_eq!(2, slices[1].len());
        assert_eq!(2, slices[2].len());
        assert_eq!(2, slices[0][0][0][0]);
        assert_eq!(3, slices[0][1][0][0]);
    }

    #[test]
    fn value_statistics() {
        let t = table(&[&[1, 20], &[5, 8], &[3, 8]]);
        assert_eq!(&[1, 3, 5], t.values_in_column(0));
        assert_eq!(2, t.num_values_in_column(1));
        assert_eq!(1, t.min_value(0));
        assert_eq!(5, t.max_value(0));
        assert_eq!(20, t.max_value_all());
    }

    proptest! {
        #[test]
        fn prop_split_concatenation_is_row_set(
            rows in proptest::collection::hash_set((0i32..20, 0i32..20), 1..40)
        ) {
            let records: Vec<Record> = rows.iter().map(|&(a, b)| record(&[a, b])).collect();
            let t = IntTable::new(records.clone(), 2);
            for col in 0..2 {
                let mut collected: Vec<Vec<i32>> = t
                    .split_slices(col)
                    .iter()
                    .flat_map(|s| s.iter().map(|r| r.to_vec()))
                    .collect();
                collected.sort_unstable();
                let mut expected: Vec<Vec<i32>> =
                    records.iter().map(|r| r.to_vec()).collect();
                expected.sort_unstable();
                prop_assert_eq!(expected, collected);
            }
        }

        #[test]
        fn prop_has_row_iff_member(
            rows in proptest::collection::hash_set((0i32..10, 0i32..10), 1..30),
            probe in (0i32..10, 0i32..10)
        ) {
            let records: Vec<Record> = rows.iter().map(|&(a, b)| record(&[a, b])).collect();
            let t = IntTable::new(records, 2);
            let probe_row = [probe.0, probe.1];
            prop_assert_eq!(rows.contains(&probe), t.has_row(&probe_row));
        }

        #[test]
        fn prop_get_slice_is_exact_selection(
            rows in proptest::collection::hash_set((0i32..8, 0i32..8), 1..30),
            val in 0i32..8
        ) {
            let records: Vec<Record> = rows.iter().map(|&(a, b)| record(&[a, b])).collect();
            let t = IntTable::new(records, 2);
            let expected: usize = rows.iter().filter(|&&(a, _)| a == val).count();
            match t.get_slice(0, val) {
                None => prop_assert_eq!(0, expected),
                Some(slice) => {
                    prop_assert_eq!(expected, slice.len());
                    prop_assert!(slice.iter().all(|r| r[0] == val));
                }
            }
        }
    }
}
