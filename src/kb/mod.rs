//! In-memory knowledge bases and their compressed counterparts.
//!
//! A [`SimpleKb`] holds integer-encoded relations backed by
//! [`IntTable`] indices. Each [`SimpleRelation`] tracks which of its
//! records have been entailed by accepted rules (a bitset, one bit per
//! record) and which constants are *promising* — frequent enough in a
//! column to be worth a constant-binding specialization.
//!
//! A [`CompressedKb`] collects everything the dump step writes: the
//! records no rule entails, the feedback-vertex records that break
//! cyclic derivations, per-relation counterexample sets, the induced
//! hypothesis, and the supplementary constants that would otherwise
//! vanish from the constant domain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::atom::{arg, Record};
use crate::rule::CachedRule;
use crate::table::IntTable;

pub mod error;
pub mod io;

pub use error::{KbError, KbResult};

const BITS_PER_WORD: usize = u64::BITS as usize;

fn flag_words(bits: usize) -> usize {
    bits.div_ceil(BITS_PER_WORD)
}

fn set_bit(flags: &mut [u64], idx: usize) {
    flags[idx / BITS_PER_WORD] |= 1u64 << (idx % BITS_PER_WORD);
}

fn test_bit(flags: &[u64], idx: usize) -> bool {
    flags[idx / BITS_PER_WORD] & (1u64 << (idx % BITS_PER_WORD)) != 0
}

/// One relation: an indexed record table plus entailment flags.
pub struct SimpleRelation {
    pub name: String,
    pub id: usize,
    table: Arc<IntTable>,
    entailment_flags: Vec<u64>,
}

impl SimpleRelation {
    /// Index `records` as relation `id`. The records must be
    /// duplicate-free and of uniform arity.
    pub fn new(name: String, id: usize, records: Vec<Record>, arity: usize) -> Self {
        let table = Arc::new(IntTable::new(records, arity));
        let entailment_flags = vec![0u64; flag_words(table.total_rows())];
        SimpleRelation {
            name,
            id,
            table,
            entailment_flags,
        }
    }

    /// The shared index of this relation's records.
    #[inline]
    pub fn table(&self) -> &Arc<IntTable> {
        &self.table
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.table.arity()
    }

    #[inline]
    pub fn total_rows(&self) -> usize {
        self.table.total_rows()
    }

    #[inline]
    pub fn rows(&self) -> &[Record] {
        self.table.rows()
    }

    pub fn has_row(&self, row: &[i32]) -> bool {
        self.table.has_row(row)
    }

    pub fn set_entailed(&mut self, row: &[i32]) {
        if let Some(idx) = self.table.where_is(row) {
            set_bit(&mut self.entailment_flags, idx);
        }
    }

    pub fn is_entailed(&self, row: &[i32]) -> bool {
        self.table
            .where_is(row)
            .is_some_and(|idx| test_bit(&self.entailment_flags, idx))
    }

    /// Flag the record if it exists and is not yet entailed.
    /// Returns whether the flag was newly set (idempotent otherwise).
    pub fn entail_if_not(&mut self, row: &[i32]) -> bool {
        match self.table.where_is(row) {
            Some(idx) if !test_bit(&self.entailment_flags, idx) => {
                set_bit(&mut self.entailment_flags, idx);
                true
            }
            _ => false,
        }
    }

    pub fn total_entailed_records(&self) -> usize {
        self.entailment_flags
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// The records no accepted rule entails, in table order.
    pub fn non_entailed_records(&self) -> Vec<Record> {
        self.rows()
            .iter()
            .enumerate()
            .filter(|(idx, _)| !test_bit(&self.entailment_flags, *idx))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Per column, the constants covering at least
    /// `ceil(total_rows * min_constant_coverage)` rows.
    pub fn promising_constants(&self, min_constant_coverage: f64) -> Vec<Vec<i32>> {
        let threshold = (self.total_rows() as f64 * min_constant_coverage).ceil() as usize;
        (0..self.arity())
            .map(|col| {
                let values = self.table.values_in_column(col);
                let offsets = self.table.start_offsets_in_column(col);
                values
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| offsets[*i + 1] - offsets[*i] >= threshold)
                    .map(|(_, &v)| v)
                    .collect()
            })
            .collect()
    }

    /// Mark the constants of all non-entailed records in `flags`.
    pub fn set_flags_of_reserved_constants(&self, flags: &mut [u64]) {
        for (idx, row) in self.rows().iter().enumerate() {
            if !test_bit(&self.entailment_flags, idx) {
                for &value in row.iter() {
                    set_bit(flags, value as usize);
                }
            }
        }
    }
}

/// A knowledge base of integer-encoded relations.
pub struct SimpleKb {
    name: String,
    relations: Vec<SimpleRelation>,
    name_map: HashMap<String, usize>,
    relation_names: Vec<String>,
    constants: i32,
    /// `promising_constants[rel][col]`, filled by
    /// [`SimpleKb::update_promising_constants`].
    promising_constants: Vec<Vec<Vec<i32>>>,
}

impl SimpleKb {
    /// Build a KB from in-memory relations `(name, records, arity)`.
    pub fn new(name: &str, relations: Vec<(String, Vec<Record>, usize)>) -> Self {
        let mut kb = SimpleKb {
            name: name.to_string(),
            relations: Vec::with_capacity(relations.len()),
            name_map: HashMap::new(),
            relation_names: Vec::new(),
            constants: 0,
            promising_constants: Vec::new(),
        };
        for (rel_name, records, arity) in relations {
            kb.push_relation(rel_name, records, arity);
        }
        kb
    }

    pub(crate) fn push_relation(&mut self, name: String, records: Vec<Record>, arity: usize) {
        let id = self.relations.len();
        let relation = SimpleRelation::new(name.clone(), id, records, arity);
        self.constants = self.constants.max(relation.table.max_value_all());
        self.name_map.insert(name.clone(), id);
        self.relation_names.push(name);
        self.relations.push(relation);
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn relation(&self, id: usize) -> &SimpleRelation {
        &self.relations[id]
    }

    #[inline]
    pub fn relation_mut(&mut self, id: usize) -> &mut SimpleRelation {
        &mut self.relations[id]
    }

    pub fn relation_by_name(&self, name: &str) -> Option<&SimpleRelation> {
        self.name_map.get(name).map(|&id| &self.relations[id])
    }

    #[inline]
    pub fn relations(&self) -> &[SimpleRelation] {
        &self.relations
    }

    #[inline]
    pub fn relation_names(&self) -> &[String] {
        &self.relation_names
    }

    #[inline]
    pub fn total_relations(&self) -> usize {
        self.relations.len()
    }

    pub fn total_records(&self) -> usize {
        self.relations.iter().map(SimpleRelation::total_rows).sum()
    }

    /// The number of constants; numerations run from 1 to this value.
    #[inline]
    pub fn total_constants(&self) -> i32 {
        self.constants
    }

    pub fn has_record(&self, relation_id: usize, row: &[i32]) -> bool {
        self.relations
            .get(relation_id)
            .is_some_and(|r| r.has_row(row))
    }

    /// Compute the promising constants of every relation once, before
    /// mining begins.
    pub fn update_promising_constants(&mut self, min_constant_coverage: f64) {
        if self.promising_constants.is_empty() {
            self.promising_constants = self
                .relations
                .iter()
                .map(|r| r.promising_constants(min_constant_coverage))
                .collect();
        }
    }

    /// Promising constants of one relation, per column. Empty until
    /// [`SimpleKb::update_promising_constants`] has run.
    pub fn promising_constants_of(&self, relation_id: usize) -> &[Vec<i32>] {
        self.promising_constants
            .get(relation_id)
            .map_or(&[], Vec::as_slice)
    }
}

/// The output side of a compression run.
pub struct CompressedKb {
    name: String,
    /// Per original relation, the records kept to break derivation
    /// cycles.
    fvs_records: Vec<Vec<Record>>,
    /// Per original relation, the counterexamples of accepted rules.
    counterexample_sets: Vec<HashSet<Record>>,
    hypothesis: Vec<CachedRule>,
    supplementary_constants: Vec<i32>,
}

impl CompressedKb {
    pub fn new(name: &str, total_relations: usize) -> Self {
        CompressedKb {
            name: name.to_string(),
            fvs_records: vec![Vec::new(); total_relations],
            counterexample_sets: vec![HashSet::new(); total_relations],
            hypothesis: Vec::new(),
            supplementary_constants: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_fvs_record(&mut self, relation_id: usize, record: Record) {
        self.fvs_records[relation_id].push(record);
    }

    pub fn add_counterexamples(&mut self, relation_id: usize, records: HashSet<Record>) {
        self.counterexample_sets[relation_id].extend(records);
    }

    pub fn add_rule(&mut self, rule: CachedRule) {
        self.hypothesis.push(rule);
    }

    #[inline]
    pub fn hypothesis(&self) -> &[CachedRule] {
        &self.hypothesis
    }

    #[inline]
    pub fn fvs_records(&self, relation_id: usize) -> &[Record] {
        &self.fvs_records[relation_id]
    }

    #[inline]
    pub fn counterexamples(&self, relation_id: usize) -> &HashSet<Record> {
        &self.counterexample_sets[relation_id]
    }

    #[inline]
    pub fn supplementary_constants(&self) -> &[i32] {
        &self.supplementary_constants
    }

    /// Recompute the constants that appear in none of the kept outputs.
    ///
    /// A constant survives decompression only if it occurs in a
    /// necessary record, an FVS record, a counterexample, or a rule;
    /// everything else must be written out separately.
    pub fn update_supplementary_constants(&mut self, kb: &SimpleKb) {
        let num_bits = kb.total_constants() as usize + 1;
        let mut flags = vec![0u64; flag_words(num_bits)];

        for relation in kb.relations() {
            relation.set_flags_of_reserved_constants(&mut flags);
            for record in &self.fvs_records[relation.id] {
                for &value in record.iter() {
                    set_bit(&mut flags, value as usize);
                }
            }
            for record in &self.counterexample_sets[relation.id] {
                for &value in record.iter() {
                    set_bit(&mut flags, value as usize);
                }
            }
        }
        for rule in &self.hypothesis {
            for predicate in rule.structure() {
                for &argument in &predicate.args {
                    if arg::is_constant(argument) {
                        set_bit(&mut flags, arg::decode(argument) as usize);
                    }
                }
            }
        }

        set_bit(&mut flags, 0); // zero is not a constant
        self.supplementary_constants = (0..num_bits as i32)
            .filter(|&c| !test_bit(&flags, c as usize))
            .collect();
    }

    /// Necessary records: never-entailed rows plus FVS records.
    pub fn total_necessary_records(&self, kb: &SimpleKb) -> usize {
        let non_entailed: usize = kb
            .relations()
            .iter()
            .map(|r| r.total_rows() - r.total_entailed_records())
            .sum();
        non_entailed + self.total_fvs_records()
    }

    pub fn total_fvs_records(&self) -> usize {
        self.fvs_records.iter().map(Vec::len).sum()
    }

    pub fn total_counterexamples(&self) -> usize {
        self.counterexample_sets.iter().map(HashSet::len).sum()
    }

    /// Total length of all rules in the hypothesis.
    pub fn total_hypothesis_size(&self) -> usize {
        self.hypothesis.iter().map(CachedRule::length).sum()
    }

    pub fn total_supplementary_constants(&self) -> usize {
        self.supplementary_constants.len()
    }
}
