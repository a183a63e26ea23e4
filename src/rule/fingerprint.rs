//! Canonical rule fingerprints for deduplication and tabu pruning.
//!
//! A fingerprint replaces every argument of a rule by the equivalence
//! class it belongs to: limited variables collect the
//! `(predicate symbol, argument index)` indicators of all their
//! occurrences, constants form singleton classes carrying a constant
//! indicator, and empty arguments form fresh singletons. Two rules are
//! treated as equivalent iff their classed heads match and the
//! multisets of their equivalence classes match — which makes the
//! fingerprint invariant under LV renaming and body-atom reordering.
//!
//! The representation is an approximation: rules that differ only by
//! inner-argument placement can share a fingerprint (for example
//! `p(X,Y) :- f(X,X), f(?,Y)` and `p(X,Y) :- f(X,Y), f(?,X)`). Those
//! collisions are intended behavior and the tests below pin them down.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::atom::{arg, Predicate};

/// An unordered collection with element counts.
///
/// Hashing is commutative over the entries so equal multisets hash
/// equally regardless of insertion order.
#[derive(Clone, Debug, Eq)]
pub struct MultiSet<T: Eq + Hash> {
    counts: HashMap<T, usize>,
    size: usize,
}

impl<T: Eq + Hash> Default for MultiSet<T> {
    fn default() -> Self {
        MultiSet {
            counts: HashMap::new(),
            size: 0,
        }
    }
}

impl<T: Eq + Hash> MultiSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an element; returns its count after insertion.
    pub fn add(&mut self, element: T) -> usize {
        self.size += 1;
        let cnt = self.counts.entry(element).or_insert(0);
        *cnt += 1;
        *cnt
    }

    /// The number of elements, counting multiplicity.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of distinct elements.
    pub fn different_values(&self) -> usize {
        self.counts.len()
    }

    pub fn item_count(&self, element: &T) -> usize {
        self.counts.get(element).copied().unwrap_or(0)
    }

    /// Whether every element occurs in `other` at least as often.
    pub fn subset_of(&self, other: &MultiSet<T>) -> bool {
        if self.size > other.size {
            return false;
        }
        self.counts
            .iter()
            .all(|(element, &cnt)| cnt <= other.item_count(element))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, usize)> {
        self.counts.iter().map(|(element, &cnt)| (element, cnt))
    }
}

impl<T: Eq + Hash> FromIterator<T> for MultiSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = MultiSet::new();
        for element in iter {
            set.add(element);
        }
        set
    }
}

impl<T: Eq + Hash> PartialEq for MultiSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.counts == other.counts
    }
}

impl<T: Eq + Hash> Hash for MultiSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut total: u64 = 0;
        for (element, cnt) in &self.counts {
            let mut hasher = DefaultHasher::new();
            element.hash(&mut hasher);
            cnt.hash(&mut hasher);
            total = total.wrapping_add(hasher.finish());
        }
        state.write_u64(total);
        state.write_usize(self.size);
    }
}

/// Denotes a constant or one argument position in a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgIndicator {
    Constant(i32),
    Variable { symbol: usize, arg_idx: usize },
}

/// An equivalence class of argument indicators.
pub type EquivClass = MultiSet<ArgIndicator>;

/// A shared equivalence class compared by content.
///
/// Classes are shared between argument slots of one fingerprint;
/// [`Rc::ptr_eq`] tells whether two slots hold the *same* class.
#[derive(Clone, Debug)]
pub struct ClassRef(pub Rc<EquivClass>);

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ClassRef {}

impl Hash for ClassRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// A predicate whose arguments are equivalence classes.
#[derive(Clone, Debug)]
pub struct PredicateWithClass {
    pub symbol: usize,
    pub class_args: Vec<ClassRef>,
}

impl PredicateWithClass {
    fn arity(&self) -> usize {
        self.class_args.len()
    }
}

impl PartialEq for PredicateWithClass {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.class_args == other.class_args
    }
}

impl Eq for PredicateWithClass {}

impl Hash for PredicateWithClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.class_args.len().hash(state);
        for class in &self.class_args {
            class.hash(state);
        }
    }
}

/// The canonical signature of a rule.
#[derive(Debug)]
pub struct Fingerprint {
    classed_structure: Vec<PredicateWithClass>,
    equivalence_classes: MultiSet<ClassRef>,
    /// Fingerprints are immutable, so the hash is computed once.
    hash_code: u64,
}

impl Fingerprint {
    /// Build the fingerprint of a rule structure (head first).
    ///
    /// Assumes LV ids are dense starting at 0.
    pub fn new(structure: &[Predicate]) -> Self {
        /* Collect the indicator multiset of every LV */
        let mut max_lv_id: Option<usize> = None;
        for predicate in structure {
            for &argument in &predicate.args {
                if arg::is_variable(argument) {
                    let vid = arg::decode(argument) as usize;
                    max_lv_id = Some(max_lv_id.map_or(vid, |m| m.max(vid)));
                }
            }
        }
        let num_lvs = max_lv_id.map_or(0, |m| m + 1);
        let mut lv_classes: Vec<EquivClass> = vec![MultiSet::new(); num_lvs];

        /* First pass: fill LV classes, note fresh singleton classes */
        enum Slot {
            Lv(usize),
            Fresh(EquivClass),
        }
        let mut slot_structure: Vec<(usize, Vec<Slot>)> = Vec::with_capacity(structure.len());
        for predicate in structure {
            let mut slots = Vec::with_capacity(predicate.arity());
            for (arg_idx, &argument) in predicate.args.iter().enumerate() {
                let indicator = ArgIndicator::Variable {
                    symbol: predicate.symbol,
                    arg_idx,
                };
                if arg::is_empty(argument) {
                    let mut class = MultiSet::new();
                    class.add(indicator);
                    slots.push(Slot::Fresh(class));
                } else if arg::is_variable(argument) {
                    let vid = arg::decode(argument) as usize;
                    lv_classes[vid].add(indicator);
                    slots.push(Slot::Lv(vid));
                } else {
                    let mut class = MultiSet::new();
                    class.add(indicator);
                    class.add(ArgIndicator::Constant(arg::decode(argument)));
                    slots.push(Slot::Fresh(class));
                }
            }
            slot_structure.push((predicate.symbol, slots));
        }

        /* Second pass: share the LV classes and collect the multiset */
        let lv_refs: Vec<ClassRef> = lv_classes
            .into_iter()
            .map(|class| ClassRef(Rc::new(class)))
            .collect();
        let mut equivalence_classes: MultiSet<ClassRef> = MultiSet::new();
        let mut classed_structure = Vec::with_capacity(slot_structure.len());
        for (symbol, slots) in slot_structure {
            let class_args = slots
                .into_iter()
                .map(|slot| match slot {
                    Slot::Lv(vid) => lv_refs[vid].clone(),
                    Slot::Fresh(class) => {
                        let class_ref = ClassRef(Rc::new(class));
                        equivalence_classes.add(class_ref.clone());
                        class_ref
                    }
                })
                .collect();
            classed_structure.push(PredicateWithClass { symbol, class_args });
        }
        for lv_ref in lv_refs {
            equivalence_classes.add(lv_ref);
        }

        let mut hasher = DefaultHasher::new();
        classed_structure[0].hash(&mut hasher);
        let head_hash = hasher.finish();
        let mut hasher = DefaultHasher::new();
        equivalence_classes.hash(&mut hasher);
        let hash_code = head_hash.wrapping_mul(31).wrapping_add(hasher.finish());

        Fingerprint {
            classed_structure,
            equivalence_classes,
            hash_code,
        }
    }

    pub fn classed_structure(&self) -> &[PredicateWithClass] {
        &self.classed_structure
    }

    pub fn equivalence_classes(&self) -> &MultiSet<ClassRef> {
        &self.equivalence_classes
    }

    /// Whether this fingerprint's rule generalizes `other`'s: the head
    /// generalizes column-wise and every body predicate generalizes
    /// some body predicate of `other`.
    pub fn generalization_of(&self, other: &Fingerprint) -> bool {
        if self.classed_structure.len() > other.classed_structure.len() {
            return false;
        }
        let head = &self.classed_structure[0];
        let other_head = &other.classed_structure[0];
        if !Self::predicate_generalizes(head, other_head) {
            return false;
        }
        if head.arity() == 2 {
            let self_shared = Rc::ptr_eq(&head.class_args[0].0, &head.class_args[1].0);
            let other_shared = Rc::ptr_eq(&other_head.class_args[0].0, &other_head.class_args[1].0);
            if self_shared != other_shared {
                return false;
            }
        }
        self.classed_structure[1..].iter().all(|predicate| {
            other.classed_structure[1..]
                .iter()
                .any(|other_predicate| Self::predicate_generalizes(predicate, other_predicate))
        })
    }

    fn predicate_generalizes(
        predicate: &PredicateWithClass,
        specialized: &PredicateWithClass,
    ) -> bool {
        predicate.symbol == specialized.symbol
            && predicate.arity() == specialized.arity()
            && predicate
                .class_args
                .iter()
                .zip(&specialized.class_args)
                .all(|(class, other_class)| class.0.subset_of(&other_class.0))
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.classed_structure[0] == other.classed_structure[0]
            && self.equivalence_classes == other.equivalence_classes
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::arg;
    use crate::rule::parse::parse_rule;

    /// Build a structure from rule text with symbols resolved by name
    /// order of first appearance.
    fn structure(text: &str) -> Vec<Predicate> {
        let atoms = parse_rule(text).expect("parsable rule");
        let mut names: Vec<String> = Vec::new();
        atoms
            .iter()
            .map(|atom| {
                let symbol = names
                    .iter()
                    .position(|n| n == &atom.name)
                    .unwrap_or_else(|| {
                        names.push(atom.name.clone());
                        names.len() - 1
                    });
                let args = atom
                    .args
                    .iter()
                    .map(|parsed| match parsed {
                        crate::rule::parse::ParsedArg::Unlimited => arg::EMPTY,
                        crate::rule::parse::ParsedArg::Variable(vid) => arg::variable(*vid),
                        crate::rule::parse::ParsedArg::Constant(c) => arg::constant(*c),
                    })
                    .collect();
                Predicate { symbol, args }
            })
            .collect()
    }

    fn fingerprint(text: &str) -> Fingerprint {
        Fingerprint::new(&structure(text))
    }

    fn hash_of(fp: &Fingerprint) -> u64 {
        let mut hasher = DefaultHasher::new();
        fp.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn multiset_semantics() {
        let mut a: MultiSet<i32> = MultiSet::new();
        assert_eq!(1, a.add(5));
        assert_eq!(2, a.add(5));
        assert_eq!(1, a.add(7));
        assert_eq!(3, a.size());
        assert_eq!(2, a.different_values());

        let b: MultiSet<i32> = [5, 7].into_iter().collect();
        assert!(b.subset_of(&a));
        assert!(!a.subset_of(&b));

        let c: MultiSet<i32> = [7, 5, 5].into_iter().collect();
        assert_eq!(a, c);
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        a.hash(&mut h1);
        c.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn equivalent_rules_share_fingerprints() {
        /* LV renaming */
        let fp1 = fingerprint("p(X0,X1):-q(X0,X1)");
        let fp2 = fingerprint("p(X1,X0):-q(X1,X0)");
        assert_eq!(fp1, fp2);
        assert_eq!(hash_of(&fp1), hash_of(&fp2));

        /* Body atom reordering */
        let fp3 = fingerprint("p(X0,X1):-q(X0,?),r(?,X1)");
        let fp4 = fingerprint("p(X0,X1):-r(?,X1),q(X0,?)");
        assert_eq!(fp3, fp4);
        assert_eq!(hash_of(&fp3), hash_of(&fp4));
    }

    #[test]
    fn different_rules_have_different_fingerprints() {
        let fp1 = fingerprint("p(X0,X1):-q(X0,X1)");
        let fp2 = fingerprint("p(X0,X1):-q(X1,X0)");
        assert_ne!(fp1, fp2);

        let fp3 = fingerprint("p(X0,X1):-q(X0,X1)");
        let fp4 = fingerprint("p(X0,X1):-q(X0,X1),q(X1,?)");
        assert_ne!(fp3, fp4);
    }

    #[test]
    fn known_collisions_are_intended() {
        /* The multiset representation cannot distinguish these pairs;
         * the collision is part of the contract. */
        let fp1 = fingerprint("p(X0,X1):-q(X0,X0),q(?,X1)");
        let fp2 = fingerprint("p(X0,X1):-q(X0,X1),q(?,X0)");
        assert_eq!(fp1, fp2);

        let fp3 = fingerprint("p(X0,X1):-q(X0,?),q(X2,X1),q(?,X2)");
        let fp4 = fingerprint("p(X0,X1):-q(X0,X2),q(?,X1),q(X2,?)");
        assert_eq!(fp3, fp4);
    }

    #[test]
    fn generalizations_are_detected() {
        let general = fingerprint("p(X0,X1):-q(X0,X1)");
        let special = fingerprint("p(X0,X1):-q(X0,X1),r(X0,?)");
        assert!(general.generalization_of(&special));
        assert!(!special.generalization_of(&general));

        let with_const = fingerprint("p(X0,X1):-q(X0,X1),r(X0,5)");
        assert!(general.generalization_of(&with_const));

        /* A rule generalizes itself */
        assert!(general.generalization_of(&general));
    }

    #[test]
    fn reflexive_head_is_not_generalized_by_distinct_head() {
        let distinct = fingerprint("p(X0,X1):-q(X0,X1)");
        let reflexive = fingerprint("p(X0,X0):-q(X0,X0)");
        assert!(!distinct.generalization_of(&reflexive));
        assert!(!reflexive.generalization_of(&distinct));
    }
}
