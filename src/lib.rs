//! # kbpress
//!
//! Compresses a relational knowledge base by inducing first-order Horn
//! rules whose bodies entail a maximal subset of the KB's facts. What
//! remains after removing entailed facts — together with the rules, the
//! counterexamples they over-generate, the records that break cyclic
//! derivations, and the constants that would otherwise disappear —
//! reconstructs the original KB.
//!
//! ## Pipeline
//!
//! ```text
//! Relations.tsv + <id>.rel files
//!        |
//!        v
//!   SimpleKb (IntTable-backed relations)
//!        |
//!        v  per target relation
//!   RelationMiner: beam search over rule refinements,
//!                  grounded in CacheFragments over a CbPool
//!        |
//!        v  accepted rules mark entailed facts,
//!           groundings feed the dependency graph
//!   Tarjan SCCs + feedback vertex set
//!        |
//!        v
//!   CompressedKb: necessary records, counterexamples,
//!                 Hypothesis.hyp, SupplementaryConstants.sup
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use kbpress::compressor::Compressor;
//! use kbpress::config::Config;
//!
//! let config = Config::load().expect("config");
//! let outcome = Compressor::new(config).run().expect("compression run");
//! println!("{} rules mined", outcome.report.hypothesis_rules);
//! ```
//!
//! The mining core is single-threaded and cooperative: long runs can be
//! stopped through the [`miner::InterruptFlag`], which makes the miner
//! return the best rule found so far and lets the pipeline finish with
//! what it has.

pub mod atom;
pub mod cache;
pub mod compressor;
pub mod config;
pub mod graph;
pub mod kb;
pub mod miner;
pub mod rule;
pub mod table;

pub use compressor::{CompressionOutcome, Compressor, RunReport};
pub use config::Config;
pub use kb::{CompressedKb, SimpleKb, SimpleRelation};
pub use miner::{InterruptFlag, RelationMiner};
pub use rule::{CachedRule, Eval, EvalMetric, UpdateStatus};
pub use table::IntTable;
