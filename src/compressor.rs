//! The compression pipeline.
//!
//! `load → mine per relation → dependency analysis → dump → report`.
//!
//! Failure handling follows a strict degradation order: a KB that does
//! not load aborts the run; an interrupt finishes the current relation
//! and proceeds with whatever was mined; a dump failure is logged and
//! the run still produces its report. Entailment flags are never rolled
//! back.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::atom::{Record, AXIOM_SYMBOL};
use crate::cache::block::CbPoolStats;
use crate::config::Config;
use crate::graph::{
    minimum_feedback_vertex_set, strongly_connected_components, DependencyGraph,
};
use crate::kb::{io, CompressedKb, KbResult, SimpleKb};
use crate::miner::{InterruptFlag, MinerStats, RelationMiner};

/// Structured summary of one compression run, serialized to
/// `Report.json` beside the compressed KB.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub kb_name: String,
    pub dump_name: String,

    pub kb_relations: usize,
    pub kb_records: usize,
    pub kb_constants: i32,

    pub load_time_ms: u128,
    pub mining_time_ms: u128,
    pub dependency_time_ms: u128,
    pub dump_time_ms: u128,
    pub total_time_ms: u128,

    pub hypothesis_rules: usize,
    pub hypothesis_size: usize,
    pub necessary_records: usize,
    pub counterexamples: usize,
    pub supplementary_constants: usize,

    pub scc_count: usize,
    pub scc_vertices: usize,
    pub fvs_vertices: usize,

    /// `(necessary + counterexamples + hypothesis size) / |KB|`, in %.
    pub compression_ratio_pct: f64,

    pub pool: CbPoolStats,
    pub miner: MinerStats,

    pub interrupted: bool,
    pub dumped: bool,
}

/// Everything a finished run leaves behind.
pub struct CompressionOutcome {
    pub report: RunReport,
    pub kb: SimpleKb,
    pub compressed: CompressedKb,
}

/// Drives the full compression pipeline for one KB.
pub struct Compressor {
    config: Config,
    interrupt: InterruptFlag,
}

impl Compressor {
    pub fn new(config: Config) -> Self {
        Compressor {
            config,
            interrupt: InterruptFlag::new(),
        }
    }

    /// The flag a host can set to stop mining at the next checkpoint.
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Load the configured KB and compress it.
    pub fn run(&self) -> KbResult<CompressionOutcome> {
        let kb = match io::load_kb(&self.config.paths.kb_name, &self.config.paths.base_path) {
            Ok(kb) => kb,
            Err(e) => {
                error!(error = %e, "KB load failed, abort");
                return Err(e);
            }
        };
        self.run_on_kb(kb)
    }

    /// Compress an already-loaded KB.
    pub fn run_on_kb(&self, mut kb: SimpleKb) -> KbResult<CompressionOutcome> {
        let time_start = Instant::now();
        let mining = &self.config.mining;

        kb.update_promising_constants(mining.min_constant_coverage);
        let mut compressed = CompressedKb::new(&self.config.paths.dump_name, kb.total_relations());
        let load_time = time_start.elapsed();

        /* Mine every target relation */
        let num_targets = if mining.max_relations > 0 {
            mining.max_relations.min(kb.total_relations())
        } else {
            kb.total_relations()
        };
        let mut graph = DependencyGraph::new();
        let mut pool_stats = CbPoolStats::default();
        let mut miner_stats = MinerStats::default();
        let time_mining_start = Instant::now();
        for target in 0..num_targets {
            if !self.interrupt.should_continue() {
                warn!("mining interrupted, keeping results so far");
                break;
            }
            let mut miner = RelationMiner::new(
                &mut kb,
                target,
                mining.eval_metric,
                mining.beamwidth,
                mining.stop_compression_ratio,
                mining.min_fact_coverage,
                &mut graph,
                self.interrupt.clone(),
            );
            miner.run();
            let (rules, counterexamples, stats, mut ctx) = miner.into_results();
            for rule in rules {
                compressed.add_rule(rule);
            }
            compressed.add_counterexamples(target, counterexamples);
            miner_stats.merge(&stats);
            ctx.pool.clear();
            pool_stats.merge(ctx.pool.stats());
            info!(
                relation = %kb.relation(target).name,
                progress = %format!("{}/{}", target + 1, num_targets),
                "relation mining finished"
            );
        }
        let mining_time = time_mining_start.elapsed();

        /* Break cyclic derivations: keep one record per cycle */
        let time_dependency_start = Instant::now();
        let adjacency = graph.adjacency();
        let sccs = strongly_connected_components(&adjacency);
        let mut scc_vertices = 0usize;
        let mut fvs_vertices = 0usize;
        for scc in &sccs {
            scc_vertices += scc.len();
            for node_id in minimum_feedback_vertex_set(&adjacency, scc) {
                let node = graph.node(node_id);
                if node.symbol != AXIOM_SYMBOL {
                    fvs_vertices += 1;
                    compressed.add_fvs_record(node.symbol, Record::from(node.args.clone()));
                }
            }
        }
        let dependency_time = time_dependency_start.elapsed();

        for rule in compressed.hypothesis() {
            info!(rule = %rule.to_display_string(kb.relation_names()), "hypothesis");
        }

        /* Dump; a failure is logged and the report still goes out */
        let time_dump_start = Instant::now();
        let dumped = match io::dump_compressed_kb(&mut compressed, &kb, &self.config.paths.dump_path)
        {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "compressed KB dump failed");
                false
            }
        };
        let dump_time = time_dump_start.elapsed();

        if mining.validation && dumped && !self.recover() {
            warn!("validation failed");
        }

        let kb_records = kb.total_records();
        let necessary_records = compressed.total_necessary_records(&kb);
        let counterexamples = compressed.total_counterexamples();
        let hypothesis_size = compressed.total_hypothesis_size();
        let report = RunReport {
            timestamp: Utc::now(),
            kb_name: self.config.paths.kb_name.clone(),
            dump_name: self.config.paths.dump_name.clone(),
            kb_relations: kb.total_relations(),
            kb_records,
            kb_constants: kb.total_constants(),
            load_time_ms: load_time.as_millis(),
            mining_time_ms: mining_time.as_millis(),
            dependency_time_ms: dependency_time.as_millis(),
            dump_time_ms: dump_time.as_millis(),
            total_time_ms: time_start.elapsed().as_millis(),
            hypothesis_rules: compressed.hypothesis().len(),
            hypothesis_size,
            necessary_records,
            counterexamples,
            supplementary_constants: compressed.total_supplementary_constants(),
            scc_count: sccs.len(),
            scc_vertices,
            fvs_vertices,
            compression_ratio_pct: (necessary_records + counterexamples + hypothesis_size) as f64
                / kb_records.max(1) as f64
                * 100.0,
            pool: pool_stats,
            miner: miner_stats,
            interrupted: !self.interrupt.should_continue(),
            dumped,
        };
        self.write_report(&report);

        Ok(CompressionOutcome {
            report,
            kb,
            compressed,
        })
    }

    /// Reconstruction of the original KB from the compressed output.
    /// Not implemented; the validation flag only ever observes the
    /// failed branch.
    fn recover(&self) -> bool {
        false
    }

    fn write_report(&self, report: &RunReport) {
        let dir = self
            .config
            .paths
            .dump_path
            .join(&self.config.paths.dump_name);
        let path = dir.join("Report.json");
        let result = std::fs::create_dir_all(&dir)
            .map_err(|e| e.to_string())
            .and_then(|()| serde_json::to_string_pretty(report).map_err(|e| e.to_string()))
            .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
        match result {
            Ok(()) => info!(path = %path.display(), "run report written"),
            Err(e) => error!(error = %e, "run report could not be written"),
        }
    }
}
