//! Full pipeline runs: mining, dependency analysis, dump, report.

use std::collections::HashSet;

use kbpress::atom::{arg, record, Predicate};
use kbpress::compressor::Compressor;
use kbpress::config::Config;
use kbpress::kb::io;
use kbpress::rule::fingerprint::Fingerprint;
use kbpress::SimpleKb;

fn config_into(dir: &std::path::Path, kb_name: &str, dump_name: &str) -> Config {
    let mut config = Config::default();
    config.paths.base_path = dir.to_path_buf();
    config.paths.kb_name = kb_name.to_string();
    config.paths.dump_path = dir.to_path_buf();
    config.paths.dump_name = dump_name.to_string();
    config
}

fn fingerprint_of(structure: &[(usize, Vec<i32>)]) -> Fingerprint {
    let predicates: Vec<Predicate> = structure
        .iter()
        .map(|(symbol, args)| Predicate {
            symbol: *symbol,
            args: args.clone(),
        })
        .collect();
    Fingerprint::new(&predicates)
}

/// Two relations that are inverses of each other, with five `p` facts
/// lacking a `q` counterpart. The miner finds both inverse rules, the
/// five missing inverses surface as counterexamples of `q`, each
/// derivation 2-cycle leaves one feedback record, and the constant
/// domain survives without supplementary constants.
#[test]
fn inverse_pair_round_trip() {
    let p_rows: Vec<_> = (0..55).map(|k| record(&[2 * k + 1, 2 * k + 2])).collect();
    let q_rows: Vec<_> = (0..50).map(|k| record(&[2 * k + 2, 2 * k + 1])).collect();
    let kb = SimpleKb::new(
        "inverse",
        vec![
            ("p".to_string(), p_rows, 2),
            ("q".to_string(), q_rows, 2),
        ],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_into(dir.path(), "inverse", "inverse_comp");
    let outcome = Compressor::new(config).run_on_kb(kb).expect("pipeline run");

    let report = &outcome.report;
    assert_eq!(2, report.hypothesis_rules);
    assert!(!report.interrupted);
    assert!(report.dumped);

    /* p(X0,X1) :- q(X1,X0) and q(X0,X1) :- p(X1,X0) */
    let rules = outcome.compressed.hypothesis();
    let p_expected = fingerprint_of(&[
        (0, vec![arg::variable(0), arg::variable(1)]),
        (1, vec![arg::variable(1), arg::variable(0)]),
    ]);
    let q_expected = fingerprint_of(&[
        (1, vec![arg::variable(0), arg::variable(1)]),
        (0, vec![arg::variable(1), arg::variable(0)]),
    ]);
    let heads: Vec<usize> = rules.iter().map(|r| r.head().symbol).collect();
    assert_eq!(vec![0, 1], heads);
    assert_eq!(&p_expected, rules[0].fingerprint().as_ref());
    assert_eq!(&q_expected, rules[1].fingerprint().as_ref());

    /* Counterexamples: q misses the inverses of p's last five rows */
    assert!(outcome.compressed.counterexamples(0).is_empty());
    let expected_q: HashSet<Vec<i32>> = (50..55).map(|k| vec![2 * k + 2, 2 * k + 1]).collect();
    let actual_q: HashSet<Vec<i32>> = outcome
        .compressed
        .counterexamples(1)
        .iter()
        .map(|r| r.to_vec())
        .collect();
    assert_eq!(expected_q, actual_q);

    /* One feedback record per derivation cycle */
    assert_eq!(50, report.scc_count);
    assert_eq!(100, report.scc_vertices);
    assert_eq!(50, report.fvs_vertices);
    assert_eq!(50, outcome.compressed.total_fvs_records());

    /* 5 never-entailed p rows + 50 feedback records */
    assert_eq!(55, report.necessary_records);
    assert_eq!(5, report.counterexamples);
    assert!(outcome.compressed.supplementary_constants().is_empty());

    /* The dump contains the compressed layout */
    let dump_dir = dir.path().join("inverse_comp");
    assert!(dump_dir.join("Relations.tsv").exists());
    assert!(dump_dir.join("0.rel").exists());
    assert!(dump_dir.join("1.ceg").exists());
    assert!(dump_dir.join("Hypothesis.hyp").exists());
    assert!(dump_dir.join("Report.json").exists());
    assert!(!dump_dir.join("SupplementaryConstants.sup").exists());

    let hypothesis =
        std::fs::read_to_string(dump_dir.join("Hypothesis.hyp")).expect("hypothesis file");
    assert_eq!(2, hypothesis.lines().count());
    for line in hypothesis.lines() {
        kbpress::rule::parse::parse_rule(line).expect("dumped rules parse back");
    }
}

/// Mining two identical relations compresses everything into two rules
/// plus the feedback records and leaves the unreferenced constants as
/// supplementary output.
#[test]
fn identical_relations_leave_supplementary_constants() {
    let rows = vec![
        record(&[5, 10]),
        record(&[6, 11]),
        record(&[6, 15]),
        record(&[7, 12]),
        record(&[8, 16]),
    ];
    let kb = SimpleKb::new(
        "twins",
        vec![
            ("p".to_string(), rows.clone(), 2),
            ("f".to_string(), rows, 2),
        ],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_into(dir.path(), "twins", "twins_comp");
    let outcome = Compressor::new(config).run_on_kb(kb).expect("pipeline run");

    let report = &outcome.report;
    assert_eq!(2, report.hypothesis_rules);
    assert_eq!(0, report.counterexamples);
    assert_eq!(5, report.scc_count);
    assert_eq!(5, report.fvs_vertices);
    /* All 10 records entailed; only the 5 feedback records remain */
    assert_eq!(5, report.necessary_records);

    /* Constants appearing in no kept output are emitted separately */
    assert_eq!(
        &[1, 2, 3, 4, 9, 13, 14],
        outcome.compressed.supplementary_constants()
    );
    let dump_dir = dir.path().join("twins_comp");
    assert!(dump_dir.join("SupplementaryConstants.sup").exists());
    let bytes = std::fs::read(dump_dir.join("SupplementaryConstants.sup")).expect("sup file");
    assert_eq!(7 * 4, bytes.len());
}

/// `max_relations` bounds the mining targets; the KB load path feeds
/// the same pipeline.
#[test]
fn max_relations_limits_targets() {
    let rows = vec![record(&[1, 2]), record(&[2, 3]), record(&[3, 4])];
    let kb = SimpleKb::new(
        "limited",
        vec![
            ("a".to_string(), rows.clone(), 2),
            ("b".to_string(), rows.clone(), 2),
            ("c".to_string(), rows, 2),
        ],
    );
    let dir = tempfile::tempdir().expect("tempdir");
    io::dump_kb(&kb, dir.path(), None).expect("seed KB dump");

    let mut config = config_into(dir.path(), "limited", "limited_comp");
    config.mining.max_relations = 1;
    let outcome = Compressor::new(config).run().expect("pipeline run");

    /* Only relation `a` was mined: b and c keep all their records */
    assert_eq!(0, outcome.kb.relation(1).total_entailed_records());
    assert_eq!(0, outcome.kb.relation(2).total_entailed_records());
    assert!(outcome
        .compressed
        .hypothesis()
        .iter()
        .all(|r| r.head().symbol == 0));
}
