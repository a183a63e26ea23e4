//! Disk layout round trips and load-error surfaces.

use std::fs;
use std::io::Write;

use kbpress::atom::record;
use kbpress::kb::{io, KbError, SimpleKb};

fn sample_kb() -> SimpleKb {
    SimpleKb::new(
        "sample",
        vec![
            (
                "edge".to_string(),
                vec![record(&[1, 2]), record(&[2, 3]), record(&[3, 1])],
                2,
            ),
            (
                "label".to_string(),
                vec![record(&[1, 7, 8]), record(&[2, 7, 9])],
                3,
            ),
        ],
    )
}

#[test]
fn dump_then_load_preserves_relations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kb = sample_kb();
    let names: Vec<String> = (1..=9).map(|i| format!("c{i}")).collect();
    io::dump_kb(&kb, dir.path(), Some(&names)).expect("dump");

    let loaded = io::load_kb("sample", dir.path()).expect("load");
    assert_eq!(2, loaded.total_relations());
    assert_eq!(kb.total_records(), loaded.total_records());
    assert_eq!(kb.total_constants(), loaded.total_constants());
    for relation in kb.relations() {
        let loaded_rel = loaded
            .relation_by_name(&relation.name)
            .expect("relation survives the round trip");
        assert_eq!(relation.arity(), loaded_rel.arity());
        for row in relation.rows() {
            assert!(loaded_rel.has_row(row));
        }
    }

    let loaded_names = io::load_constant_names(&dir.path().join("sample")).expect("map files");
    assert_eq!(names, loaded_names);
}

#[test]
fn relation_file_sizes_match_the_declared_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    io::dump_kb(&sample_kb(), dir.path(), None).expect("dump");

    /* arity * rows * 4 bytes of little-endian integers */
    let edge_bytes = fs::read(dir.path().join("sample/0.rel")).expect("edge payload");
    assert_eq!(2 * 3 * 4, edge_bytes.len());
    let label_bytes = fs::read(dir.path().join("sample/1.rel")).expect("label payload");
    assert_eq!(3 * 2 * 4, label_bytes.len());

    /* Lexicographically first edge record is (1, 2) */
    assert_eq!(1, i32::from_le_bytes(edge_bytes[0..4].try_into().expect("4 bytes")));
    assert_eq!(2, i32::from_le_bytes(edge_bytes[4..8].try_into().expect("4 bytes")));
}

#[test]
fn zero_row_relations_without_files_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    io::dump_kb(&sample_kb(), dir.path(), None).expect("dump");

    let info_path = dir.path().join("sample/Relations.tsv");
    let mut info = fs::OpenOptions::new()
        .append(true)
        .open(&info_path)
        .expect("info file");
    writeln!(info, "ghost\t2\t0").expect("append");
    drop(info);

    let loaded = io::load_kb("sample", dir.path()).expect("load");
    assert_eq!(2, loaded.total_relations());
    assert!(loaded.relation_by_name("ghost").is_none());
}

#[test]
fn missing_data_for_declared_rows_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    io::dump_kb(&sample_kb(), dir.path(), None).expect("dump");
    fs::remove_file(dir.path().join("sample/0.rel")).expect("drop payload");

    let err = io::load_kb("sample", dir.path())
        .err()
        .expect("load must fail");
    match err {
        KbError::MissingRelationFile {
            relation,
            declared_rows,
            ..
        } => {
            assert_eq!("edge", relation);
            assert_eq!(3, declared_rows);
        }
        other => panic!("expected MissingRelationFile, got {other}"),
    }
}

#[test]
fn truncated_payloads_are_a_short_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    io::dump_kb(&sample_kb(), dir.path(), None).expect("dump");

    let payload_path = dir.path().join("sample/0.rel");
    let payload = fs::read(&payload_path).expect("payload");
    fs::write(&payload_path, &payload[..payload.len() - 4]).expect("truncate");

    let err = io::load_kb("sample", dir.path())
        .err()
        .expect("load must fail");
    match err {
        KbError::ShortRead {
            relation,
            expected,
            actual,
        } => {
            assert_eq!("edge", relation);
            assert_eq!(24, expected);
            assert_eq!(20, actual);
        }
        other => panic!("expected ShortRead, got {other}"),
    }
}

#[test]
fn malformed_info_lines_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kb_dir = dir.path().join("broken");
    fs::create_dir_all(&kb_dir).expect("kb dir");
    fs::write(kb_dir.join("Relations.tsv"), "edge\tnot_a_number\t3\n").expect("info");

    assert!(matches!(
        io::load_kb("broken", dir.path()),
        Err(KbError::BadRelationInfo { line_no: 0, .. })
    ));
}
