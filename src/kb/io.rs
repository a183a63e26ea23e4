//! On-disk layout of knowledge bases.
//!
//! A KB directory `<base>/<name>/` contains:
//!
//! - `Relations.tsv` — one relation per line: `name\tarity\trows`
//!   (the compressed layout appends a fourth column with the
//!   counterexample count);
//! - `<rel_id>.rel` — the records as raw little-endian 32-bit integers
//!   in row-major order, `arity * rows * 4` bytes;
//! - `map<n>.tsv` — constant names in numeration order starting at 1,
//!   rolled over at [`MAX_MAP_ENTRIES`] lines per file.
//!
//! A compressed KB additionally writes `<rel_id>.ceg` counterexample
//! files in the `.rel` encoding, `Hypothesis.hyp` with one rule per
//! line in the dump grammar, and `SupplementaryConstants.sup` as raw
//! integers.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::atom::Record;
use crate::kb::{CompressedKb, KbError, KbResult, SimpleKb};
use crate::rule::parse::dump_rule;

pub const REL_INFO_FILE_NAME: &str = "Relations.tsv";
pub const REL_DATA_FILE_SUFFIX: &str = ".rel";
pub const COUNTEREXAMPLE_FILE_SUFFIX: &str = ".ceg";
pub const HYPOTHESIS_FILE_NAME: &str = "Hypothesis.hyp";
pub const SUPPLEMENTARY_CONSTANTS_FILE_NAME: &str = "SupplementaryConstants.sup";
pub const MAP_FILE_PREFIX: &str = "map";
pub const MAP_FILE_SUFFIX: &str = ".tsv";
/// Constant-name files roll over past this many lines.
pub const MAX_MAP_ENTRIES: usize = 1_000_000;

pub fn kb_dir_path(name: &str, base_path: &Path) -> PathBuf {
    base_path.join(name)
}

pub fn rel_info_file_path(name: &str, base_path: &Path) -> PathBuf {
    kb_dir_path(name, base_path).join(REL_INFO_FILE_NAME)
}

pub fn rel_data_file_path(rel_id: usize, name: &str, base_path: &Path) -> PathBuf {
    kb_dir_path(name, base_path).join(format!("{rel_id}{REL_DATA_FILE_SUFFIX}"))
}

pub fn counterexample_file_path(rel_id: usize, name: &str, base_path: &Path) -> PathBuf {
    kb_dir_path(name, base_path).join(format!("{rel_id}{COUNTEREXAMPLE_FILE_SUFFIX}"))
}

fn map_file_path(kb_dir: &Path, map_num: usize) -> PathBuf {
    kb_dir.join(format!("{MAP_FILE_PREFIX}{map_num}{MAP_FILE_SUFFIX}"))
}

/// Load a KB from `<base_path>/<name>/`.
///
/// A relation whose `.rel` file is absent is skipped only when its
/// declared row count is zero; otherwise the absence is an error, as is
/// a data file shorter than `arity * rows * 4` bytes.
pub fn load_kb(name: &str, base_path: &Path) -> KbResult<SimpleKb> {
    let info_path = rel_info_file_path(name, base_path);
    let reader = BufReader::new(File::open(&info_path)?);

    let mut kb = SimpleKb::new(name, Vec::new());
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(rel_name), Some(arity_str), Some(rows_str)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(KbError::BadRelationInfo { line_no, line });
        };
        let (Ok(arity), Ok(declared_rows)) =
            (arity_str.parse::<usize>(), rows_str.parse::<usize>())
        else {
            return Err(KbError::BadRelationInfo { line_no, line });
        };

        let data_path = rel_data_file_path(line_no, name, base_path);
        if !data_path.exists() {
            if declared_rows == 0 {
                continue;
            }
            return Err(KbError::MissingRelationFile {
                relation: rel_name.to_string(),
                declared_rows,
                path: data_path,
            });
        }
        let records = read_records(&data_path, rel_name, arity, declared_rows)?;
        kb.push_relation(rel_name.to_string(), records, arity);
    }
    info!(
        kb = name,
        relations = kb.total_relations(),
        records = kb.total_records(),
        constants = kb.total_constants(),
        "KB loaded"
    );
    Ok(kb)
}

/// Read `rows` records of `arity` little-endian integers.
fn read_records(path: &Path, relation: &str, arity: usize, rows: usize) -> KbResult<Vec<Record>> {
    let expected = (arity * rows * 4) as u64;
    let actual = fs::metadata(path)?.len();
    if actual < expected {
        return Err(KbError::ShortRead {
            relation: relation.to_string(),
            expected,
            actual,
        });
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = [0u8; 4];
    let mut records = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut row = Vec::with_capacity(arity);
        for _ in 0..arity {
            reader.read_exact(&mut buf)?;
            row.push(i32::from_le_bytes(buf));
        }
        records.push(Record::from(row));
    }
    Ok(records)
}

fn write_records<'a, I>(path: &Path, records: I) -> KbResult<()>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        for &value in record.iter() {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Constant names from the rolling map files, numeration order.
pub fn load_constant_names(kb_dir: &Path) -> KbResult<Vec<String>> {
    let mut names = Vec::new();
    let mut map_num = 0;
    loop {
        let path = map_file_path(kb_dir, map_num);
        if !path.exists() {
            break;
        }
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            names.push(line?);
        }
        map_num += 1;
    }
    Ok(names)
}

fn dump_constant_names(kb_dir: &Path, names: &[String]) -> KbResult<()> {
    let mut map_num = 0;
    let mut written = 0usize;
    let mut writer = BufWriter::new(File::create(map_file_path(kb_dir, map_num))?);
    for name in names {
        if written >= MAX_MAP_ENTRIES {
            writer.flush()?;
            map_num += 1;
            written = 0;
            writer = BufWriter::new(File::create(map_file_path(kb_dir, map_num))?);
        }
        writeln!(writer, "{name}")?;
        written += 1;
    }
    writer.flush()?;
    Ok(())
}

/// Write a plain KB in the standard layout.
///
/// `constant_names[i]` names the constant with numeration `i + 1`; when
/// absent, no map files are written.
pub fn dump_kb(kb: &SimpleKb, base_path: &Path, constant_names: Option<&[String]>) -> KbResult<()> {
    let kb_dir = kb_dir_path(kb.name(), base_path);
    fs::create_dir_all(&kb_dir)?;

    if let Some(names) = constant_names {
        dump_constant_names(&kb_dir, names)?;
    }

    let mut info = BufWriter::new(File::create(rel_info_file_path(kb.name(), base_path))?);
    for relation in kb.relations() {
        writeln!(
            info,
            "{}\t{}\t{}",
            relation.name,
            relation.arity(),
            relation.total_rows()
        )?;
        if relation.total_rows() > 0 {
            write_records(
                &rel_data_file_path(relation.id, kb.name(), base_path),
                relation.rows(),
            )?;
        }
    }
    info.flush()?;
    Ok(())
}

/// Write a compressed KB: necessary records, counterexamples, the
/// hypothesis, and the supplementary constants.
///
/// The relation info lines carry a fourth column with each relation's
/// counterexample count.
pub fn dump_compressed_kb(
    ckb: &mut CompressedKb,
    kb: &SimpleKb,
    base_path: &Path,
) -> KbResult<()> {
    let dir = kb_dir_path(ckb.name(), base_path);
    fs::create_dir_all(&dir)?;

    let ckb_name = ckb.name().to_string();
    let mut info = BufWriter::new(File::create(rel_info_file_path(&ckb_name, base_path))?);
    for relation in kb.relations() {
        /* Necessary records: non-entailed rows plus the FVS records */
        let mut necessary = relation.non_entailed_records();
        necessary.extend(ckb.fvs_records(relation.id).iter().cloned());
        write_records(
            &rel_data_file_path(relation.id, &ckb_name, base_path),
            &necessary,
        )?;

        let counterexamples = ckb.counterexamples(relation.id);
        if !counterexamples.is_empty() {
            write_records(
                &counterexample_file_path(relation.id, &ckb_name, base_path),
                counterexamples.iter(),
            )?;
        }

        writeln!(
            info,
            "{}\t{}\t{}\t{}",
            relation.name,
            relation.arity(),
            necessary.len(),
            counterexamples.len()
        )?;
    }
    info.flush()?;

    /* Hypothesis, one rule per line in the dump grammar */
    if !ckb.hypothesis().is_empty() {
        let mut writer = BufWriter::new(File::create(dir.join(HYPOTHESIS_FILE_NAME))?);
        for rule in ckb.hypothesis() {
            writeln!(writer, "{}", dump_rule(rule.structure(), kb.relation_names()))?;
        }
        writer.flush()?;
    }

    /* Supplementary constants as raw integers */
    ckb.update_supplementary_constants(kb);
    if !ckb.supplementary_constants().is_empty() {
        let mut writer =
            BufWriter::new(File::create(dir.join(SUPPLEMENTARY_CONSTANTS_FILE_NAME))?);
        for &constant in ckb.supplementary_constants() {
            writer.write_all(&constant.to_le_bytes())?;
        }
        writer.flush()?;
    }

    info!(
        kb = ckb.name(),
        necessary = ckb.total_necessary_records(kb),
        counterexamples = ckb.total_counterexamples(),
        rules = ckb.hypothesis().len(),
        supplementary = ckb.total_supplementary_constants(),
        "compressed KB dumped"
    );
    Ok(())
}
