//! Textual form of Horn rules.
//!
//! A dumped rule reads `head(args):-body1(args),body2(args)` where an
//! argument is `?` (an unlimited variable), `X<n>` (limited variable
//! `n`), or a decimal constant numeration. Variable ids are dense from
//! 0 within each rule. The parser accepts the same grammar and restores
//! the dump invariants: named variables that occur only once are
//! demoted to `?`, and the remaining variable ids are compacted.

use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::atom::{arg, Predicate};

/// Rule text that does not follow the dump grammar.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("character not allowed at the beginning of an argument: '{0}'")]
    BadArgumentStart(char),
    #[error("malformed argument token: '{0}'")]
    BadArgument(String),
    #[error("unbalanced predicate in rule text")]
    UnbalancedPredicate,
    #[error("rule text contains no head")]
    MissingHead,
}

/// One parsed argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsedArg {
    /// `?`
    Unlimited,
    /// `X<n>`
    Variable(usize),
    /// A decimal constant numeration.
    Constant(i32),
}

/// One parsed atom: relation name plus arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAtom {
    pub name: String,
    pub args: Vec<ParsedArg>,
}

/// Parse a rule in the dump grammar. The first atom is the head.
pub fn parse_rule(text: &str) -> Result<Vec<ParsedAtom>, RuleParseError> {
    let mut atoms: Vec<ParsedAtom> = Vec::new();
    let mut var_ids: HashMap<String, usize> = HashMap::new();
    let mut buffer = String::new();
    let mut name: Option<String> = None;
    let mut args: Vec<ParsedArg> = Vec::new();

    for c in text.chars() {
        match c {
            '(' => {
                name = Some(std::mem::take(&mut buffer));
            }
            ')' => {
                if !buffer.is_empty() || !args.is_empty() {
                    args.push(parse_arg(&std::mem::take(&mut buffer), &mut var_ids)?);
                }
                let atom_name = name.take().ok_or(RuleParseError::UnbalancedPredicate)?;
                atoms.push(ParsedAtom {
                    name: atom_name,
                    args: std::mem::take(&mut args),
                });
            }
            ',' => {
                if name.is_some() {
                    args.push(parse_arg(&std::mem::take(&mut buffer), &mut var_ids)?);
                }
            }
            ':' | '-' | ' ' | '\n' | '\t' => {}
            _ => buffer.push(c),
        }
    }
    if atoms.is_empty() {
        return Err(RuleParseError::MissingHead);
    }

    demote_singleton_variables(&mut atoms, var_ids.len());
    Ok(atoms)
}

fn parse_arg(
    token: &str,
    var_ids: &mut HashMap<String, usize>,
) -> Result<ParsedArg, RuleParseError> {
    let first = token
        .chars()
        .next()
        .ok_or_else(|| RuleParseError::BadArgument(token.to_string()))?;
    match first {
        '?' => Ok(ParsedArg::Unlimited),
        'A'..='Z' => {
            let next_id = var_ids.len();
            let id = *var_ids.entry(token.to_string()).or_insert(next_id);
            Ok(ParsedArg::Variable(id))
        }
        '0'..='9' => token
            .parse::<i32>()
            .map(ParsedArg::Constant)
            .map_err(|_| RuleParseError::BadArgument(token.to_string())),
        _ => Err(RuleParseError::BadArgumentStart(first)),
    }
}

/// Demote variables that occur only once to `?` and compact the ids of
/// the remaining variables so they are dense from 0.
fn demote_singleton_variables(atoms: &mut [ParsedAtom], total_vars: usize) {
    let mut counts = vec![0usize; total_vars];
    for atom in atoms.iter() {
        for parsed in &atom.args {
            if let ParsedArg::Variable(vid) = parsed {
                counts[*vid] += 1;
            }
        }
    }

    let singleton_cnt = counts.iter().filter(|&&c| c == 1).count();
    for atom in atoms.iter_mut() {
        for parsed in &mut atom.args {
            if let ParsedArg::Variable(vid) = parsed {
                if counts[*vid] == 1 {
                    *parsed = ParsedArg::Unlimited;
                }
            }
        }
    }

    /* Move the highest kept ids down into the freed slots */
    let kept_cnt = total_vars - singleton_cnt;
    for slot in 0..kept_cnt {
        if counts[slot] == 1 {
            if let Some(moved) = (slot + 1..total_vars).rev().find(|&vid| counts[vid] > 1) {
                counts[moved] = 0;
                counts[slot] = 2;
                for atom in atoms.iter_mut() {
                    for parsed in &mut atom.args {
                        if *parsed == ParsedArg::Variable(moved) {
                            *parsed = ParsedArg::Variable(slot);
                        }
                    }
                }
            }
        }
    }
}

/// Render one predicate in the dump grammar.
pub fn dump_atom(predicate: &Predicate, names: &[String]) -> String {
    let mut out = String::new();
    let name = names
        .get(predicate.symbol)
        .map_or("?unknown?", String::as_str);
    out.push_str(name);
    out.push('(');
    for (idx, &argument) in predicate.args.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if arg::is_empty(argument) {
            out.push('?');
        } else if arg::is_variable(argument) {
            let _ = write!(out, "X{}", arg::decode(argument));
        } else {
            let _ = write!(out, "{}", arg::decode(argument));
        }
    }
    out.push(')');
    out
}

/// Render a full rule structure in the dump grammar.
pub fn dump_rule(structure: &[Predicate], names: &[String]) -> String {
    let mut out = dump_atom(&structure[0], names);
    out.push_str(":-");
    for (idx, predicate) in structure.iter().enumerate().skip(1) {
        if idx > 1 {
            out.push(',');
        }
        out.push_str(&dump_atom(predicate, names));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_dump_grammar() {
        let atoms = parse_rule("grandParent(X0,X1):-parent(X0,X2),parent(X2,X1)")
            .expect("well-formed rule");
        assert_eq!(3, atoms.len());
        assert_eq!("grandParent", atoms[0].name);
        assert_eq!(
            vec![ParsedArg::Variable(0), ParsedArg::Variable(1)],
            atoms[0].args
        );
        assert_eq!(
            vec![ParsedArg::Variable(0), ParsedArg::Variable(2)],
            atoms[1].args
        );
    }

    #[test]
    fn parses_constants_and_unlimited_vars() {
        let atoms = parse_rule("p(1,?):-q(23,X0),r(X0)").expect("well-formed rule");
        assert_eq!(
            vec![ParsedArg::Constant(1), ParsedArg::Unlimited],
            atoms[0].args
        );
        assert_eq!(
            vec![ParsedArg::Constant(23), ParsedArg::Variable(0)],
            atoms[1].args
        );
    }

    #[test]
    fn singleton_variables_become_unlimited() {
        /* X1 occurs once and is demoted; X2 is compacted to id 1 */
        let atoms = parse_rule("p(X0,X1):-q(X0,X2),r(X2)").expect("well-formed rule");
        assert_eq!(
            vec![ParsedArg::Variable(0), ParsedArg::Unlimited],
            atoms[0].args
        );
        assert_eq!(
            vec![ParsedArg::Variable(0), ParsedArg::Variable(1)],
            atoms[1].args
        );
        assert_eq!(vec![ParsedArg::Variable(1)], atoms[2].args);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(
            parse_rule("p(x)"),
            Err(RuleParseError::BadArgumentStart('x'))
        ));
        assert!(parse_rule("").is_err());
    }

    #[test]
    fn body_free_rules_parse() {
        let atoms = parse_rule("p(?,?):-").expect("well-formed rule");
        assert_eq!(1, atoms.len());
        assert_eq!(2, atoms[0].args.len());
    }

    #[test]
    fn dump_round_trips() {
        let names = vec!["p".to_string(), "q".to_string()];
        let structure = vec![
            Predicate {
                symbol: 0,
                args: vec![arg::variable(0), arg::EMPTY],
            },
            Predicate {
                symbol: 1,
                args: vec![arg::variable(0), arg::constant(7)],
            },
        ];
        let text = dump_rule(&structure, &names);
        assert_eq!("p(X0,?):-q(X0,7)", text);

        let atoms = parse_rule(&text).expect("round trip");
        assert_eq!("p", atoms[0].name);
        assert_eq!(
            vec![ParsedArg::Variable(0), ParsedArg::Unlimited],
            atoms[0].args
        );
        assert_eq!(
            vec![ParsedArg::Variable(0), ParsedArg::Constant(7)],
            atoms[1].args
        );
    }
}
