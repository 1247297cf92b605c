//! Method filter rules.
//!
//! A rule file is read line by line:
//!
//! ```text
//! # comment
//! !<regex>       keep the matching methods as bytecode
//! =<full name>   compile exactly this method
//! <regex>        compile the matching methods
//! ```
//!
//! Regexes are searched (not anchored) in the method full name, e.g.
//! `Lcom/example/Foo;bar(I)V`.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info};
use regex::Regex;

use crate::catalog::Catalog;
use crate::error::{Error, IoContext, Result};
use crate::types::MethodRecord;

/// A single parsed rule. `line` is the 1-based line number in the rule file.
#[derive(Debug, Clone)]
pub enum Rule {
    Exclude { pattern: Regex, line: usize },
    ExactInclude { full_name: String, line: usize },
    Include { pattern: Regex, line: usize },
}

/// The rules of one file, grouped by tag, each group in file order.
#[derive(Debug, Default)]
pub struct RuleSet {
    keep: Vec<(Regex, usize)>,
    exact: HashSet<String>,
    include: Vec<(Regex, usize)>,
}

impl RuleSet {
    /// Loads a rule file. A missing file is an empty rule set.
    pub fn load(path: &Path) -> Result<RuleSet> {
        if !path.exists() {
            info!("rule file {} not found, using no rules", path.display());
            return Ok(RuleSet::default());
        }
        let text = fs::read_to_string(path).at(path)?;
        RuleSet::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<RuleSet> {
        let mut set = RuleSet::default();
        for rule in parse_rules(text)? {
            match rule {
                Rule::Exclude { pattern, line } => set.keep.push((pattern, line)),
                Rule::ExactInclude { full_name, .. } => {
                    set.exact.insert(full_name);
                }
                Rule::Include { pattern, line } => set.include.push((pattern, line)),
            }
        }
        debug!(
            "rules: {} keep, {} exact, {} include",
            set.keep.len(),
            set.exact.len(),
            set.include.len()
        );
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty() && self.exact.is_empty() && self.include.is_empty()
    }
}

/// Parses rule text into tagged rules in file order.
pub fn parse_rules(text: &str) -> Result<Vec<Rule>> {
    let mut rules = vec![];
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let rule = if let Some(body) = trimmed.strip_prefix('!') {
            Rule::Exclude {
                pattern: compile(body.trim(), line)?,
                line,
            }
        } else if let Some(body) = trimmed.strip_prefix('=') {
            Rule::ExactInclude {
                full_name: body.trim().to_string(),
                line,
            }
        } else {
            Rule::Include {
                pattern: compile(trimmed, line)?,
                line,
            }
        };
        rules.push(rule);
    }
    Ok(rules)
}

fn compile(pattern: &str, line: usize) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("line {}: invalid rule pattern: {}", line, e)))
}

/// Why a method was or was not selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Conflict,
    Synthetic,
    Native,
    StaticInitializer,
    ShadowsNative,
    KeepRule(usize),
    ExactMatch,
    Annotated,
    IncludeRule(usize),
    NoRule,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Conflict => write!(f, "overload differs only by return type"),
            Reason::Synthetic => write!(f, "synthetic"),
            Reason::Native => write!(f, "already native"),
            Reason::StaticInitializer => write!(f, "static initializer"),
            Reason::ShadowsNative => write!(f, "same name as a native method"),
            Reason::KeepRule(line) => write!(f, "keep rule on line {}", line),
            Reason::ExactMatch => write!(f, "exact match"),
            Reason::Annotated => write!(f, "annotated"),
            Reason::IncludeRule(line) => write!(f, "include rule on line {}", line),
            Reason::NoRule => write!(f, "no matching rule"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Include(Reason),
    Exclude(Reason),
    Undecided,
}

impl Decision {
    pub fn is_include(&self) -> bool {
        matches!(self, Decision::Include(_))
    }
}

/// Everything a stage may look at.
pub struct Evaluation<'a> {
    pub record: &'a MethodRecord,
    pub full_name: &'a str,
    pub catalog: &'a Catalog,
    pub rules: &'a RuleSet,
    pub skip_synthetic: bool,
}

type Stage = fn(&Evaluation<'_>) -> Decision;

const STAGES: [Stage; 10] = [
    conflict_stage,
    synthetic_stage,
    native_stage,
    static_initializer_stage,
    shadow_stage,
    keep_stage,
    exact_stage,
    annotation_stage,
    include_stage,
    default_stage,
];

/// Decides whether one method is compiled. The first stage with a definitive answer wins.
pub fn evaluate(
    record: &MethodRecord,
    catalog: &Catalog,
    rules: &RuleSet,
    skip_synthetic: bool,
) -> Decision {
    let full_name = record.identity.full_name();
    let eval = Evaluation {
        record,
        full_name: &full_name,
        catalog,
        rules,
        skip_synthetic,
    };
    STAGES
        .iter()
        .map(|stage| stage(&eval))
        .find(|d| *d != Decision::Undecided)
        .unwrap_or(Decision::Exclude(Reason::NoRule))
}

fn exclude_if(cond: bool, reason: Reason) -> Decision {
    if cond {
        Decision::Exclude(reason)
    } else {
        Decision::Undecided
    }
}

fn conflict_stage(e: &Evaluation<'_>) -> Decision {
    exclude_if(e.catalog.is_conflicting(&e.record.identity), Reason::Conflict)
}

fn synthetic_stage(e: &Evaluation<'_>) -> Decision {
    exclude_if(e.skip_synthetic && e.record.is_synthetic(), Reason::Synthetic)
}

fn native_stage(e: &Evaluation<'_>) -> Decision {
    exclude_if(e.record.is_native(), Reason::Native)
}

fn static_initializer_stage(e: &Evaluation<'_>) -> Decision {
    exclude_if(e.record.is_static_initializer(), Reason::StaticInitializer)
}

fn shadow_stage(e: &Evaluation<'_>) -> Decision {
    exclude_if(e.catalog.shadows_native(&e.record.identity), Reason::ShadowsNative)
}

fn keep_stage(e: &Evaluation<'_>) -> Decision {
    match e.rules.keep.iter().find(|(re, _)| re.is_match(e.full_name)) {
        Some((_, line)) => Decision::Exclude(Reason::KeepRule(*line)),
        None => Decision::Undecided,
    }
}

fn exact_stage(e: &Evaluation<'_>) -> Decision {
    if e.rules.exact.contains(e.full_name) {
        Decision::Include(Reason::ExactMatch)
    } else {
        Decision::Undecided
    }
}

fn annotation_stage(e: &Evaluation<'_>) -> Decision {
    if e.record.is_annotated() {
        Decision::Include(Reason::Annotated)
    } else {
        Decision::Undecided
    }
}

fn include_stage(e: &Evaluation<'_>) -> Decision {
    match e.rules.include.iter().find(|(re, _)| re.is_match(e.full_name)) {
        Some((_, line)) => Decision::Include(Reason::IncludeRule(*line)),
        None => Decision::Undecided,
    }
}

fn default_stage(_: &Evaluation<'_>) -> Decision {
    Decision::Exclude(Reason::NoRule)
}
