use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::CompileFailure;
use crate::jni;
use crate::rules::{evaluate, Decision, RuleSet};
use crate::tools::Translator;
use crate::types::MethodIdentity;

/// The outcome of one selection pass.
#[derive(Debug, Default)]
pub struct SelectionResult {
    /// Generated source per compiled method, in identity order
    pub compiled: BTreeMap<MethodIdentity, String>,
    pub failures: Vec<CompileFailure>,
    /// Methods whose long JNI name is over [`jni::MAX_SYMBOL_LEN`]
    pub too_long: Vec<MethodIdentity>,
}

impl SelectionResult {
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn contains(&self, identity: &MethodIdentity) -> bool {
        self.compiled.contains_key(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &MethodIdentity> {
        self.compiled.keys()
    }
}

pub struct Selector<'a> {
    pub catalog: &'a Catalog,
    pub rules: &'a RuleSet,
    pub skip_synthetic: bool,
}

impl Selector<'_> {
    /// Runs the rules over every catalogued method and translates the included ones.
    /// Translation failures are collected; they never stop the pass.
    pub fn select(&self, input: &Path, translator: &dyn Translator) -> SelectionResult {
        let mut result = SelectionResult::default();

        for record in self.catalog.records() {
            let identity = &record.identity;
            let long_name = jni::long_name(identity);
            if long_name.len() > jni::MAX_SYMBOL_LEN {
                debug!("name too long {} (> {}) {}", long_name, jni::MAX_SYMBOL_LEN, identity);
                result.too_long.push(identity.clone());
                continue;
            }

            match evaluate(record, self.catalog, self.rules, self.skip_synthetic) {
                Decision::Include(reason) => {
                    debug!("compiling {} ({})", identity, reason);
                }
                Decision::Exclude(reason) => {
                    debug!("skipping {} ({})", identity, reason);
                    continue;
                }
                Decision::Undecided => continue,
            }

            match translator.translate(input, identity) {
                Ok(code) if code.trim().is_empty() => {
                    warn!("compile method failed: {} (empty translation)", identity);
                    result.failures.push(CompileFailure {
                        identity: identity.clone(),
                        reason: "empty translation".to_string(),
                    });
                }
                Ok(code) => {
                    result.compiled.insert(identity.clone(), code);
                }
                Err(reason) => {
                    warn!("compile method failed: {} ({})", identity, reason);
                    result.failures.push(CompileFailure {
                        identity: identity.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            "selected {} methods, {} failed, {} with names too long",
            result.compiled.len(),
            result.failures.len(),
            result.too_long.len()
        );
        result
    }
}
