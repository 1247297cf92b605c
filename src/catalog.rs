use std::collections::{HashMap, HashSet};

use log::{debug, info};

use crate::disassembler::{ClassMetadata, MethodMetadata};
use crate::types::{MethodFlags, MethodIdentity, MethodRecord, Modifier, STATIC_INITIALIZER};

/// Annotation descriptors ending with this suffix request extraction.
pub const EXTRACTION_MARKER: &str = "Dex2C;";

pub fn is_extraction_marker(annotation_type: &str) -> bool {
    annotation_type.ends_with(EXTRACTION_MARKER)
}

/// Every method of the program, plus the sets the rule engine derives its structural
/// exclusions from. Built once per run and read-only afterwards.
#[derive(Debug, Default)]
pub struct Catalog {
    records: Vec<MethodRecord>,
    /// (owner, name) of every method that is native before any rewrite
    native_methods: HashSet<(String, String)>,
    conflicts: HashSet<MethodIdentity>,
}

impl Catalog {
    pub fn build(classes: &[ClassMetadata]) -> Catalog {
        let mut catalog = Catalog::default();
        let mut overloads: HashMap<(String, String, String), MethodIdentity> = HashMap::new();

        for class in classes {
            let owner = class.class.as_jni_type();
            let class_marked = class.annotations.iter().any(|a| is_extraction_marker(a));

            for method in &class.methods {
                let identity = MethodIdentity::new(owner.clone(), &method.name, &method.signature);
                let flags = method_flags(method, class_marked);

                if flags.contains(MethodFlags::NATIVE) {
                    catalog
                        .native_methods
                        .insert((owner.clone(), method.name.clone()));
                }

                let (o, n, p) = identity.overload_key();
                let key = (o.to_string(), n.to_string(), p.to_string());
                match overloads.get(&key) {
                    Some(earlier) if *earlier != identity => {
                        debug!("return type conflict: {} and {}", earlier, identity);
                        catalog.conflicts.insert(earlier.clone());
                        catalog.conflicts.insert(identity.clone());
                    }
                    Some(_) => {}
                    None => {
                        overloads.insert(key, identity.clone());
                    }
                }

                catalog.records.push(MethodRecord { identity, flags });
            }
        }

        info!(
            "catalog: {} methods, {} native, {} in conflict",
            catalog.records.len(),
            catalog.native_methods.len(),
            catalog.conflicts.len()
        );
        catalog
    }

    pub fn records(&self) -> &[MethodRecord] {
        &self.records
    }

    pub fn is_conflicting(&self, identity: &MethodIdentity) -> bool {
        self.conflicts.contains(identity)
    }

    pub fn conflicts(&self) -> &HashSet<MethodIdentity> {
        &self.conflicts
    }

    /// True when a pre-existing native method shares owner and name with `identity`. Such a
    /// method would be ambiguous with a compiled overload under the short JNI name.
    pub fn shadows_native(&self, identity: &MethodIdentity) -> bool {
        self.native_methods
            .contains(&(identity.owner.clone(), identity.name.clone()))
    }
}

fn method_flags(method: &MethodMetadata, class_marked: bool) -> MethodFlags {
    let mut flags = MethodFlags::empty();
    flags.set(MethodFlags::SYNTHETIC, method.modifiers.contains(&Modifier::Synthetic));
    flags.set(MethodFlags::NATIVE, method.modifiers.contains(&Modifier::Native));
    flags.set(MethodFlags::STATIC_INITIALIZER, method.name == STATIC_INITIALIZER);

    let marked = class_marked || method.annotations.iter().any(|a| is_extraction_marker(a));
    let regular = !flags.intersects(MethodFlags::SYNTHETIC | MethodFlags::NATIVE);
    flags.set(MethodFlags::ANNOTATED, marked && regular);
    flags
}
