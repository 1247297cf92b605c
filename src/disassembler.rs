use std::collections::HashSet;
use std::fs;

use log::{debug, warn};

use crate::error::{IoContext, Result};
use crate::listing::ListingTree;
use crate::smali_parse::{classify, ListingLine};
use crate::types::{Modifier, ObjectIdentifier};

/// Per-method metadata as reported by a disassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMetadata {
    pub name: String,
    pub signature: String,
    pub modifiers: Vec<Modifier>,
    /// Descriptors of the method-level annotations
    pub annotations: Vec<String>,
}

/// Per-class metadata as reported by a disassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadata {
    pub class: ObjectIdentifier,
    /// Descriptors of the class-level annotations
    pub annotations: Vec<String>,
    pub methods: Vec<MethodMetadata>,
}

/// Produces the class and method metadata the catalog is built from.
pub trait Disassembler {
    fn disassemble(&self) -> Result<Vec<ClassMetadata>>;
}

/// Reads metadata straight from the smali listings of a decompiled package.
pub struct ListingDisassembler {
    tree: ListingTree,
}

impl ListingDisassembler {
    pub fn new(tree: ListingTree) -> Self {
        ListingDisassembler { tree }
    }
}

impl Disassembler for ListingDisassembler {
    fn disassemble(&self) -> Result<Vec<ClassMetadata>> {
        let mut classes = vec![];
        let mut seen = HashSet::new();
        for (root, path) in self.tree.listing_files()? {
            let text = fs::read_to_string(&path).at(&path)?;
            let Some(class) = scan_class(&text) else {
                warn!("{} has no .class directive, skipping", path.display());
                continue;
            };
            if !seen.insert(class.class.clone()) {
                warn!(
                    "{} is declared again in {}, keeping the first declaration",
                    class.class,
                    self.root_name(root)
                );
                continue;
            }
            classes.push(class);
        }
        debug!("disassembled {} classes", classes.len());
        Ok(classes)
    }
}

impl ListingDisassembler {
    fn root_name(&self, idx: usize) -> String {
        self.tree
            .roots()
            .get(idx)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy)]
enum Scope {
    Class,
    Method,
    /// A `.param` directive at the given indentation. Its annotations are indented deeper.
    Param(usize),
    Field,
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Extracts the metadata of one listing. Annotations are attributed to the innermost scope:
/// class, method, or ignored when they belong to a parameter or a field.
pub(crate) fn scan_class(text: &str) -> Option<ClassMetadata> {
    let mut class: Option<ClassMetadata> = None;
    let mut scope = Scope::Class;

    for line in text.lines() {
        match classify(line) {
            ListingLine::Class(name) => {
                class = Some(ClassMetadata {
                    class: name,
                    annotations: vec![],
                    methods: vec![],
                });
            }
            ListingLine::MethodStart(header) => {
                if let Some(c) = class.as_mut() {
                    c.methods.push(MethodMetadata {
                        name: header.name.to_string(),
                        signature: header.signature.to_string(),
                        modifiers: header.modifiers.clone(),
                        annotations: vec![],
                    });
                }
                scope = Scope::Method;
            }
            ListingLine::EndMethod => scope = Scope::Class,
            ListingLine::ParamStart => {
                if matches!(scope, Scope::Method | Scope::Param(_)) {
                    scope = Scope::Param(indent(line));
                }
            }
            ListingLine::EndParam => scope = Scope::Method,
            ListingLine::AnnotationStart { annotation_type } => {
                if let Scope::Param(param_indent) = scope {
                    if indent(line) > param_indent {
                        continue;
                    }
                    scope = Scope::Method;
                }
                if matches!(scope, Scope::Field) && indent(line) == 0 {
                    scope = Scope::Class;
                }
                let Some(c) = class.as_mut() else { continue };
                match scope {
                    Scope::Class => c.annotations.push(annotation_type.to_string()),
                    Scope::Method => {
                        if let Some(m) = c.methods.last_mut() {
                            m.annotations.push(annotation_type.to_string());
                        }
                    }
                    Scope::Param(_) | Scope::Field => {}
                }
            }
            ListingLine::Other if line.trim_start().starts_with(".field ") => {
                if matches!(scope, Scope::Class | Scope::Field) {
                    scope = Scope::Field;
                }
            }
            ListingLine::Other if line.trim() == ".end field" => scope = Scope::Class,
            ListingLine::Other if matches!(scope, Scope::Field) => {
                // Fields without annotations have no `.end field`
                if !line.trim().is_empty() && indent(line) == 0 {
                    scope = Scope::Class;
                }
            }
            _ => {}
        }
    }
    class
}
