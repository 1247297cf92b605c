use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};

use crate::catalog::is_extraction_marker;
use crate::error::Result;
use crate::listing::{line_ending, ClassListing, ListingTree};
use crate::smali_parse::{classify, with_native_modifier, ListingLine};
use crate::types::{MethodIdentity, Modifier, ObjectIdentifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchState {
    Scanning,
    InMethodBody,
    /// Inside an annotation of a rewritten method; `keep` when it is copied to the output
    InAnnotationBlock { keep: bool },
}

/// An open `.param` directive of a rewritten method. Its line is only written once one of
/// its annotations is kept.
struct ParamScope {
    line: String,
    indent: usize,
    emitted: bool,
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Turns every selected method of `listing` into a native stub in place: `native` is added to
/// the header, the body is dropped except for annotation blocks other than the extraction
/// marker, and a single `.end method` closes the method. Everything else is left untouched.
///
/// Returns the number of rewritten methods.
pub fn patch_listing(listing: &mut ClassListing, selected: &HashSet<MethodIdentity>) -> Result<usize> {
    let mut out = Vec::with_capacity(listing.lines.len());
    let mut state = PatchState::Scanning;
    let mut owner: Option<ObjectIdentifier> = None;
    let mut param: Option<ParamScope> = None;
    let mut patched = 0;

    for line in listing.lines.drain(..) {
        match state {
            PatchState::Scanning => match classify(&line) {
                ListingLine::Class(class) => {
                    owner = Some(class);
                    out.push(line);
                }
                ListingLine::MethodStart(header) => {
                    let identity = owner
                        .as_ref()
                        .map(|o| MethodIdentity::new(o.as_jni_type(), header.name, header.signature));
                    match identity {
                        Some(identity) if selected.contains(&identity) => {
                            debug!("rewriting {} as native", identity);
                            let rewritten = if header.has(Modifier::Native) {
                                line.clone()
                            } else {
                                with_native_modifier(&line, &header)
                            };
                            out.push(rewritten);
                            state = PatchState::InMethodBody;
                            patched += 1;
                        }
                        _ => out.push(line),
                    }
                }
                _ => out.push(line),
            },
            PatchState::InMethodBody => match classify(&line) {
                ListingLine::EndMethod => {
                    out.push(format!(".end method{}", line_ending(&line)));
                    param = None;
                    state = PatchState::Scanning;
                }
                ListingLine::ParamStart => {
                    param = Some(ParamScope {
                        line: line.clone(),
                        indent: indent(&line),
                        emitted: false,
                    });
                }
                ListingLine::EndParam => {
                    if param.take().is_some_and(|p| p.emitted) {
                        out.push(line);
                    }
                }
                ListingLine::AnnotationStart { annotation_type } => {
                    if param.as_ref().is_some_and(|p| indent(&line) <= p.indent) {
                        param = None;
                    }
                    let keep = !is_extraction_marker(annotation_type);
                    if keep {
                        if let Some(p) = param.as_mut().filter(|p| !p.emitted) {
                            out.push(p.line.clone());
                            p.emitted = true;
                        }
                        out.push(line);
                    }
                    state = PatchState::InAnnotationBlock { keep };
                }
                _ => {}
            },
            PatchState::InAnnotationBlock { keep } => {
                let end = classify(&line) == ListingLine::EndAnnotation;
                if keep {
                    out.push(line);
                }
                if end {
                    state = PatchState::InMethodBody;
                }
            }
        }
    }

    if state != PatchState::Scanning {
        fail!(Structural, "{}: method without .end method", listing.path.display());
    }
    listing.lines = out;
    Ok(patched)
}

#[derive(Debug, Default)]
pub struct PatchSummary {
    pub methods: usize,
    pub files: usize,
    pub warnings: Vec<String>,
}

/// Rewrites every listing that declares a selected method, in every root that declares its
/// class.
pub fn patch_tree<'a>(
    tree: &ListingTree,
    selected: impl IntoIterator<Item = &'a MethodIdentity>,
) -> Result<PatchSummary> {
    let mut by_owner: BTreeMap<&str, HashSet<MethodIdentity>> = BTreeMap::new();
    for identity in selected {
        by_owner
            .entry(identity.owner.as_str())
            .or_default()
            .insert(identity.clone());
    }

    let mut summary = PatchSummary::default();
    for (owner, methods) in by_owner {
        let Some(class) = ObjectIdentifier::from_jni_type(owner) else {
            let msg = format!("{} is not a class descriptor", owner);
            warn!("{}", msg);
            summary.warnings.push(msg);
            continue;
        };
        let paths = tree.locate(&class);
        match paths.len() {
            0 => {
                let msg = format!("no listing found for {}", owner);
                warn!("{}", msg);
                summary.warnings.push(msg);
            }
            1 => {}
            n => {
                let msg = format!("{} is declared in {} listing roots, patching all of them", owner, n);
                warn!("{}", msg);
                summary.warnings.push(msg);
            }
        }
        for path in paths {
            let mut listing = ClassListing::read(&path)?;
            let count = patch_listing(&mut listing, &methods)?;
            if count > 0 {
                listing.save()?;
                summary.files += 1;
                summary.methods += count;
            }
        }
    }
    info!("rewrote {} methods in {} listings", summary.methods, summary.files);
    Ok(summary)
}
