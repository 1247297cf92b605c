//! Bootstrap wiring: the loader class that loads the compiled library at startup, and the call
//! into it from the application's static initializer.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, IoContext, Result};
use crate::jni;
use crate::listing::{line_ending, ClassListing, ListingTree};
use crate::smali_parse::{classify, ListingLine};
use crate::types::{ObjectIdentifier, STATIC_INITIALIZER};

/// Loader class the bootstrap source and the loader listing template are written against.
pub const TEMPLATE_LOADER: &str = "amimo/dcc/DccApplication";

/// Bootstrap native source, relative to the project's `jni` directory.
pub const BOOTSTRAP_SOURCE: &str = "nc/Dex2C.cpp";

static LIBRARY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"const-string v0, "[^"\n]*""#).expect("valid pattern"));

/// Where the loader lives and which library it loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSpec {
    pub class: ObjectIdentifier,
    /// `LOCAL_MODULE` of the native project
    pub module: String,
}

impl LoaderSpec {
    pub fn new(loader: &str, module: impl Into<String>) -> Result<LoaderSpec> {
        Ok(LoaderSpec {
            class: parse_loader_name(loader)?,
            module: module.into(),
        })
    }

    /// Reads the module name from the project's `Android.mk`.
    pub fn from_project(loader: &str, android_mk: &Path) -> Result<LoaderSpec> {
        let text = fs::read_to_string(android_mk).at(android_mk)?;
        match module_name(&text) {
            Some(module) => LoaderSpec::new(loader, module),
            None => fail!(Structural, "invalid LOCAL_MODULE in {}", android_mk.display()),
        }
    }

    /// `Java_<mangled loader>`, the prefix of the loader's native method symbols.
    pub fn symbol_prefix(&self) -> String {
        format!("Java_{}", jni::mangle(self.class.internal_name()))
    }

    pub fn library_file(&self) -> String {
        format!("lib{}.so", self.module)
    }

    /// The statement that bootstraps the compiled code.
    pub fn init_call(&self) -> String {
        format!("invoke-static {{}}, {}->initDcc()V", self.class.as_jni_type())
    }
}

/// Validates a dotted loader name. It must have at least one package qualifier.
pub fn parse_loader_name(loader: &str) -> Result<ObjectIdentifier> {
    let valid_segment = |s: &str| !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '/' || c == ';');
    let class = ObjectIdentifier::from_java_type(loader);
    if class.package_path().is_none() || !loader.split('.').all(valid_segment) {
        fail!(
            Input,
            "custom loader must have at least one package, such as demo.{}",
            loader
        );
    }
    Ok(class)
}

/// The value of the first `LOCAL_MODULE := ...` assignment, if not empty.
pub fn module_name(android_mk: &str) -> Option<String> {
    android_mk.lines().find_map(|line| {
        let (key, value) = line.split_once(":=")?;
        if key.trim() != "LOCAL_MODULE" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Points the bootstrap source at the configured loader.
pub fn patch_bootstrap_source(source: &str, spec: &LoaderSpec) -> String {
    let template_prefix = format!("Java_{}", jni::mangle(TEMPLATE_LOADER));
    source
        .replace(
            &format!("env->FindClass(\"{}\");", TEMPLATE_LOADER),
            &format!("env->FindClass(\"{}\");", spec.class.internal_name()),
        )
        .replace(&template_prefix, &spec.symbol_prefix())
}

pub fn patch_bootstrap(jni_dir: &Path, spec: &LoaderSpec) -> Result<()> {
    let path = jni_dir.join(BOOTSTRAP_SOURCE);
    if !path.is_file() {
        fail!(Config, "bootstrap source {} not found", path.display());
    }
    let source = fs::read_to_string(&path).at(&path)?;
    fs::write(&path, patch_bootstrap_source(&source, spec)).at(&path)
}

/// Specialises the loader listing template: library name and class descriptor.
pub fn specialise_loader_listing(template: &str, spec: &LoaderSpec) -> String {
    let library = format!("const-string v0, \"{}\"", spec.module);
    let text = LIBRARY_NAME.replace_all(template, regex::NoExpand(&library));
    text.replace(&format!("L{};", TEMPLATE_LOADER), &spec.class.as_jni_type())
}

/// Writes the specialised loader under the last listing root. Returns the written path.
pub fn place_loader_listing(tree: &ListingTree, template: &Path, spec: &LoaderSpec) -> Result<PathBuf> {
    let Some(root) = tree.last_root() else {
        fail!(Structural, "decompiled package has no smali directory");
    };
    let text = fs::read_to_string(template)
        .map_err(|e| Error::Config(format!("cannot read loader template {}: {}", template.display(), e)))?;
    let path = root.join(spec.class.listing_path());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::write(&path, specialise_loader_listing(&text, spec)).at(&path)?;
    info!("loader {} written to {}", spec.class, path.display());
    Ok(path)
}

/// Inserts the loader call into the static initializer of `listing`, synthesising one when the
/// class has none.
pub fn inject_init_call(listing: &mut ClassListing, spec: &LoaderSpec) -> Result<()> {
    let call = spec.init_call();
    let header = listing.lines.iter().position(|line| {
        matches!(classify(line), ListingLine::MethodStart(h) if h.name == STATIC_INITIALIZER)
    });

    let Some(header) = header else {
        let ending = listing.lines.first().map(|l| line_ending(l)).unwrap_or("\n").to_string();
        if listing.lines.last().is_some_and(|l| !l.ends_with('\n')) {
            listing.lines.push(ending.clone());
        }
        for line in [
            String::new(),
            format!(".method static constructor {}()V", STATIC_INITIALIZER),
            "    .registers 0".to_string(),
            String::new(),
            format!("    {}", call),
            String::new(),
            "    return-void".to_string(),
            ".end method".to_string(),
        ] {
            listing.lines.push(format!("{}{}", line, ending));
        }
        return Ok(());
    };

    for idx in header + 1..listing.lines.len() {
        match classify(&listing.lines[idx]) {
            ListingLine::Registers(_) => {
                let ending = line_ending(&listing.lines[idx]).to_string();
                listing.lines.insert(idx + 1, format!("    {}{}", call, ending));
                return Ok(());
            }
            ListingLine::EndMethod => break,
            _ => {}
        }
    }
    fail!(
        Structural,
        "{}: <clinit> has no .locals or .registers directive",
        listing.path.display()
    )
}

/// Where the loader got hooked in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// The loader call was added to this application listing
    Injected(PathBuf),
    /// No usable application class: the loader must be registered in the manifest
    ManifestRegistration,
}

/// Hooks the loader into the application class, if it is declared and has a listing.
pub fn inject_entry_point(
    tree: &ListingTree,
    application: Option<&str>,
    spec: &LoaderSpec,
) -> Result<EntryPoint> {
    let Some(application) = application else {
        info!("no application class declared, registering {}", spec.class.as_java_type());
        return Ok(EntryPoint::ManifestRegistration);
    };
    let class = ObjectIdentifier::from_java_type(application);
    let paths = tree.locate(&class);
    let Some(path) = paths.first() else {
        warn!("application class {} not found in the listings", application);
        return Ok(EntryPoint::ManifestRegistration);
    };
    info!("application class {}", application);
    let mut listing = ClassListing::read(path)?;
    inject_init_call(&mut listing, spec)?;
    listing.save()?;
    Ok(EntryPoint::Injected(path.clone()))
}
