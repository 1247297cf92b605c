use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::abi;
use crate::android::manifest::{ManifestInfo, MANIFEST_ENTRY};
use crate::android::zip::{archive_directory, PackageArchive};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::disassembler::{Disassembler, ListingDisassembler};
use crate::emit;
use crate::error::{CompileFailure, IoContext, Result};
use crate::listing::ListingTree;
use crate::loader::{self, EntryPoint, LoaderSpec};
use crate::patcher;
use crate::rules::RuleSet;
use crate::selector::{SelectionResult, Selector};
use crate::template::{TempRegistry, WorkingProject};
use crate::tools::{default_jobs, SignOutcome, Toolchain};
use crate::types::MethodIdentity;

/// Loader used when none is requested.
pub const DEFAULT_LOADER: &str = "amimo.dcc.DccApplication";

/// Everything a run is parameterised with besides the configuration file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// A package file, or a decompiled tree holding `smali*` directories
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub filter: PathBuf,
    pub custom_loader: String,
    pub skip_synthetic: bool,
    pub no_build: bool,
    pub force_keep_libs: bool,
    /// Keep the generated project here instead of a temporary directory
    pub source_dir: Option<PathBuf>,
    pub project_archive: PathBuf,
    pub jobs: Option<usize>,
}

impl RunOptions {
    pub fn new(input: impl Into<PathBuf>) -> RunOptions {
        RunOptions {
            input: input.into(),
            output: None,
            filter: PathBuf::from("filter.txt"),
            custom_loader: DEFAULT_LOADER.to_string(),
            skip_synthetic: false,
            no_build: false,
            force_keep_libs: false,
            source_dir: None,
            project_archive: PathBuf::from("project-source.zip"),
            jobs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The rewritten package was written to the output path
    Packaged,
    /// Native sources were generated (and built) but no package was produced
    SourcesOnly,
    /// No method passed the filter; nothing was built or repackaged
    NothingSelected,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Packaged | RunStatus::SourcesOnly => 0,
            RunStatus::NothingSelected => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub compiled: Vec<MethodIdentity>,
    pub failures: Vec<CompileFailure>,
    pub too_long: Vec<MethodIdentity>,
    pub warnings: Vec<String>,
}

impl RunReport {
    fn new(status: RunStatus, selection: &SelectionResult, warnings: Vec<String>) -> RunReport {
        RunReport {
            status,
            compiled: selection.identities().cloned().collect(),
            failures: selection.failures.clone(),
            too_long: selection.too_long.clone(),
            warnings,
        }
    }
}

enum Input {
    Package(PathBuf),
    Listings(PathBuf),
}

fn validate(options: &RunOptions) -> Result<Input> {
    if !options.input.exists() {
        fail!(Input, "input {} does not exist", options.input.display());
    }
    loader::parse_loader_name(&options.custom_loader)?;
    if options.input.is_dir() {
        return Ok(Input::Listings(options.input.clone()));
    }
    if options.output.is_none() {
        fail!(Input, "an output package path is required");
    }
    Ok(Input::Package(options.input.clone()))
}

fn input_abis(input: &Input) -> Result<Vec<String>> {
    match input {
        Input::Package(package) => {
            let archive = PackageArchive::open(package)?;
            let names = archive.entry_names();
            Ok(abi::packaged_abis(names.iter().map(String::as_str))
                .into_iter()
                .collect())
        }
        Input::Listings(dir) => {
            let lib = dir.join("lib");
            if !lib.is_dir() {
                return Ok(vec![]);
            }
            let mut abis = vec![];
            for entry in std::fs::read_dir(&lib).at(&lib)? {
                let entry = entry.at(&lib)?;
                if entry.path().is_dir() {
                    abis.push(entry.file_name().to_string_lossy().to_string());
                }
            }
            abis.sort();
            Ok(abis)
        }
    }
}

fn application_class(package: &Path) -> Result<Option<String>> {
    let mut archive = PackageArchive::open(package)?;
    match archive.read_entry(MANIFEST_ENTRY)? {
        Some(bytes) => Ok(ManifestInfo::from_bytes(&bytes)?.application_class()),
        None => {
            warn!("{} has no {}", package.display(), MANIFEST_ENTRY);
            Ok(None)
        }
    }
}

/// Runs the whole rewrite. Temporary directories, including the working copy of the native
/// project, are removed when this returns or unwinds.
pub fn run(options: &RunOptions, config: &Config, tools: &Toolchain) -> Result<RunReport> {
    let input = validate(options)?;
    let mut warnings = vec![];
    let mut temps = TempRegistry::new()?;

    let project = WorkingProject::acquire(&config.project_template, options.source_dir.as_deref(), &mut temps)?;
    let spec = LoaderSpec::from_project(&options.custom_loader, &project.jni_dir().join("Android.mk"))?;
    loader::patch_bootstrap(&project.jni_dir(), &spec)?;

    let application_mk = project.jni_dir().join("Application.mk");
    if options.force_keep_libs {
        info!("keeping packaged libraries, targeting the ABIs of {}", application_mk.display());
    } else {
        let packaged = input_abis(&input)?;
        let reconciled = abi::reconcile(packaged.iter().map(String::as_str))?;
        warnings.extend(reconciled.warnings);
        abi::adjust_application_mk(&application_mk, &reconciled.abis)?;
    }

    let decompiled = match &input {
        Input::Package(package) => {
            let dir = temps.path("apktool");
            tools.decompiler.decompile(package, &dir)?;
            dir
        }
        Input::Listings(dir) => dir.clone(),
    };
    let tree = ListingTree::discover(&decompiled)?;
    if tree.roots().is_empty() {
        fail!(Input, "{} has no smali directories", decompiled.display());
    }
    let classes = ListingDisassembler::new(tree.clone()).disassemble()?;
    let catalog = Catalog::build(&classes);

    let rules = RuleSet::load(&options.filter)?;
    let selector = Selector {
        catalog: &catalog,
        rules: &rules,
        skip_synthetic: options.skip_synthetic,
    };
    let selection = selector.select(&options.input, tools.translator.as_ref());
    if !selection.failures.is_empty() {
        warn!("{} methods failed to compile:", selection.failures.len());
        for failure in &selection.failures {
            warn!("  {}", failure);
        }
    }
    if selection.is_empty() {
        info!("no methods compiled, check filter configuration");
        return Ok(RunReport::new(RunStatus::NothingSelected, &selection, warnings));
    }

    let stage = Stage {
        input: &input,
        options,
        config,
        tools,
        project: &project,
        spec: &spec,
        tree: &tree,
        decompiled: &decompiled,
    };
    let status = stage
        .finish(&selection, &mut temps, &mut warnings)
        .map_err(|e| e.with_failures(&selection.failures))?;
    Ok(RunReport::new(status, &selection, warnings))
}

/// State shared by the steps that follow a non-empty selection.
struct Stage<'a> {
    input: &'a Input,
    options: &'a RunOptions,
    config: &'a Config,
    tools: &'a Toolchain,
    project: &'a WorkingProject,
    spec: &'a LoaderSpec,
    tree: &'a ListingTree,
    decompiled: &'a Path,
}

impl Stage<'_> {
    /// Emits and builds the sources, then rewrites and repackages the input when it is a package.
    fn finish(
        &self,
        selection: &SelectionResult,
        temps: &mut TempRegistry,
        warnings: &mut Vec<String>,
    ) -> Result<RunStatus> {
        let Stage {
            input,
            options,
            config,
            tools,
            project,
            spec,
            tree,
            decompiled,
        } = *self;

        let emission = emit::write_sources(&project.sources_dir(), selection)?;
        warnings.extend(
            emission
                .overwritten
                .iter()
                .map(|p| format!("overwrote {}", p.display())),
        );
        if !project.is_persistent() && options.no_build {
            archive_directory(project.dir(), &options.project_archive)?;
            info!("project sources archived to {}", options.project_archive.display());
        }

        if !options.no_build {
            tools
                .builder
                .build(project.dir(), options.jobs.unwrap_or_else(default_jobs))?;
        }

        let (Input::Package(package), Some(output)) = (input, &options.output) else {
            return Ok(RunStatus::SourcesOnly);
        };

        let patched = patcher::patch_tree(tree, selection.identities())?;
        warnings.extend(patched.warnings);
        warnings.extend(abi::merge_compiled_libs(
            &project.libs_dir(),
            &decompiled.join("lib"),
            &spec.module,
            options.force_keep_libs,
        )?);

        loader::place_loader_listing(tree, &config.loader_template, spec)?;
        let application = application_class(package)?;
        if loader::inject_entry_point(tree, application.as_deref(), spec)? == EntryPoint::ManifestRegistration {
            info!("registering {} as the application class", options.custom_loader);
            tools
                .manifest_editor
                .set_application(&decompiled.join(MANIFEST_ENTRY), &options.custom_loader)?;
        }

        let unsigned = temps.path("unsigned.apk");
        tools.recompiler.recompile(decompiled, &unsigned)?;
        if let SignOutcome::CopiedUnsigned(reason) = tools.signer.sign(&unsigned, output)? {
            warnings.push(format!("package left unsigned: {}", reason));
        }
        info!("wrote {}", output.display());

        Ok(RunStatus::Packaged)
    }
}
