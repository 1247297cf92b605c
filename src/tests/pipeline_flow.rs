use std::fs;
use std::path::PathBuf;

use super::*;
use crate::android::manifest::tests::binary_manifest;
use crate::android::zip::{ArchiveWriter, PackageArchive};
use crate::error::Error;
use crate::pipeline::{run, RunOptions, RunStatus};

fn write_package(ws: &Workspace, application: Option<&str>, libs: &[&str]) -> PathBuf {
    let mut writer = ArchiveWriter::new();
    writer.add("AndroidManifest.xml", binary_manifest("com.example", application));
    writer.add("classes.dex", b"dex\n035\0".to_vec());
    for lib in libs {
        writer.add(lib, b"\x7fELF".to_vec());
    }
    let path = ws.path("in.apk");
    writer.write_to_file(&path).unwrap();
    path
}

fn options(ws: &Workspace, package: PathBuf) -> RunOptions {
    RunOptions {
        output: Some(ws.path("out.apk")),
        filter: ws.path("filter.txt"),
        custom_loader: "com.shield.Loader".to_string(),
        jobs: Some(3),
        ..RunOptions::new(package)
    }
}

fn entry(archive: &mut PackageArchive, name: &str) -> String {
    let bytes = archive.read_entry(name).unwrap().unwrap_or_else(|| panic!("{} missing", name));
    String::from_utf8(bytes).unwrap()
}

#[test]
fn package_is_rewritten_end_to_end() {
    let ws = Workspace::new("# compile everything in Foo\n=Lcom/example/Foo;baz()I\n");
    let package = write_package(&ws, Some(".App"), &["lib/armeabi/libfoo.so"]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &["armeabi"]);

    let report = run(&options(&ws, package), &ws.config(), &tools).unwrap();
    assert_eq!(report.status, RunStatus::Packaged);
    assert_eq!(report.status.exit_code(), 0);
    let compiled: Vec<_> = report.compiled.iter().map(|m| m.full_name()).collect();
    assert_eq!(compiled, ["Lcom/example/Foo;bar(I)V", "Lcom/example/Foo;baz()I"]);
    assert!(report.failures.is_empty());
    assert!(report.warnings.iter().any(|w| w.contains("deprecated")));
    assert_eq!(*log.borrow(), ["decompile", "build -j3", "recompile", "sign"]);

    let mut out = PackageArchive::open(&ws.path("out.apk")).unwrap();
    let foo = entry(&mut out, "smali/com/example/Foo.smali");
    assert!(foo.contains(".method public native bar(I)V\n"));
    assert!(foo.contains(".method public native baz()I\n"));
    assert!(foo.contains(".method public constructor <init>()V\n    .locals 0\n"));
    assert!(!foo.contains("Dex2C"));
    assert!(!foo.contains("add-int/2addr"));

    let app = entry(&mut out, "smali/com/example/App.smali");
    assert!(app.contains("    .locals 2\n    invoke-static {}, Lcom/shield/Loader;->initDcc()V\n"));

    let loader = entry(&mut out, "smali_classes2/com/shield/Loader.smali");
    assert!(loader.starts_with(".class public Lcom/shield/Loader;\n"));
    assert!(loader.contains("const-string v0, \"stub\"\n"));

    assert_eq!(entry(&mut out, "lib/armeabi/libstub.so"), "stub for armeabi-v7a");
    assert_eq!(entry(&mut out, "lib/armeabi/libfoo.so"), "foo");
    let util = entry(&mut out, "smali_classes2/com/other/Util.smali");
    assert!(util.contains(".method public static helper()V\n"));

    // the template stays pristine
    assert_eq!(fs::read_to_string(ws.path("project/jni/Application.mk")).unwrap(), APPLICATION_MK);
    assert_eq!(fs::read_to_string(ws.path("project/jni/nc/Dex2C.cpp")).unwrap(), BOOTSTRAP);
    assert!(!ws.path("project/jni/nc/compiled_methods.txt").exists());
}

#[test]
fn nothing_selected_stops_before_building() {
    let ws = Workspace::new("!.*\n");
    let package = write_package(&ws, Some(".App"), &["lib/arm64-v8a/libfoo.so"]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &["arm64-v8a"]);

    let report = run(&options(&ws, package), &ws.config(), &tools).unwrap();
    assert_eq!(report.status, RunStatus::NothingSelected);
    assert_eq!(report.status.exit_code(), 2);
    assert!(report.compiled.is_empty());
    assert_eq!(*log.borrow(), ["decompile"]);
    assert!(!ws.path("out.apk").exists());
    assert_eq!(fs::read_to_string(ws.path("project/jni/Application.mk")).unwrap(), APPLICATION_MK);
}

#[test]
fn unknown_abi_aborts_unless_libraries_are_kept() {
    let ws = Workspace::new("");
    let package = write_package(&ws, Some(".App"), &["lib/mips/libfoo.so"]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &["mips"]);

    let err = run(&options(&ws, package.clone()), &ws.config(), &tools).unwrap_err();
    assert!(matches!(err, Error::Structural(_)));
    assert!(log.borrow().is_empty());

    let mut opts = options(&ws, package);
    opts.force_keep_libs = true;
    let report = run(&opts, &ws.config(), &tools).unwrap();
    assert_eq!(report.status, RunStatus::Packaged);
    assert!(report.warnings.iter().any(|w| w.contains("mips")));

    let mut out = PackageArchive::open(&ws.path("out.apk")).unwrap();
    let names = out.entry_names();
    assert!(names.contains(&"lib/mips/libfoo.so".to_string()));
    assert!(!names.contains(&"lib/mips/libstub.so".to_string()));
    assert!(entry(&mut out, "smali/com/example/Foo.smali").contains(".method public native bar(I)V\n"));
}

#[test]
fn kept_libraries_leave_application_mk_alone() {
    let ws = Workspace::new("");
    let package = write_package(&ws, Some(".App"), &["lib/mips/libfoo.so", "lib/x86/libfoo.so"]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &["mips", "x86"]);

    let mut opts = options(&ws, package);
    opts.force_keep_libs = true;
    opts.no_build = true;
    opts.source_dir = Some(ws.path("kept"));
    let report = run(&opts, &ws.config(), &tools).unwrap();
    assert_eq!(report.status, RunStatus::Packaged);
    assert_eq!(*log.borrow(), ["decompile", "recompile", "sign"]);
    assert_eq!(fs::read_to_string(ws.path("kept/jni/Application.mk")).unwrap(), APPLICATION_MK);
    assert!(!report.warnings.iter().any(|w| w.contains("unsupported")));
}

#[test]
fn late_errors_still_report_method_failures() {
    let ws = Workspace::new("Lcom/other/Util;broken.*\n");
    let package = write_package(&ws, Some(".App"), &[]);
    let log = CallLog::default();
    // the decompiled tree holds an ABI the project cannot build
    let tools = fake_toolchain(&log, &["mips"]);

    let err = run(&options(&ws, package), &ws.config(), &tools).unwrap_err();
    let Error::Run { source, failures } = &err else {
        panic!("expected a run error, got {:?}", err);
    };
    assert!(matches!(**source, Error::Structural(_)));
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].identity.full_name(), "Lcom/other/Util;broken()V");
    assert_eq!(failures[0].reason, "unsupported instruction");
    assert_eq!(err.failures(), failures.as_slice());
    assert_eq!(*log.borrow(), ["decompile", "build -j3"]);
    assert!(!ws.path("out.apk").exists());
}

#[test]
fn loader_is_registered_when_no_application_is_declared() {
    let ws = Workspace::new("");
    let package = write_package(&ws, None, &[]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &[]);

    let report = run(&options(&ws, package), &ws.config(), &tools).unwrap();
    assert_eq!(report.status, RunStatus::Packaged);
    assert_eq!(
        *log.borrow(),
        ["decompile", "build -j3", "manifest com.shield.Loader", "recompile", "sign"]
    );

    let mut out = PackageArchive::open(&ws.path("out.apk")).unwrap();
    assert!(!entry(&mut out, "smali/com/example/App.smali").contains("initDcc"));
    // no packaged ABI: the project's own set is built and copied in whole
    for abi in ["armeabi-v7a", "arm64-v8a", "x86", "x86_64"] {
        assert_eq!(entry(&mut out, &format!("lib/{}/libstub.so", abi)), format!("stub for {}", abi));
    }
}

#[test]
fn listing_directory_yields_sources_only() {
    let ws = Workspace::new("Lcom/other/Util;broken.*\n");
    let decoded = ws.path("decoded");
    write_decompiled_tree(&decoded, &["x86"]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &[]);

    let opts = RunOptions {
        filter: ws.path("filter.txt"),
        no_build: true,
        project_archive: ws.path("project.zip"),
        ..RunOptions::new(&decoded)
    };
    let report = run(&opts, &ws.config(), &tools).unwrap();
    assert_eq!(report.status, RunStatus::SourcesOnly);
    assert!(log.borrow().is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].identity.full_name(), "Lcom/other/Util;broken()V");
    assert_eq!(report.failures[0].reason, "unsupported instruction");
    // listings are only rewritten when a package is produced
    assert_eq!(fs::read_to_string(decoded.join("smali/com/example/Foo.smali")).unwrap(), FOO);

    let mut archive = PackageArchive::open(&ws.path("project.zip")).unwrap();
    assert_eq!(
        entry(&mut archive, "jni/nc/compiled_methods.txt"),
        "Lcom/example/Foo;bar(I)V"
    );
    assert!(entry(&mut archive, "jni/Application.mk").contains("APP_ABI := x86\n"));
    let unit = archive
        .entry_names()
        .into_iter()
        .find(|n| n.starts_with("jni/nc/Java_com_example_Foo_bar"))
        .unwrap();
    assert!(entry(&mut archive, &unit).starts_with("#include \"Dex2C.h\"\n// native body of"));
}

#[test]
fn persistent_source_dir_is_reused() {
    let ws = Workspace::new("");
    let decoded = ws.path("decoded");
    write_decompiled_tree(&decoded, &[]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &[]);

    let opts = RunOptions {
        filter: ws.path("filter.txt"),
        source_dir: Some(ws.path("kept")),
        jobs: Some(1),
        ..RunOptions::new(&decoded)
    };
    run(&opts, &ws.config(), &tools).unwrap();
    assert!(ws.path("kept/jni/nc/compiled_methods.txt").is_file());
    assert!(ws.path("kept/libs/x86/libstub.so").is_file());

    // a second run writes over the same units
    let report = run(&opts, &ws.config(), &tools).unwrap();
    assert!(report.warnings.iter().any(|w| w.starts_with("overwrote")));
    assert_eq!(*log.borrow(), ["build -j1", "build -j1"]);
}

#[test]
fn missing_output_and_bad_loader_are_input_errors() {
    let ws = Workspace::new("");
    let package = write_package(&ws, None, &[]);
    let log = CallLog::default();
    let tools = fake_toolchain(&log, &[]);

    let mut opts = options(&ws, package.clone());
    opts.output = None;
    assert!(matches!(run(&opts, &ws.config(), &tools), Err(Error::Input(_))));

    let mut opts = options(&ws, package);
    opts.custom_loader = "Loader".to_string();
    assert!(matches!(run(&opts, &ws.config(), &tools), Err(Error::Input(_))));

    let opts = options(&ws, ws.path("missing.apk"));
    assert!(matches!(run(&opts, &ws.config(), &tools), Err(Error::Input(_))));
    assert!(log.borrow().is_empty());
}
