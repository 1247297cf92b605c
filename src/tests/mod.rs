mod pipeline_flow;

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::Config;
use crate::error::Result;
use crate::tools::{
    ManifestEditor, NativeBuilder, PackageDecompiler, PackageRecompiler, SignOutcome, Signer, Toolchain,
    Translator,
};
use crate::types::MethodIdentity;

pub(crate) const ANDROID_MK: &str = "LOCAL_PATH := $(call my-dir)\ninclude $(CLEAR_VARS)\nLOCAL_MODULE    := stub\nLOCAL_SRC_FILES := $(wildcard $(LOCAL_PATH)/nc/*.cpp)\ninclude $(BUILD_SHARED_LIBRARY)\n";

pub(crate) const APPLICATION_MK: &str = "APP_STL := c++_static\nAPP_ABI := armeabi-v7a arm64-v8a x86 x86_64\nAPP_PLATFORM := android-21\n";

pub(crate) const BOOTSTRAP: &str = "static jclass loader;\nvoid init(JNIEnv *env) {\n    loader = env->FindClass(\"amimo/dcc/DccApplication\");\n}\nextern \"C\" JNIEXPORT void JNICALL Java_amimo_dcc_DccApplication_initDcc(JNIEnv *env, jclass) { init(env); }\n";

pub(crate) const LOADER_TEMPLATE: &str = ".class public Lamimo/dcc/DccApplication;
.super Landroid/app/Application;

.method static initDcc()V
    .locals 1
    const-string v0, \"nc\"
    invoke-static {v0}, Ljava/lang/System;->loadLibrary(Ljava/lang/String;)V
    return-void
.end method
";

pub(crate) const FOO: &str = ".class public Lcom/example/Foo;
.super Ljava/lang/Object;

.method public constructor <init>()V
    .locals 0
    invoke-direct {p0}, Ljava/lang/Object;-><init>()V
    return-void
.end method

.method public bar(I)V
    .locals 2
    .annotation runtime Lamimo/dcc/Dex2C;
    .end annotation
    const/4 v0, 0x1
    add-int/2addr v0, p1
    return-void
.end method

.method public baz()I
    .locals 1
    const/4 v0, 0x0
    return v0
.end method
";

pub(crate) const APP: &str = ".class public Lcom/example/App;
.super Landroid/app/Application;

.method static constructor <clinit>()V
    .locals 2
    const/4 v0, 0x0
    sput v0, Lcom/example/App;->count:I
    return-void
.end method
";

pub(crate) const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example">
    <application android:name=".App"/>
</manifest>
"#;

/// A template project, loader template and rule file laid out under one directory.
pub(crate) struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new(filter: &str) -> Workspace {
        let dir = tempfile::tempdir().unwrap();
        let jni = dir.path().join("project/jni");
        fs::create_dir_all(jni.join("nc")).unwrap();
        fs::write(jni.join("Android.mk"), ANDROID_MK).unwrap();
        fs::write(jni.join("Application.mk"), APPLICATION_MK).unwrap();
        fs::write(jni.join("nc/Dex2C.cpp"), BOOTSTRAP).unwrap();
        fs::create_dir_all(dir.path().join("loader")).unwrap();
        fs::write(dir.path().join("loader/DccApplication.smali"), LOADER_TEMPLATE).unwrap();
        fs::write(dir.path().join("filter.txt"), filter).unwrap();
        Workspace { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn config(&self) -> Config {
        Config {
            project_template: self.path("project"),
            loader_template: self.path("loader/DccApplication.smali"),
            ..Config::default()
        }
    }
}

/// Writes a decompiled tree: listings, native libraries and a text manifest.
pub(crate) fn write_decompiled_tree(dir: &Path, abis: &[&str]) {
    let pkg = dir.join("smali/com/example");
    fs::create_dir_all(&pkg).unwrap();
    fs::write(pkg.join("Foo.smali"), FOO).unwrap();
    fs::write(pkg.join("App.smali"), APP).unwrap();
    fs::create_dir_all(dir.join("smali_classes2/com/other")).unwrap();
    fs::write(
        dir.join("smali_classes2/com/other/Util.smali"),
        ".class public Lcom/other/Util;\n.super Ljava/lang/Object;\n\n.method public static helper()V\n    .locals 0\n    return-void\n.end method\n\n.method public static broken()V\n    .locals 0\n    return-void\n.end method\n",
    )
    .unwrap();
    for abi in abis {
        fs::create_dir_all(dir.join("lib").join(abi)).unwrap();
        fs::write(dir.join("lib").join(abi).join("libfoo.so"), "foo").unwrap();
    }
    fs::write(dir.join("AndroidManifest.xml"), MANIFEST).unwrap();
}

pub(crate) type CallLog = Rc<RefCell<Vec<String>>>;

pub(crate) struct FakeTranslator;

impl Translator for FakeTranslator {
    fn translate(&self, _input: &Path, method: &MethodIdentity) -> std::result::Result<String, String> {
        if method.name == "broken" {
            return Err("unsupported instruction".to_string());
        }
        Ok(format!("// native body of {}\n", method))
    }
}

pub(crate) struct FakeDecompiler {
    pub log: CallLog,
    pub abis: Vec<&'static str>,
}

impl PackageDecompiler for FakeDecompiler {
    fn decompile(&self, _package: &Path, out_dir: &Path) -> Result<()> {
        self.log.borrow_mut().push("decompile".to_string());
        write_decompiled_tree(out_dir, &self.abis);
        Ok(())
    }
}

/// Packs the decompiled tree as the "rebuilt" package so tests can inspect it.
pub(crate) struct FakeRecompiler {
    pub log: CallLog,
}

impl PackageRecompiler for FakeRecompiler {
    fn recompile(&self, decompiled_dir: &Path, package: &Path) -> Result<()> {
        self.log.borrow_mut().push("recompile".to_string());
        crate::android::zip::archive_directory(decompiled_dir, package)
    }
}

pub(crate) struct FakeSigner {
    pub log: CallLog,
}

impl Signer for FakeSigner {
    fn sign(&self, unsigned: &Path, signed: &Path) -> Result<SignOutcome> {
        self.log.borrow_mut().push("sign".to_string());
        fs::copy(unsigned, signed).unwrap();
        Ok(SignOutcome::Signed)
    }
}

pub(crate) struct FakeManifestEditor {
    pub log: CallLog,
}

impl ManifestEditor for FakeManifestEditor {
    fn set_application(&self, _manifest: &Path, loader: &str) -> Result<()> {
        self.log.borrow_mut().push(format!("manifest {}", loader));
        Ok(())
    }
}

/// Pretends to run ndk-build: one library per ABI of the project's Application.mk.
pub(crate) struct FakeBuilder {
    pub log: CallLog,
}

impl NativeBuilder for FakeBuilder {
    fn build(&self, project_dir: &Path, jobs: usize) -> Result<()> {
        self.log.borrow_mut().push(format!("build -j{}", jobs));
        let mk = fs::read_to_string(project_dir.join("jni/Application.mk")).unwrap();
        let abis = mk
            .lines()
            .find_map(|l| l.strip_prefix("APP_ABI := "))
            .unwrap_or("")
            .to_string();
        for abi in abis.split_whitespace() {
            let dir = project_dir.join("libs").join(abi);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("libstub.so"), format!("stub for {}", abi)).unwrap();
        }
        Ok(())
    }
}

pub(crate) fn fake_toolchain(log: &CallLog, abis: &[&'static str]) -> Toolchain {
    Toolchain {
        translator: Box::new(FakeTranslator),
        decompiler: Box::new(FakeDecompiler {
            log: log.clone(),
            abis: abis.to_vec(),
        }),
        recompiler: Box::new(FakeRecompiler { log: log.clone() }),
        signer: Box::new(FakeSigner { log: log.clone() }),
        manifest_editor: Box::new(FakeManifestEditor { log: log.clone() }),
        builder: Box::new(FakeBuilder { log: log.clone() }),
    }
}
