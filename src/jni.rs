//! JNI symbol names for compiled methods.
//!
//! Every compiled method is exported under its *long* JNI name, which encodes the parameter
//! descriptors so overloads get distinct symbols. The runtime also tries the *short* name
//! (class + method only), which is why same-named native methods must never coexist with a
//! compiled overload.

use std::fmt::Write;

use crate::types::{MethodIdentity, MethodSignature};

/// Upper bound on a generated symbol; longer names are rejected by toolchains in practice.
pub const MAX_SYMBOL_LEN: usize = 220;

/// Escapes a class, method or descriptor fragment following the JNI name mangling rules.
///
/// # Examples
///
/// ```
/// use smali_native::jni::mangle;
///
/// assert_eq!(mangle("com/example/My_Class"), "com_example_My_1Class");
/// assert_eq!(mangle("[Ljava/lang/String;"), "_3Ljava_lang_String_2");
/// ```
pub fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' => out.push(ch),
            '/' | '.' => out.push('_'),
            '_' => out.push_str("_1"),
            ';' => out.push_str("_2"),
            '[' => out.push_str("_3"),
            _ => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    let _ = write!(&mut out, "_0{:04x}", unit);
                }
            }
        }
    }
    out
}

/// `Java_<class>_<method>` for a class given in internal (slash separated) form.
pub fn short_name(internal_class: &str, method: &str) -> String {
    format!("Java_{}_{}", mangle(internal_class), mangle(method))
}

/// The overload-qualified symbol a compiled method is exported as, also used as the file stem of
/// its generated source unit.
pub fn long_name(identity: &MethodIdentity) -> String {
    let class = identity
        .owner
        .strip_prefix('L')
        .and_then(|o| o.strip_suffix(';'))
        .unwrap_or(&identity.owner);
    let params = match MethodSignature::from_jni(&identity.signature) {
        Some(signature) => signature.args_jni(),
        None => identity
            .parameters()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .to_string(),
    };
    format!("{}__{}", short_name(class, &identity.name), mangle(&params))
}
