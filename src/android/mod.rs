//! Package level helpers: the ZIP container and the manifest.

pub mod manifest;
pub mod zip;
