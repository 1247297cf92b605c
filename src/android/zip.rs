use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path};
use walkdir::WalkDir;
use zip::read::ZipArchive;

use crate::error::{Error, IoContext, Result};

/// Read access to a package. Only entry names and individual entries are needed: the ABI
/// directories under `lib/` and the manifest.
pub struct PackageArchive {
    archive: ZipArchive<File>,
}

impl PackageArchive {
    pub fn open(path: &Path) -> Result<PackageArchive> {
        let file = File::open(path).at(path)?;
        Ok(PackageArchive {
            archive: ZipArchive::new(file)?,
        })
    }

    /// Names of the file entries, directories excluded.
    pub fn entry_names(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter(|n| !n.ends_with('/'))
            .map(str::to_string)
            .collect()
    }

    /// Reads a whole entry, `None` when the package has no such entry.
    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::Archive(e.into()))?;
        Ok(Some(data))
    }
}

/// Deterministic ZIP writer: entries are sorted, timestamps zeroed and every file deflated,
/// so archiving the same tree twice yields identical bytes.
#[derive(Default)]
pub struct ArchiveWriter {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        ArchiveWriter::default()
    }

    /// Snapshot every regular file below `dir`.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            fail!(Input, "{} is not a directory", dir.display());
        }
        let mut writer = ArchiveWriter::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io {
                path: e.path().unwrap_or(dir).to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| Error::Input(format!("{} is not under {}", entry.path().display(), dir.display())))?;
            let data = fs::read(entry.path()).at(entry.path())?;
            writer.add(&path_to_entry_name(rel)?, data);
        }
        Ok(writer)
    }

    pub fn add(&mut self, name: &str, data: Vec<u8>) {
        self.entries.insert(name.to_string(), data);
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).at(parent)?;
            }
        }
        let bytes = self.to_bytes().at(path)?;
        fs::write(path, bytes).at(path)
    }

    fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut central_records = Vec::new();

        for (name, data) in &self.entries {
            central_records.push(write_local_entry(&mut buffer, name, data)?);
        }
        let file_names: Vec<_> = self.entries.keys().cloned().collect();
        for dir in collect_directory_names(&file_names) {
            central_records.push(write_directory_entry(&mut buffer, &dir));
        }

        let central_start = buffer.len() as u32;
        for record in &central_records {
            write_central_directory_entry(&mut buffer, record);
        }
        let central_size = buffer.len() as u32 - central_start;
        write_end_of_central_directory(&mut buffer, central_records.len(), central_size, central_start);
        Ok(buffer)
    }
}

/// Archives a directory tree into `archive`.
pub fn archive_directory(dir: &Path, archive: &Path) -> Result<()> {
    ArchiveWriter::from_directory(dir)?.write_to_file(archive)
}

struct CentralDirectoryRecord {
    file_name: Vec<u8>,
    method: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    local_header_offset: u32,
    external_attrs: u32,
    is_directory: bool,
}

fn write_local_entry(buf: &mut Vec<u8>, name: &str, data: &[u8]) -> std::io::Result<CentralDirectoryRecord> {
    let offset = buf.len() as u32;
    let compressed = deflate_bytes(data)?;

    let mut crc = Crc32::new();
    crc.update(data);
    let crc32 = crc.finalize();

    write_u32(buf, 0x04034b50);
    write_u16(buf, 20);
    write_u16(buf, 0);
    write_u16(buf, 8);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u32(buf, crc32);
    write_u32(buf, compressed.len() as u32);
    write_u32(buf, data.len() as u32);
    write_u16(buf, name.len() as u16);
    write_u16(buf, 0);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&compressed);

    Ok(CentralDirectoryRecord {
        file_name: name.as_bytes().to_vec(),
        method: 8,
        crc32,
        compressed_size: compressed.len() as u32,
        uncompressed_size: data.len() as u32,
        local_header_offset: offset,
        external_attrs: 0o644 << 16,
        is_directory: false,
    })
}

fn write_directory_entry(buf: &mut Vec<u8>, name: &str) -> CentralDirectoryRecord {
    let offset = buf.len() as u32;
    write_u32(buf, 0x04034b50);
    write_u16(buf, 10);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u32(buf, 0);
    write_u32(buf, 0);
    write_u32(buf, 0);
    write_u16(buf, name.len() as u16);
    write_u16(buf, 0);
    buf.extend_from_slice(name.as_bytes());

    CentralDirectoryRecord {
        file_name: name.as_bytes().to_vec(),
        method: 0,
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        local_header_offset: offset,
        external_attrs: (0o755u32 << 16) | 0x10,
        is_directory: true,
    }
}

fn write_central_directory_entry(buf: &mut Vec<u8>, record: &CentralDirectoryRecord) {
    write_u32(buf, 0x02014b50);
    write_u16(buf, 0x031E);
    write_u16(buf, 20);
    write_u16(buf, 0);
    write_u16(buf, record.method);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u32(buf, record.crc32);
    write_u32(buf, record.compressed_size);
    write_u32(buf, record.uncompressed_size);
    write_u16(buf, record.file_name.len() as u16);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u16(buf, if record.is_directory { 0x10 } else { 0 });
    write_u32(buf, record.external_attrs);
    write_u32(buf, record.local_header_offset);
    buf.extend_from_slice(&record.file_name);
}

fn write_end_of_central_directory(buf: &mut Vec<u8>, entry_count: usize, central_size: u32, central_offset: u32) {
    write_u32(buf, 0x06054b50);
    write_u16(buf, 0);
    write_u16(buf, 0);
    write_u16(buf, entry_count as u16);
    write_u16(buf, entry_count as u16);
    write_u32(buf, central_size);
    write_u32(buf, central_offset);
    write_u16(buf, 0);
}

fn deflate_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn path_to_entry_name(path: &Path) -> Result<String> {
    let mut components = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => components.push(part.to_string_lossy().replace('\\', "/")),
            Component::CurDir => {}
            _ => fail!(Input, "invalid archive entry path {}", path.display()),
        }
    }
    if components.is_empty() {
        fail!(Input, "archive entry name must not be empty");
    }
    Ok(components.join("/"))
}

fn collect_directory_names(file_names: &[String]) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for name in file_names {
        let mut prefix = String::new();
        let parts: Vec<_> = name.split('/').collect();
        for part in &parts[..parts.len() - 1] {
            prefix.push_str(part);
            prefix.push('/');
            dirs.insert(prefix.clone());
        }
    }
    dirs.into_iter().collect()
}

fn write_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}
