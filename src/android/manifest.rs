//! Just enough of `AndroidManifest.xml` to find the package name and the declared
//! application class. Packages carry the manifest as binary AXML, decompiled trees as text.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;

const NO_ENTRY_INDEX: u32 = 0xFFFF_FFFF;
const STRING_FLAG_UTF8: u32 = 0x0000_0100;
const TYPE_STRING: u8 = 0x03;

const ANDROID_NAMESPACE_URI: &str = "http://schemas.android.com/apk/res/android";

/// The manifest entry name inside a package.
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestInfo {
    pub package: Option<String>,
    /// `android:name` of `<application>` as written, possibly relative (`.App`)
    pub application: Option<String>,
}

impl ManifestInfo {
    /// Decodes either encoding, picking binary when the document starts with an XML chunk.
    pub fn from_bytes(bytes: &[u8]) -> Result<ManifestInfo> {
        if bytes.len() >= 2 && u16::from_le_bytes([bytes[0], bytes[1]]) == RES_XML_TYPE {
            return ManifestInfo::from_binary(bytes);
        }
        let text = std::str::from_utf8(bytes).map_err(|e| Error::Manifest(e.to_string()))?;
        ManifestInfo::from_text(text)
    }

    /// The fully qualified application class name, relative names resolved against the package.
    pub fn application_class(&self) -> Option<String> {
        let name = self.application.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        match self.package.as_deref() {
            Some(package) if name.starts_with('.') => Some(format!("{}{}", package, name)),
            Some(package) if !name.contains('.') => Some(format!("{}.{}", package, name)),
            _ => Some(name.to_string()),
        }
    }

    pub fn from_text(xml: &str) -> Result<ManifestInfo> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut info = ManifestInfo::default();

        loop {
            match reader.read_event().map_err(|e| Error::Manifest(e.to_string()))? {
                Event::Start(start) | Event::Empty(start) => match start.name().as_ref() {
                    b"manifest" => info.package = text_attribute(&start, b"package")?,
                    b"application" => info.application = text_attribute(&start, b"android:name")?,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(info)
    }

    pub fn from_binary(bytes: &[u8]) -> Result<ManifestInfo> {
        let mut reader = BinaryReader::new(bytes);
        let xml_header = read_chunk_header(&mut reader)?;
        if xml_header.chunk_type != RES_XML_TYPE {
            return Err(malformed("binary XML does not start with RES_XML_TYPE header"));
        }
        reader.seek(xml_header.start + xml_header.header_size as usize)?;

        let mut info = ManifestInfo::default();
        let mut pool: Option<StringPool> = None;

        while reader.position() < xml_header.end() {
            let chunk = read_chunk_header(&mut reader)?;
            match chunk.chunk_type {
                RES_STRING_POOL_TYPE => pool = Some(StringPool::parse(&mut reader, &chunk)?),
                RES_XML_START_ELEMENT_TYPE => {
                    let pool = pool
                        .as_ref()
                        .ok_or_else(|| malformed("start element encountered before string pool"))?;
                    let element = read_start_element(&mut reader, pool)?;
                    match element.name.as_str() {
                        "manifest" => info.package = element.attribute(None, "package"),
                        "application" => {
                            info.application = element.attribute(Some(ANDROID_NAMESPACE_URI), "name")
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            reader.seek(chunk.end())?;
        }
        Ok(info)
    }
}

fn text_attribute(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Manifest(e.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr.unescape_value().map_err(|e| Error::Manifest(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn malformed(msg: &str) -> Error {
    Error::Manifest(msg.to_string())
}

struct ChunkHeader {
    chunk_type: u16,
    header_size: u16,
    chunk_size: u32,
    start: usize,
}

impl ChunkHeader {
    fn end(&self) -> usize {
        self.start + self.chunk_size as usize
    }
}

struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BinaryReader { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or_else(|| malformed("unexpected end of binary XML"))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(malformed("attempted to seek past end of document"));
        }
        self.pos = offset;
        Ok(())
    }
}

fn read_chunk_header(reader: &mut BinaryReader<'_>) -> Result<ChunkHeader> {
    let start = reader.position();
    let chunk_type = reader.read_u16()?;
    let header_size = reader.read_u16()?;
    let chunk_size = reader.read_u32()?;
    if chunk_size < header_size as u32 || (chunk_size as usize) < 8 {
        return Err(malformed("invalid chunk sizing in binary XML"));
    }
    if start + chunk_size as usize > reader.data.len() {
        return Err(malformed("chunk extends past end of document"));
    }
    Ok(ChunkHeader {
        chunk_type,
        header_size,
        chunk_size,
        start,
    })
}

struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(reader: &mut BinaryReader<'_>, header: &ChunkHeader) -> Result<Self> {
        let string_count = reader.read_u32()? as usize;
        let _style_count = reader.read_u32()?;
        let flags = reader.read_u32()?;
        let strings_start = reader.read_u32()? as usize;
        let _styles_start = reader.read_u32()?;
        reader.seek(header.start + header.header_size as usize)?;

        let is_utf8 = (flags & STRING_FLAG_UTF8) != 0;
        let strings_base = header.start + strings_start;
        let limit = header.end();

        let mut strings = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            let offset = strings_base + reader.read_u32()? as usize;
            let text = if is_utf8 {
                read_utf8_string(reader.data, offset, limit)?
            } else {
                read_utf16_string(reader.data, offset, limit)?
            };
            strings.push(text);
        }
        Ok(StringPool { strings })
    }

    fn get(&self, idx: u32) -> Option<&str> {
        if idx == NO_ENTRY_INDEX {
            return None;
        }
        self.strings.get(idx as usize).map(String::as_str)
    }
}

fn read_utf8_length(data: &[u8], offset: usize) -> Option<(usize, usize)> {
    let first = *data.get(offset)?;
    if first & 0x80 == 0 {
        Some((first as usize, 1))
    } else {
        let second = *data.get(offset + 1)?;
        Some(((((first & 0x7F) as usize) << 8) | second as usize, 2))
    }
}

fn read_utf8_string(data: &[u8], offset: usize, limit: usize) -> Result<String> {
    let truncated = || malformed("UTF-8 string exceeds chunk bounds");
    let (_chars, n) = read_utf8_length(data, offset).ok_or_else(truncated)?;
    let (byte_len, m) = read_utf8_length(data, offset + n).ok_or_else(truncated)?;
    let start = offset + n + m;
    if start + byte_len > limit {
        return Err(truncated());
    }
    std::str::from_utf8(&data[start..start + byte_len])
        .map(str::to_string)
        .map_err(|e| Error::Manifest(e.to_string()))
}

fn read_utf16_string(data: &[u8], offset: usize, limit: usize) -> Result<String> {
    let truncated = || malformed("UTF-16 string exceeds chunk bounds");
    let unit = |at: usize| -> Option<u16> { Some(u16::from_le_bytes([*data.get(at)?, *data.get(at + 1)?])) };

    let first = unit(offset).ok_or_else(truncated)?;
    let (count, header) = if first & 0x8000 == 0 {
        (first as usize, 2)
    } else {
        let second = unit(offset + 2).ok_or_else(truncated)?;
        ((((first & 0x7FFF) as usize) << 16) | second as usize, 4)
    };
    let start = offset + header;
    if start + count * 2 > limit {
        return Err(truncated());
    }
    let units: Vec<u16> = data[start..start + count * 2]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| Error::Manifest(e.to_string()))
}

struct StartElement {
    name: String,
    /// (namespace uri, name, string value)
    attributes: Vec<(Option<String>, String, Option<String>)>,
}

impl StartElement {
    fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(ns, n, _)| n == name && (namespace.is_none() || ns.as_deref() == namespace))
            .and_then(|(_, _, v)| v.clone())
    }
}

fn read_start_element(reader: &mut BinaryReader<'_>, pool: &StringPool) -> Result<StartElement> {
    reader.read_u32()?; // line number
    reader.read_u32()?; // comment index
    reader.read_u32()?; // namespace
    let name_idx = reader.read_u32()?;
    let ext_start = reader.position();
    let attribute_start = reader.read_u16()? as usize;
    let attribute_size = reader.read_u16()? as usize;
    let attr_count = reader.read_u16()? as usize;

    let name = pool
        .get(name_idx)
        .ok_or_else(|| malformed("element references invalid string index"))?
        .to_string();

    let mut attributes = Vec::with_capacity(attr_count);
    for i in 0..attr_count {
        reader.seek(ext_start - 8 + attribute_start + i * attribute_size)?;
        let ns_idx = reader.read_u32()?;
        let name_idx = reader.read_u32()?;
        let raw_value_idx = reader.read_u32()?;
        reader.read_u16()?; // value size
        reader.read_u8()?; // res0
        let data_type = reader.read_u8()?;
        let data = reader.read_u32()?;

        let attr_name = pool
            .get(name_idx)
            .ok_or_else(|| malformed("attribute name references invalid string index"))?
            .to_string();
        let value = match pool.get(raw_value_idx) {
            Some(raw) => Some(raw.to_string()),
            None if data_type == TYPE_STRING => pool.get(data).map(str::to_string),
            None => None,
        };
        attributes.push((pool.get(ns_idx).map(str::to_string), attr_name, value));
    }
    Ok(StartElement { name, attributes })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Encodes a minimal binary manifest with a `<manifest package>` and an
    /// `<application android:name>` element.
    pub(crate) fn binary_manifest(package: &str, application: Option<&str>) -> Vec<u8> {
        let mut strings = vec![
            "manifest".to_string(),
            "package".to_string(),
            package.to_string(),
            "application".to_string(),
            "name".to_string(),
            ANDROID_NAMESPACE_URI.to_string(),
        ];
        if let Some(app) = application {
            strings.push(app.to_string());
        }

        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for s in &strings {
            offsets.push(data.len() as u32);
            let units: Vec<u16> = s.encode_utf16().collect();
            push_u16(&mut data, units.len() as u16);
            for u in units {
                push_u16(&mut data, u);
            }
            push_u16(&mut data, 0);
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }
        let mut pool = Vec::new();
        push_u16(&mut pool, RES_STRING_POOL_TYPE);
        push_u16(&mut pool, 28);
        push_u32(&mut pool, (28 + offsets.len() * 4 + data.len()) as u32);
        push_u32(&mut pool, offsets.len() as u32);
        push_u32(&mut pool, 0);
        push_u32(&mut pool, 0);
        push_u32(&mut pool, (28 + offsets.len() * 4) as u32);
        push_u32(&mut pool, 0);
        for o in offsets {
            push_u32(&mut pool, o);
        }
        pool.extend_from_slice(&data);

        let element = |name: u32, attrs: &[(u32, u32, u32)]| {
            let mut chunk = Vec::new();
            push_u16(&mut chunk, RES_XML_START_ELEMENT_TYPE);
            push_u16(&mut chunk, 16);
            push_u32(&mut chunk, (36 + attrs.len() * 20) as u32);
            push_u32(&mut chunk, 1);
            push_u32(&mut chunk, NO_ENTRY_INDEX);
            push_u32(&mut chunk, NO_ENTRY_INDEX);
            push_u32(&mut chunk, name);
            push_u16(&mut chunk, 20);
            push_u16(&mut chunk, 20);
            push_u16(&mut chunk, attrs.len() as u16);
            push_u16(&mut chunk, 0);
            push_u16(&mut chunk, 0);
            push_u16(&mut chunk, 0);
            for (ns, attr, value) in attrs {
                push_u32(&mut chunk, *ns);
                push_u32(&mut chunk, *attr);
                push_u32(&mut chunk, *value);
                push_u16(&mut chunk, 8);
                chunk.push(0);
                chunk.push(TYPE_STRING);
                push_u32(&mut chunk, *value);
            }
            chunk
        };

        let mut body = pool;
        body.extend(element(0, &[(NO_ENTRY_INDEX, 1, 2)]));
        match application {
            Some(_) => body.extend(element(3, &[(5, 4, 6)])),
            None => body.extend(element(3, &[])),
        }

        let mut doc = Vec::new();
        push_u16(&mut doc, RES_XML_TYPE);
        push_u16(&mut doc, 8);
        push_u32(&mut doc, (8 + body.len()) as u32);
        doc.extend(body);
        doc
    }

    #[test]
    fn reads_binary_manifest() {
        let bytes = binary_manifest("com.example", Some(".App"));
        let info = ManifestInfo::from_bytes(&bytes).unwrap();
        assert_eq!(info.package.as_deref(), Some("com.example"));
        assert_eq!(info.application.as_deref(), Some(".App"));
        assert_eq!(info.application_class().as_deref(), Some("com.example.App"));

        let info = ManifestInfo::from_bytes(&binary_manifest("com.example", None)).unwrap();
        assert!(info.application_class().is_none());
    }

    #[test]
    fn reads_text_manifest() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example">
    <uses-permission android:name="android.permission.INTERNET"/>
    <application android:label="x" android:name="com.other.MyApp">
        <activity android:name=".Main"/>
    </application>
</manifest>"#;
        let info = ManifestInfo::from_bytes(xml.as_bytes()).unwrap();
        assert_eq!(info.package.as_deref(), Some("com.example"));
        assert_eq!(info.application_class().as_deref(), Some("com.other.MyApp"));
    }

    #[test]
    fn bare_names_resolve_against_package() {
        let info = ManifestInfo {
            package: Some("com.example".to_string()),
            application: Some("App".to_string()),
        };
        assert_eq!(info.application_class().as_deref(), Some("com.example.App"));
    }

    #[test]
    fn truncated_binary_is_an_error() {
        let bytes = binary_manifest("com.example", Some(".App"));
        assert!(ManifestInfo::from_bytes(&bytes[..bytes.len() - 10]).is_err());
    }
}
