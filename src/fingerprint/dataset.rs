//! Fingerprint dataset loaders
//!
//! Two XML layouts are understood:
//!
//! ```xml
//! <favicons>
//!   <favicon>
//!     <md5>0c4ae6f1fbd8e1a5a5d8d3d2b5b8a9e0</md5>
//!     <name>Jenkins</name>
//!     <properties><property name="vendor">CloudBees</property></properties>
//!   </favicon>
//! </favicons>
//! ```
//!
//! and the Rapid7 recog `http_favicon.xml` layout, where each
//! `<fingerprint pattern="^(?:hash|hash)$">` lists its hashes inside a regex.

use super::{FingerprintIndex, FingerprintIndexBuilder, FingerprintRecord};
use crate::config::DatasetFormat;
use crate::error::ScanError;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

static MD5_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-fA-F]{32}").expect("static md5 token pattern"));

#[derive(Debug, Deserialize)]
struct FaviconsDoc {
    #[serde(rename = "favicon", default)]
    favicons: Vec<FaviconEntry>,
}

#[derive(Debug, Deserialize)]
struct FaviconEntry {
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: Option<PropertyList>,
}

#[derive(Debug, Deserialize)]
struct PropertyList {
    #[serde(rename = "property", default)]
    items: Vec<PropertyEntry>,
}

#[derive(Debug, Deserialize)]
struct PropertyEntry {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecogDoc {
    #[serde(rename = "fingerprint", default)]
    fingerprints: Vec<RecogFingerprint>,
}

#[derive(Debug, Deserialize)]
struct RecogFingerprint {
    #[serde(rename = "@pattern", default)]
    pattern: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "param", default)]
    params: Vec<RecogParam>,
}

#[derive(Debug, Deserialize)]
struct RecogParam {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@value", default)]
    value: Option<String>,
}

fn record_name(raw: Option<String>) -> String {
    raw.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Load a dataset file into an index
pub fn load_dataset<P: AsRef<Path>>(
    path: P,
    format: DatasetFormat,
) -> crate::Result<FingerprintIndex> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScanError::Dataset(format!(
            "Fingerprint dataset not found: {}",
            path.display()
        )));
    }

    let xml = fs::read_to_string(path)?;
    let index = parse_dataset(&xml, format)?;

    log::info!(
        "Loaded {} fingerprint hashes ({} entries) from {}",
        index.len(),
        index.entry_count(),
        path.display()
    );
    Ok(index)
}

/// Parse dataset XML already held in memory
pub fn parse_dataset(xml: &str, format: DatasetFormat) -> crate::Result<FingerprintIndex> {
    let layout = match format {
        DatasetFormat::Auto => detect_layout(xml)?,
        DatasetFormat::Favicons => Layout::Favicons,
        DatasetFormat::Recog => Layout::Recog,
    };

    let mut builder = FingerprintIndex::builder();
    match layout {
        Layout::Favicons => parse_favicons(xml, &mut builder)?,
        Layout::Recog => parse_recog(xml, &mut builder)?,
    }

    Ok(builder.build())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Favicons,
    Recog,
}

/// Pick the layout from the document's root element
fn detect_layout(xml: &str) -> crate::Result<Layout> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return match e.name().as_ref() {
                    b"favicons" => Ok(Layout::Favicons),
                    b"fingerprints" => Ok(Layout::Recog),
                    other => Err(ScanError::Dataset(format!(
                        "Unrecognised dataset root element <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => {
                return Err(ScanError::Dataset("Dataset document is empty".to_string()));
            }
            Err(e) => return Err(ScanError::Dataset(e.to_string())),
            Ok(_) => {}
        }
    }
}

fn parse_favicons(xml: &str, builder: &mut FingerprintIndexBuilder) -> crate::Result<()> {
    let doc: FaviconsDoc = quick_xml::de::from_str(xml)?;

    for entry in doc.favicons {
        let md5 = match entry.md5.as_deref().map(str::trim) {
            Some(md5) if !md5.is_empty() => md5.to_string(),
            _ => continue,
        };

        let mut record = FingerprintRecord::new(record_name(entry.name));
        for property in entry.properties.map(|p| p.items).unwrap_or_default() {
            if let Some(key) = property.name.filter(|k| !k.is_empty()) {
                record
                    .properties
                    .insert(key, property.value.unwrap_or_default().trim().to_string());
            }
        }

        builder.insert(&md5, record);
    }

    Ok(())
}

fn parse_recog(xml: &str, builder: &mut FingerprintIndexBuilder) -> crate::Result<()> {
    let doc: RecogDoc = quick_xml::de::from_str(xml)?;

    for fingerprint in doc.fingerprints {
        let hashes: Vec<&str> = MD5_TOKEN
            .find_iter(&fingerprint.pattern)
            .map(|m| m.as_str())
            .collect();
        if hashes.is_empty() {
            continue;
        }

        let mut record = FingerprintRecord::new(record_name(fingerprint.description));
        for param in fingerprint.params {
            if let (Some(key), Some(value)) = (param.name, param.value) {
                if !key.is_empty() {
                    record.properties.insert(key, value);
                }
            }
        }

        for hash in hashes {
            builder.insert(hash, record.clone());
        }
    }

    Ok(())
}
