use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// JSON for a `.json` extension, YAML for everything else.
    pub fn for_path(path: &Path) -> Self {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            DocumentFormat::Json
        } else {
            DocumentFormat::Yaml
        }
    }
}

pub fn load_from_path<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Opening document {path:?}"))?;
    let mut reader = BufReader::new(file);
    match DocumentFormat::for_path(path) {
        DocumentFormat::Json => {
            serde_json::from_reader(reader).with_context(|| format!("Parsing JSON {path:?}"))
        }
        DocumentFormat::Yaml => {
            let mut raw = String::new();
            reader.read_to_string(&mut raw)?;
            serde_yaml::from_str(&raw).with_context(|| format!("Parsing YAML {path:?}"))
        }
    }
}

pub fn save_to_path<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating document {path:?}"))?;
    let mut writer = BufWriter::new(file);
    match DocumentFormat::for_path(path) {
        DocumentFormat::Json => serde_json::to_writer_pretty(&mut writer, data)
            .with_context(|| format!("Writing JSON {path:?}"))?,
        DocumentFormat::Yaml => {
            let serialized = serde_yaml::to_string(data)?;
            writer.write_all(serialized.as_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}
