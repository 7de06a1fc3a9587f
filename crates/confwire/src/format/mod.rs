//! Payload formats and decoding into a generic value tree.

use crate::error::LoadError;
use confwire_core::Scheme;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use url::Url;

mod ini;
mod xml;

/// Query parameter naming the payload's MIME type.
pub const CONTENT_TYPE_PARAM: &str = "content-type";

/// Serialization format of a configuration payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// JSON
    Json,
    /// YAML
    Yaml,
    /// TOML
    Toml,
    /// XML, every leaf a string
    Xml,
    /// INI, every value a string
    Ini,
}

impl Format {
    /// Format for a file extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            "xml" => Some(Format::Xml),
            "ini" | "cfg" | "conf" => Some(Format::Ini),
            _ => None,
        }
    }

    /// Format for a MIME type. Parameters such as `charset` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" | "text/json" => Some(Format::Json),
            "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => {
                Some(Format::Yaml)
            }
            "application/toml" | "text/toml" => Some(Format::Toml),
            "application/xml" | "text/xml" => Some(Format::Xml),
            "application/ini" | "text/ini" => Some(Format::Ini),
            _ => None,
        }
    }

    /// Detect the format of a source URI.
    ///
    /// The path extension wins; otherwise the `content-type` query parameter
    /// decides.
    pub fn detect(uri: &str) -> Result<Self, LoadError> {
        let unknown = |reason: String| LoadError::Format {
            uri: uri.to_string(),
            reason,
        };

        let scheme = Scheme::detect(uri)?;
        if scheme.is_local() {
            let path = Path::new(uri.trim());
            return match path.extension().and_then(|e| e.to_str()) {
                Some(ext) => Self::from_extension(ext)
                    .ok_or_else(|| unknown(format!("unsupported extension '.{}'", ext))),
                None => Err(unknown("local paths need a file extension".into())),
            };
        }

        let url = Url::parse(uri.trim()).map_err(|e| unknown(e.to_string()))?;
        let last_segment = url.path().rsplit('/').next().unwrap_or_default();
        if let Some(ext) = Path::new(last_segment).extension().and_then(|e| e.to_str()) {
            return Self::from_extension(ext)
                .ok_or_else(|| unknown(format!("unsupported extension '.{}'", ext)));
        }

        match url
            .query_pairs()
            .find(|(name, _)| name == CONTENT_TYPE_PARAM)
        {
            Some((_, mime)) => Self::from_mime(&mime)
                .ok_or_else(|| unknown(format!("unsupported content type '{}'", mime))),
            None => Err(unknown(
                "no file extension and no content-type parameter".into(),
            )),
        }
    }

    /// Lowercase name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
            Format::Xml => "xml",
            Format::Ini => "ini",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a payload into a generic value tree.
pub fn decode(format: Format, bytes: &[u8]) -> Result<Value, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    let failed = |reason: String| LoadError::Decode { format, reason };
    let text = || std::str::from_utf8(bytes).map_err(|e| failed(e.to_string()));

    match format {
        Format::Json => serde_json::from_slice(bytes).map_err(|e| failed(e.to_string())),
        Format::Yaml => serde_yaml::from_slice(bytes).map_err(|e| failed(e.to_string())),
        Format::Toml => toml::from_str(text()?).map_err(|e| failed(e.to_string())),
        Format::Xml => xml::decode(text()?).map_err(failed),
        Format::Ini => ini::decode(text()?).map_err(failed),
    }
}
