pub mod get;
pub mod watch;

use anyhow::{Context, Result};
use confwire::{decode, Format};

/// Render a payload for display.
///
/// Raw payloads are shown as text. Otherwise the payload is decoded in
/// `format` and shown as JSON, pretty-printed when `pretty` is set.
pub fn render(payload: &[u8], format: Option<Format>, pretty: bool) -> Result<String> {
    let Some(format) = format else {
        return Ok(String::from_utf8_lossy(payload).into_owned());
    };
    let tree = decode(format, payload).context("Failed to decode payload")?;
    let rendered = if pretty {
        serde_json::to_string_pretty(&tree)?
    } else {
        serde_json::to_string(&tree)?
    };
    Ok(rendered)
}

/// Format to decode with, or `None` for raw output.
pub fn output_format(uri: &str, raw: bool) -> Result<Option<Format>> {
    if raw {
        return Ok(None);
    }
    let format = Format::detect(uri).context("Use --raw to print the payload undecoded")?;
    Ok(Some(format))
}
