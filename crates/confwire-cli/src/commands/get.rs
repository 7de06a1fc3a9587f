use super::{output_format, render};
use anyhow::{Context, Result};
use confwire::CancellationToken;
use std::io::Write;
use tracing::debug;

/// Read `uri` once and write the payload to `out`.
pub async fn execute(uri: &str, raw: bool, out: &mut impl Write) -> Result<()> {
    let format = output_format(uri, raw)?;
    let reader = confwire::open(uri).with_context(|| format!("Cannot open {}", uri))?;

    let outcome = reader.read(&CancellationToken::new()).await;
    reader.close().await?;
    let payload = outcome.with_context(|| format!("Failed to read {}", uri))?;
    debug!("Read {} bytes from {}", payload.len(), uri);

    let rendered = render(&payload, format, true)?;
    out.write_all(rendered.as_bytes())?;
    if !rendered.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}
