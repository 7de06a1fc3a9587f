use super::{output_format, render};
use anyhow::{Context, Result};
use confwire::CancellationToken;
use std::io::Write;
use tracing::{info, warn};

/// Follow `uri`, writing one line per valid event until `cancel` fires or
/// the subscription ends.
pub async fn execute(
    uri: &str,
    raw: bool,
    cancel: CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let format = output_format(uri, raw)?;
    let reader = confwire::open(uri).with_context(|| format!("Cannot open {}", uri))?;
    let mut events = reader
        .subscribe(cancel.clone())
        .await
        .with_context(|| format!("Failed to watch {}", uri))?;
    info!("Watching {}", uri);

    while let Some(event) = events.recv().await {
        if !event.is_valid() {
            match &event.error {
                Some(err) => warn!("Update from {} failed: {}", event.source_uri, err),
                None => warn!("Update from {} carried no data", event.source_uri),
            }
            continue;
        }
        match render(&event.data, format, false) {
            Ok(line) => {
                writeln!(out, "{} {}", event.timestamp.to_rfc3339(), line.trim_end())?;
                out.flush()?;
            }
            Err(e) => warn!("Update from {} rejected: {:#}", event.source_uri, e),
        }
    }

    reader.close().await?;
    if !cancel.is_cancelled() {
        warn!("Subscription to {} ended", uri);
    }
    Ok(())
}
