//! Interactive control over stdin.
//!
//! ```text
//! capture            take a photo now
//! endpoint <url>     switch controller
//! status             show sensor state and last photo
//! quit               stop the agent
//! ```

use std::fmt;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use shutter_core::{Endpoint, OrchestratorHandle, ShutterError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Capture,
    Endpoint(Endpoint),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();
        if words.next().is_some() {
            return Err(ParseError(format!("too many arguments for {verb}")));
        }

        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("capture" | "photo", None) => Self::Capture,
            ("status", None) => Self::Status,
            ("quit" | "exit", None) => Self::Quit,
            ("endpoint", Some(url)) => {
                Self::Endpoint(Endpoint::parse(url).map_err(|e| ParseError(e.to_string()))?)
            }
            ("endpoint", None) => return Err(ParseError("usage: endpoint <url>".into())),
            (other, _) => return Err(ParseError(format!("unknown command {other:?}"))),
        };
        Ok(Some(command))
    }
}

/// Read commands from stdin until `quit` or end of input.
///
/// `quit` shuts the orchestrator down; end of input only stops reading.
pub async fn run(handle: OrchestratorHandle) -> Result<(), ShutterError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match ConsoleCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Capture)) => handle.capture_now().await?,
            Ok(Some(ConsoleCommand::Endpoint(endpoint))) => {
                handle.update_endpoint(endpoint.clone()).await?;
                info!("switching to {endpoint}");
            }
            Ok(Some(ConsoleCommand::Status)) => {
                let state = *handle.sensor_state().borrow();
                match handle.last_artifact().borrow().as_ref() {
                    Some(last) => info!(
                        "sensor {state}; last photo {}x{} ({} bytes{}) from {}",
                        last.width,
                        last.height,
                        last.payload_len,
                        if last.reencoded { ", re-encoded" } else { "" },
                        last.source_uri
                    ),
                    None => info!("sensor {state}; no photo sent yet"),
                }
            }
            Ok(Some(ConsoleCommand::Quit)) => {
                handle.shutdown().await?;
                break;
            }
            Err(e) => warn!("{e}"),
        }
    }
    Ok(())
}
