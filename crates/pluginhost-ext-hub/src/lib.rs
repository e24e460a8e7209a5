//! SignalR hub subscriber extension.
//!
//! A streaming extension: `execute` connects to a status hub, prints every
//! `StatusUpdate` it receives and returns once the operator enters `q`.
//! Everything async runs inside a runtime owned by that single call.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use pluginhost_sdk::prelude::*;
use tokio_util::sync::CancellationToken;

pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use session::{ConsoleSink, MessageLog, StdoutSink, SubscriptionSession};
pub use transport::{ConnectionState, HubClient, HubConnector, HubEvent, SignalRConnector};

/// Token that ends a monitoring session, compared case-insensitively.
pub const QUIT_TOKEN: &str = "q";

/// Subscribes to a SignalR status hub until the operator quits.
pub struct HubSubscriber;

impl Extension for HubSubscriber {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn is_streaming(&self) -> bool {
        Self::STREAMING
    }

    fn execute(&self, _input: &str) -> ExtensionResult<String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ExtensionError::ExecutionFailed(format!("failed to start runtime: {}", e)))?;

        let config = HubConfig::from_env();
        let connector = Arc::new(SignalRConnector::new(&config));

        let summary = runtime.block_on(async move {
            let mut session = SubscriptionSession::new(connector, config, Arc::new(StdoutSink));
            session.monitor(spawn_quit_listener).await
        });

        runtime.shutdown_timeout(Duration::from_secs(1));
        Ok(summary)
    }
}

impl ExtensionType for HubSubscriber {
    const NAME: &'static str = "SignalR Hub Subscriber";
    const VERSION: &'static str = "1.0.0";
    const STREAMING: bool = true;

    fn create() -> Self {
        HubSubscriber
    }
}

/// Cancel `token` when a quit line (or end of input) is read from stdin.
///
/// Runs on a plain thread because stdin reads block.
///
/// This module links its own copy of std, so its stdin handle has its own
/// buffer. Lines the host already pulled into the host's buffer (typical
/// with piped input) are never seen here, and a drained pipe reads as end
/// of input, which cancels monitoring at once. Interactive terminals are
/// line buffered and unaffected.
fn spawn_quit_listener(token: CancellationToken) {
    std::thread::spawn(move || watch_for_quit(std::io::stdin().lock(), &token));
}

/// Read lines until a quit line, end of input or a read error, then cancel.
fn watch_for_quit(mut reader: impl BufRead, token: &CancellationToken) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if is_quit(&line) => break,
            Ok(_) => continue,
        }
    }
    token.cancel();
}

fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(QUIT_TOKEN)
}

pluginhost_sdk::export_extensions!(HubSubscriber);

/// Static registrations.
pub fn extensions() -> Vec<StaticExtension> {
    vec![StaticExtension::of::<HubSubscriber>()]
}
