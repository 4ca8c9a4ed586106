//! Logging setup for the CLI.
//!
//! All diagnostics go to stderr so stdout stays clean for results and MCP
//! frames. The writer redacts every known API key before bytes reach the
//! terminal. The subscriber is installed once at startup; secrets learned
//! during configuration resolution are added to the live redaction set
//! through the returned [`SecretStore`].

use std::io::{self, Write};
use std::sync::{Arc, RwLock};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Shared, growable set of strings to mask in log output.
#[derive(Clone, Default)]
pub struct SecretStore {
    secrets: Arc<RwLock<Vec<String>>>,
}

impl SecretStore {
    /// Add more secrets to the redaction set.
    pub fn add(&self, extra: impl IntoIterator<Item = String>) {
        let mut guard = self.secrets.write().expect("secret store poisoned");
        guard.extend(extra.into_iter().filter(|s| !s.is_empty()));
        guard.sort();
        guard.dedup();
    }

    fn redact(&self, text: &str) -> String {
        let guard = self.secrets.read().expect("secret store poisoned");
        let mut out = text.to_string();
        for secret in guard.iter() {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), "***");
            }
        }
        out
    }
}

/// Stderr writer with redaction applied per write call.
pub struct RedactingWriter {
    store: SecretStore,
    inner: io::Stderr,
}

impl Write for RedactingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = self.store.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(text.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for SecretStore {
    type Writer = RedactingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            store: self.clone(),
            inner: io::stderr(),
        }
    }
}

/// Initialize the global subscriber once at startup.
///
/// `RUST_LOG` wins when set; otherwise `-v` raises the default level
/// from `info` to `debug`. Returns the live redaction set.
pub fn init(verbose: bool, initial_secrets: Vec<String>) -> SecretStore {
    let store = SecretStore::default();
    store.add(initial_secrets);

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(store.clone())
        .with_target(false)
        .init();

    store
}
