use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::apps::error::FetchError;
use crate::model::config::NetworkConfig;

const CHUNK_SIZE: usize = 8192;

/// Remote access used by the installer and the repository index.
pub trait Fetch {
    /// GET `url` and return its body as text.
    fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    /// GET `url` and stream its body into `path`, returning the byte count.
    ///
    /// On failure nothing is left at `path` that was not there before.
    fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64, FetchError>;
}

pub struct HttpFetcher {
    text_agent: ureq::Agent,
    download_agent: ureq::Agent,
    interrupted: Arc<AtomicBool>,
}

impl HttpFetcher {
    pub fn new(config: &NetworkConfig, interrupted: Arc<AtomicBool>) -> Self {
        let agent = |secs: u64| {
            ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(secs))
                .user_agent(&config.user_agent)
                .build()
        };

        Self {
            text_agent: agent(config.fetch_timeout_secs),
            download_agent: agent(config.download_timeout_secs),
            interrupted,
        }
    }

    fn get(&self, agent: &ureq::Agent, url: &str) -> Result<ureq::Response, FetchError> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(FetchError::Interrupted {
                url: url.to_string(),
            });
        }

        tracing::debug!("GET {url}");
        match agent.get(url).call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, _)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(transport)) => Err(transport_error(url, &transport)),
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get(&self.text_agent, url)?;
        response.into_string().map_err(|err| read_error(url, &err))
    }

    fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let response = self.get(&self.download_agent, url)?;
        stream_to_file(response.into_reader(), url, path, &self.interrupted)
    }
}

/// Copy `reader` into `path` in fixed-size chunks.
///
/// Bytes go to a temporary sibling of `path` that is renamed over it only once
/// the stream ends cleanly; any earlier exit drops (and deletes) the temporary.
pub fn stream_to_file(
    mut reader: impl Read,
    url: &str,
    path: &Path,
    interrupted: &AtomicBool,
) -> Result<u64, FetchError> {
    let write_error = |source: io::Error| FetchError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(write_error)?;

    let mut partial = NamedTempFile::new_in(parent).map_err(write_error)?;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written: u64 = 0;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Err(FetchError::Interrupted {
                url: url.to_string(),
            });
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(read_error(url, &err)),
        };

        partial.write_all(&buf[..n]).map_err(write_error)?;
        written += n as u64;
    }

    partial.flush().map_err(write_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        partial
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(write_error)?;
    }

    partial
        .persist(path)
        .map_err(|err| write_error(err.error))?;

    tracing::debug!("wrote {written} bytes from {url} to {}", path.display());
    Ok(written)
}

fn transport_error(url: &str, transport: &ureq::Transport) -> FetchError {
    let timed_out = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(is_timeout);

    if timed_out {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            reason: transport.to_string(),
        }
    }
}

fn read_error(url: &str, err: &io::Error) -> FetchError {
    if is_timeout(err) {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
