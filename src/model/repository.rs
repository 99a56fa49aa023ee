use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;

use crate::apps::descriptor::is_web_url;
use crate::apps::error::RepoError;
use crate::apps::fetch::Fetch;

static ENTRY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^:#\s]+$").expect("valid entry name regex"));

/// Result of reading the backing file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated { previous: String },
    Unchanged,
}

/// Name → installer-descriptor URL index, persisted as a flat file of
/// alternating name and URL lines.
#[derive(Debug)]
pub struct Repository {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl Repository {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, url)| (name.as_str(), url.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the in-memory mapping with the backing file's contents.
    ///
    /// A missing file loads as empty.
    pub fn load(&mut self) -> Result<LoadReport, RepoError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.entries.clear();
                return Ok(LoadReport::default());
            }
            Err(source) => {
                return Err(RepoError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let (entries, report) = parse_index(&text);
        self.entries = entries;
        tracing::info!(
            "loaded {} repository entries from {}",
            report.loaded,
            self.path.display()
        );
        Ok(report)
    }

    pub fn add(&mut self, name: &str, url: &str) -> Result<AddOutcome, RepoError> {
        validate_name(name)?;
        if !is_web_url(url) {
            return Err(RepoError::InvalidUrl(url.to_string()));
        }

        let previous = self.entries.insert(name.to_string(), url.to_string());
        let outcome = match &previous {
            Some(old) if old == url => return Ok(AddOutcome::Unchanged),
            Some(old) => AddOutcome::Updated {
                previous: old.clone(),
            },
            None => AddOutcome::Added,
        };

        if let Err(err) = self.persist() {
            match previous {
                Some(old) => self.entries.insert(name.to_string(), old),
                None => self.entries.remove(name),
            };
            return Err(err);
        }

        tracing::info!("repository entry {name} -> {url}");
        Ok(outcome)
    }

    /// Remove `name`, returning the URL it pointed at.
    pub fn remove(&mut self, name: &str) -> Result<String, RepoError> {
        let Some(url) = self.entries.remove(name) else {
            return Err(RepoError::NotFound(name.to_string()));
        };

        if let Err(err) = self.persist() {
            self.entries.insert(name.to_string(), url);
            return Err(err);
        }

        tracing::info!("repository entry {name} removed");
        Ok(url)
    }

    /// Download a replacement index from `url` over the backing file, then reload.
    pub fn update(&mut self, url: &str, fetcher: &dyn Fetch) -> Result<LoadReport, RepoError> {
        if !is_web_url(url) {
            return Err(RepoError::InvalidUrl(url.to_string()));
        }

        fetcher.fetch_to_file(url, &self.path)?;
        tracing::info!("repository index replaced from {url}");
        self.load()
    }

    /// Write the whole sorted mapping to a temporary sibling and rename it
    /// over the backing file.
    fn persist(&self) -> Result<(), RepoError> {
        let io_error = |action: &'static str| {
            let path = self.path.clone();
            move |source: io::Error| RepoError::Io {
                action,
                path,
                source,
            }
        };

        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_error("create directory for"))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_error("create temporary file for"))?;
        tmp.write_all(render_index(&self.entries).as_bytes())
            .map_err(io_error("write"))?;
        tmp.flush().map_err(io_error("write"))?;
        tmp.persist(&self.path)
            .map_err(|err| io_error("replace")(err.error))?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), RepoError> {
    if ENTRY_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(RepoError::InvalidName(name.to_string()))
    }
}

fn parse_index(text: &str) -> (BTreeMap<String, String>, LoadReport) {
    let mut report = LoadReport::default();
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    if lines.len() % 2 != 0 {
        let dropped = lines.pop().unwrap_or_default();
        report.warnings.push(format!(
            "odd number of entry lines, ignoring trailing line '{dropped}'"
        ));
    }

    let mut entries = BTreeMap::new();
    for pair in lines.chunks_exact(2) {
        let (name, url) = (pair[0], pair[1]);
        if entries.insert(name.to_string(), url.to_string()).is_some() {
            report.warnings.push(format!(
                "duplicate repository entry '{name}', using last definition"
            ));
        } else {
            report.loaded += 1;
        }
    }

    (entries, report)
}

fn render_index(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .map(|(name, url)| format!("{name}\n{url}\n"))
        .collect()
}
