use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::apps::descriptor::{APP_CONF, ApplicationDescriptor, is_safe_file_name};
use crate::apps::error::{CommandOwner, InstallError};
use crate::commands;

/// Directories below the applications root that may hold an `app.conf`.
const SCAN_DEPTH: usize = 2;

/// A registered application, keyed in the registry by its command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApplication {
    pub name: String,
    pub command: String,
    pub version: String,
    pub script_path: PathBuf,
    pub app_dir: PathBuf,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub loaded: usize,
    pub warnings: Vec<String>,
}

/// Command name → installed application, derived entirely from disk.
#[derive(Debug)]
pub struct AppRegistry {
    root: PathBuf,
    apps: BTreeMap<String, InstalledApplication>,
}

impl AppRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            apps: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, command: &str) -> Option<&InstalledApplication> {
        self.apps.get(command)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledApplication> {
        self.apps.values()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn commands(&self) -> Vec<&str> {
        self.apps.keys().map(String::as_str).collect()
    }

    /// Fails when `command` is a built-in or already registered.
    pub fn check_available(&self, command: &str) -> Result<(), InstallError> {
        check_available(&self.apps, command)
    }

    /// Rebuild the registry from a fresh scan of the applications root.
    ///
    /// Directories are visited in path order; on a command collision the
    /// first one visited keeps the command.
    pub fn load(&mut self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut apps = BTreeMap::new();

        if let Err(err) = fs::create_dir_all(&self.root) {
            report.warnings.push(format!(
                "could not create applications directory {}: {err}",
                self.root.display()
            ));
            self.apps = apps;
            return report;
        }
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());

        for dir in app_dirs(&root, &mut report.warnings) {
            match setup_app(&dir, &root, &apps, &mut report.warnings) {
                Ok(app) => {
                    tracing::debug!("registered {} from {}", app.command, app.app_dir.display());
                    apps.insert(app.command.clone(), app);
                    report.loaded += 1;
                }
                Err(reason) => {
                    tracing::warn!("{reason}");
                    report.warnings.push(reason);
                }
            }
        }

        tracing::info!("loaded {} applications from {}", report.loaded, root.display());
        self.apps = apps;
        report
    }
}

fn check_available(
    apps: &BTreeMap<String, InstalledApplication>,
    command: &str,
) -> Result<(), InstallError> {
    if commands::is_builtin(command) {
        return Err(InstallError::NameConflict {
            command: command.to_string(),
            owner: CommandOwner::Builtin,
        });
    }

    if let Some(existing) = apps.get(command) {
        return Err(InstallError::NameConflict {
            command: command.to_string(),
            owner: CommandOwner::Application(existing.name.clone()),
        });
    }

    Ok(())
}

/// Resolved directories at depth one and two that contain an `app.conf`.
fn app_dirs(root: &Path, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(true)
        .max_depth(Some(SCAN_DEPTH))
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(format!("could not list applications: {err}"));
                continue;
            }
        };

        let path = entry.path();
        if entry.depth() == 0 || !path.is_dir() || !path.join(APP_CONF).is_file() {
            continue;
        }

        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if seen.insert(resolved.clone()) {
            dirs.push(resolved);
        }
    }

    dirs
}

fn setup_app(
    dir: &Path,
    root: &Path,
    apps: &BTreeMap<String, InstalledApplication>,
    warnings: &mut Vec<String>,
) -> Result<InstalledApplication, String> {
    let rel = relative_display(dir, root);
    let conf_path = dir.join(APP_CONF);

    let text = fs::read_to_string(&conf_path)
        .map_err(|err| format!("could not read app.conf in '{rel}': {err}, skipping"))?;
    let parsed = ApplicationDescriptor::parse(&text, &format!("'{rel}/{APP_CONF}'"))
        .map_err(|err| format!("{err}, skipping"))?;
    warnings.extend(
        parsed
            .warnings
            .into_iter()
            .map(|warning| format!("'{rel}/{APP_CONF}' {warning}")),
    );
    let descriptor = parsed.value;

    if !is_safe_file_name(&descriptor.file) {
        return Err(format!(
            "app '{}' in '{rel}' names an unsafe script file '{}', skipping",
            descriptor.name, descriptor.file
        ));
    }

    let script_path = dir.join(&descriptor.file);
    if !script_path.is_file() {
        return Err(format!(
            "script '{}' not found in '{rel}' for app '{}', skipping",
            descriptor.file, descriptor.name
        ));
    }

    if let Err(err) = check_available(apps, &descriptor.command) {
        let holder = apps
            .get(&descriptor.command)
            .map(|existing| format!(" in '{}'", relative_display(&existing.app_dir, root)))
            .unwrap_or_default();
        return Err(format!(
            "app '{}' in '{rel}': {err}{holder}, skipping",
            descriptor.name
        ));
    }

    Ok(InstalledApplication {
        name: descriptor.name,
        command: descriptor.command,
        version: descriptor.version,
        script_path,
        app_dir: dir.to_path_buf(),
    })
}

fn relative_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
