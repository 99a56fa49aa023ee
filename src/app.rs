use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use crossterm::style::Stylize;

use crate::apps::error::InstallError;
use crate::apps::fetch::Fetch;
use crate::apps::installer::{self, Installer};
use crate::apps::manager::{AppRegistry, InstalledApplication};
use crate::apps::runtime;
use crate::commands::{self, Builtin, Command};
use crate::console::Console;
use crate::model::config::ShellConfig;
use crate::model::repository::{AddOutcome, Repository};
use crate::msg::{Msg, Notice};

/// Separates chained commands on one prompt line.
const CHAIN_SEPARATOR: char = '|';

pub struct Shell {
    config: ShellConfig,
    root: PathBuf,
    cwd: PathBuf,
    repository: Repository,
    registry: AppRegistry,
    fetcher: Box<dyn Fetch>,
    interrupted: Arc<AtomicBool>,
    pub should_quit: bool,
}

impl Shell {
    pub fn new(
        config: ShellConfig,
        fetcher: Box<dyn Fetch>,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self> {
        let root = config.root_path();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating shell root {}", root.display()))?;
        let root = fs::canonicalize(&root)
            .with_context(|| format!("resolving shell root {}", root.display()))?;

        let applications = config.applications_path();
        fs::create_dir_all(&applications).with_context(|| {
            format!("creating applications directory {}", applications.display())
        })?;

        let repository = Repository::new(config.repository_path());
        let registry = AppRegistry::new(applications);

        Ok(Self {
            config,
            cwd: root.clone(),
            root,
            repository,
            registry,
            fetcher,
            interrupted,
            should_quit: false,
        })
    }

    /// Load the index and the registry. When no index exists yet, offer to
    /// download the default one.
    pub fn bootstrap(&mut self, console: &mut dyn Console) {
        if self.repository.path().exists() {
            self.reload_repository(console);
        } else {
            let prompt = format!(
                "No repository file found at {}. Download the default index?",
                self.repository.path().display()
            );
            if console.confirm(&prompt, true) {
                let url = self.config.repository.default_url.clone();
                self.update_repository(&url, console);
            } else {
                console.notify(Notice::info(
                    "Skipped. Use 'repo update' or 'repo add' to populate the repository.",
                ));
            }
        }

        let report = self.registry.load();
        for warning in report.warnings {
            console.notify(Notice::warn(warning));
        }
        if report.loaded > 0 {
            console.notify(Notice::info(format!(
                "{} application(s) available. Type 'apps' to list them.",
                report.loaded
            )));
        }
    }

    // ── MVU: Update ──────────────────────────────────────────────

    pub fn update(&mut self, msg: Msg, console: &mut dyn Console) {
        match msg {
            Msg::Line(line) => self.handle_line(&line, console),
            Msg::Interrupt => tracing::debug!("interrupt at prompt"),
            Msg::Eof => self.should_quit = true,
            Msg::FileChanged(path) => self.handle_file_changed(&path, console),
        }
    }

    fn handle_line(&mut self, line: &str, console: &mut dyn Console) {
        self.interrupted.store(false, Ordering::SeqCst);
        self.ensure_cwd(console);

        for segment in line.split(CHAIN_SEPARATOR) {
            let words = match shell_words::split(segment) {
                Ok(words) => words,
                Err(err) => {
                    console.notify(Notice::error(format!(
                        "cannot parse '{}': {err}",
                        segment.trim()
                    )));
                    continue;
                }
            };

            let Some((name, args)) = words.split_first() else {
                continue;
            };
            self.execute(name, args, console);

            // Ctrl-C abandons the rest of the line.
            if self.should_quit || self.interrupted.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    fn execute(&mut self, name: &str, args: &[String], console: &mut dyn Console) {
        tracing::debug!("command {name} {args:?}");
        match commands::resolve(name, &self.registry) {
            Some(Command::Builtin(builtin)) => self.run_builtin(builtin, args, console),
            Some(Command::App(app)) => {
                let app = app.clone();
                self.run_app(&app, args, console);
            }
            None => console.notify(Notice::error(format!(
                "Unknown command: {name}. Type 'help' for a list of commands."
            ))),
        }
    }

    fn run_builtin(&mut self, builtin: Builtin, args: &[String], console: &mut dyn Console) {
        match builtin {
            Builtin::Help => self.help(console),
            Builtin::Clear => console.clear_screen(),
            Builtin::Exit => self.should_quit = true,
            Builtin::Pwd => console.notify(Notice::info(self.cwd.display().to_string())),
            Builtin::Cd => self.change_dir(args.first().map(String::as_str), console),
            Builtin::Ls => self.list_dir(args.first().map(String::as_str), console),
            Builtin::Install => match args {
                [identifier] => self.install(identifier, console),
                _ => usage(builtin, console),
            },
            Builtin::Uninstall => match args {
                [command] => self.uninstall(command, console),
                _ => usage(builtin, console),
            },
            Builtin::Repo => self.repo(args, console),
            Builtin::Apps => self.list_apps(console),
            Builtin::Reserved(name) => console.notify(Notice::warn(format!(
                "'{name}' is not available in this shell"
            ))),
        }
    }

    // ── Applications ─────────────────────────────────────────────

    fn install(&mut self, identifier: &str, console: &mut dyn Console) {
        let installer = Installer::new(self.fetcher.as_ref(), &self.repository);
        if let Err(err) = installer.install(identifier, &mut self.registry, console) {
            report_install_error("Installation", err, console);
        }
    }

    fn uninstall(&mut self, command: &str, console: &mut dyn Console) {
        if let Err(err) = installer::uninstall(command, &mut self.registry, console) {
            report_install_error("Uninstall", err, console);
        }
    }

    fn list_apps(&self, console: &mut dyn Console) {
        if self.registry.is_empty() {
            console.notify(Notice::info(
                "No applications installed. Use 'install <url_or_name>' to add one.",
            ));
            return;
        }

        let width = self
            .registry
            .iter()
            .map(|app| app.command.len())
            .max()
            .unwrap_or(0);
        let mut lines = vec![format!("Installed applications ({}):", self.registry.len())];
        for app in self.registry.iter() {
            let dir = app
                .app_dir
                .strip_prefix(&self.root)
                .unwrap_or(&app.app_dir)
                .display();
            lines.push(format!(
                "  {:<width$}  {} v{} ({dir})",
                app.command, app.name, app.version
            ));
        }
        console.notify(Notice::info(lines.join("\n")));
    }

    fn run_app(&mut self, app: &InstalledApplication, args: &[String], console: &mut dyn Console) {
        match runtime::run_app(app, args, self.registry.root()) {
            Ok(outcome) => {
                for warning in outcome.warnings {
                    console.notify(Notice::warn(warning));
                }
                if !outcome.status.success() {
                    console.notify(Notice::warn(format!(
                        "'{}' exited with {}",
                        app.command, outcome.status
                    )));
                }
            }
            Err(err) => {
                tracing::warn!("running {} failed: {err}", app.command);
                console.notify(Notice::error(format!("cannot run '{}': {err}", app.command)));
            }
        }
    }

    // ── Repository ───────────────────────────────────────────────

    fn repo(&mut self, args: &[String], console: &mut dyn Console) {
        match args {
            [sub] if sub == "list" => self.list_repository(console),
            [sub] if sub == "update" => {
                let url = self.config.repository.default_url.clone();
                self.update_repository(&url, console);
            }
            [sub, url] if sub == "update" => self.update_repository(url, console),
            [sub, name, url] if sub == "add" => self.add_repository_entry(name, url, console),
            [sub, name] if sub == "remove" => match self.repository.remove(name) {
                Ok(url) => console.notify(Notice::success(format!("Removed '{name}' ({url})"))),
                Err(err) => console.notify(Notice::error(err.to_string())),
            },
            _ => usage(Builtin::Repo, console),
        }
    }

    fn list_repository(&self, console: &mut dyn Console) {
        if self.repository.is_empty() {
            console.notify(Notice::info(
                "Repository is empty. Use 'repo update' or 'repo add <name> <url>'.",
            ));
            return;
        }

        let width = self
            .repository
            .entries()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);
        let mut lines = vec!["Repository entries:".to_string()];
        lines.extend(
            self.repository
                .entries()
                .map(|(name, url)| format!("  {name:<width$}  {url}")),
        );
        lines.push(format!("{} entries", self.repository.len()));
        console.notify(Notice::info(lines.join("\n")));
    }

    fn update_repository(&mut self, url: &str, console: &mut dyn Console) {
        console.notify(Notice::info(format!("Downloading repository index from {url}")));
        match self.repository.update(url, self.fetcher.as_ref()) {
            Ok(report) => {
                for warning in report.warnings {
                    console.notify(Notice::warn(warning));
                }
                console.notify(Notice::success(format!(
                    "Repository updated: {} entries",
                    report.loaded
                )));
            }
            Err(err) => {
                tracing::warn!("repository update from {url} failed: {err}");
                console.notify(Notice::error(format!(
                    "repository update failed, keeping the current index: {err}"
                )));
            }
        }
    }

    fn add_repository_entry(&mut self, name: &str, url: &str, console: &mut dyn Console) {
        if let Some(existing) = self.repository.get(name).filter(|existing| *existing != url) {
            let prompt = format!("'{name}' already points to {existing}. Overwrite?");
            if !console.confirm(&prompt, false) {
                console.notify(Notice::info("Repository unchanged."));
                return;
            }
        }

        match self.repository.add(name, url) {
            Ok(AddOutcome::Added) => {
                console.notify(Notice::success(format!("Added '{name}' -> {url}")))
            }
            Ok(AddOutcome::Updated { previous }) => console.notify(Notice::success(format!(
                "Updated '{name}' -> {url} (was {previous})"
            ))),
            Ok(AddOutcome::Unchanged) => {
                console.notify(Notice::info(format!("'{name}' already points to {url}")))
            }
            Err(err) => console.notify(Notice::error(err.to_string())),
        }
    }

    fn reload_repository(&mut self, console: &mut dyn Console) {
        match self.repository.load() {
            Ok(report) => {
                for warning in report.warnings {
                    console.notify(Notice::warn(warning));
                }
            }
            Err(err) => console.notify(Notice::error(err.to_string())),
        }
    }

    // ── File watching ────────────────────────────────────────────

    fn handle_file_changed(&mut self, path: &Path, console: &mut dyn Console) {
        if same_file_path(path, self.repository.path()) {
            let before: Vec<(String, String)> = self
                .repository
                .entries()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect();
            self.reload_repository(console);
            let changed = self
                .repository
                .entries()
                .ne(before.iter().map(|(name, url)| (name.as_str(), url.as_str())));
            if changed {
                console.notify(Notice::info(format!(
                    "Repository file changed, {} entries loaded",
                    self.repository.len()
                )));
            }
            return;
        }

        if !is_under(path, self.registry.root()) {
            return;
        }

        let before: Vec<InstalledApplication> = self.registry.iter().cloned().collect();
        let report = self.registry.load();
        if self.registry.iter().ne(before.iter()) {
            for warning in report.warnings {
                console.notify(Notice::warn(warning));
            }
            console.notify(Notice::info(format!(
                "Applications changed, {} registered",
                self.registry.len()
            )));
        }
    }

    // ── Navigation ───────────────────────────────────────────────

    /// The prompt shown before each line.
    pub fn prompt(&self) -> String {
        format!(
            "{}:{} $ ",
            format!(
                "{}@{}",
                self.config.general.username, self.config.general.hostname
            )
            .green(),
            self.location().blue()
        )
    }

    /// The working directory relative to the shell root, `~`-prefixed.
    pub fn location(&self) -> String {
        match self.cwd.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "~".to_string(),
            Ok(rel) => format!("~/{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => self.cwd.display().to_string(),
        }
    }

    fn ensure_cwd(&mut self, console: &mut dyn Console) {
        if !self.cwd.is_dir() {
            console.notify(Notice::warn(format!(
                "{} no longer exists, returning to ~",
                self.cwd.display()
            )));
            self.cwd = self.root.clone();
        }
    }

    fn change_dir(&mut self, target: Option<&str>, console: &mut dyn Console) {
        match self.resolve_dir(target.unwrap_or("~")) {
            Ok(dir) => self.cwd = dir,
            Err(reason) => console.notify(Notice::error(reason)),
        }
    }

    fn list_dir(&self, target: Option<&str>, console: &mut dyn Console) {
        let dir = match target {
            Some(target) => match self.resolve_dir(target) {
                Ok(dir) => dir,
                Err(reason) => {
                    console.notify(Notice::error(reason));
                    return;
                }
            },
            None => self.cwd.clone(),
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                console.notify(Notice::error(format!("cannot list {}: {err}", dir.display())));
                return;
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();

        if names.is_empty() {
            console.notify(Notice::info("(empty)"));
        } else {
            console.notify(Notice::info(names.join("\n")));
        }
    }

    /// Resolve a `cd`/`ls` argument to a directory inside the shell root.
    fn resolve_dir(&self, target: &str) -> Result<PathBuf, String> {
        let candidate = if target == "~" {
            self.root.clone()
        } else if let Some(rest) = target.strip_prefix("~/") {
            self.root.join(rest)
        } else {
            self.cwd.join(target)
        };

        let resolved =
            fs::canonicalize(&candidate).map_err(|_| format!("no such directory: {target}"))?;
        if !resolved.is_dir() {
            return Err(format!("not a directory: {target}"));
        }
        if !resolved.starts_with(&self.root) {
            return Err(format!("cannot leave the shell root: {target}"));
        }
        Ok(resolved)
    }

    fn help(&self, console: &mut dyn Console) {
        let mut lines = vec!["Built-in commands:".to_string()];
        lines.extend(
            Builtin::served()
                .iter()
                .map(|builtin| format!("  {}", builtin.usage())),
        );
        lines.push("Chain commands with '|'.".to_string());

        let installed = self.registry.commands();
        if !installed.is_empty() {
            lines.push(format!("Applications: {}", installed.join(", ")));
        }
        console.notify(Notice::info(lines.join("\n")));
    }
}

fn usage(builtin: Builtin, console: &mut dyn Console) {
    console.notify(Notice::error(format!("usage: {}", builtin.usage())));
}

fn report_install_error(action: &str, err: InstallError, console: &mut dyn Console) {
    match err {
        InstallError::Declined => console.notify(Notice::info(format!("{action} cancelled."))),
        err => {
            tracing::warn!("{action} failed: {err}");
            console.notify(Notice::error(err.to_string()));
        }
    }
}

fn same_file_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    // Watcher paths are canonical; the configured path may not be.
    match (a.file_name(), b.parent().and_then(|p| fs::canonicalize(p).ok())) {
        (Some(name), Some(parent)) => {
            b.file_name() == Some(name) && a.parent().is_some_and(|p| p == parent)
        }
        _ => false,
    }
}

fn is_under(path: &Path, root: &Path) -> bool {
    path.starts_with(root) || fs::canonicalize(root).is_ok_and(|root| path.starts_with(root))
}
