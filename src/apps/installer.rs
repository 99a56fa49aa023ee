use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::apps::descriptor::{
    APP_CONF, ApplicationDescriptor, InstallerDescriptor, Parsed, is_safe_file_name, is_web_url,
    url_file_name,
};
use crate::apps::error::InstallError;
use crate::apps::fetch::Fetch;
use crate::apps::manager::{AppRegistry, InstalledApplication};
use crate::console::Console;
use crate::model::repository::Repository;
use crate::msg::Notice;

/// `folder-name` may nest one category level, matching the registry scan depth.
const MAX_FOLDER_COMPONENTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub descriptor: ApplicationDescriptor,
    pub app_dir: PathBuf,
}

/// One file to download into the application directory.
#[derive(Debug, Clone)]
struct PlannedFile {
    url: String,
    file_name: String,
}

/// Application directory that is deleted on drop unless committed.
struct StagedDir {
    path: PathBuf,
    /// Topmost directory created for `path`; this is what rollback removes.
    created: PathBuf,
    committed: bool,
}

impl StagedDir {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_dir_all(&self.created) {
            Ok(()) => tracing::warn!(
                "rolled back incomplete install at {}",
                self.created.display()
            ),
            Err(err) => tracing::error!(
                "failed to remove incomplete install at {}: {err}",
                self.created.display()
            ),
        }
    }
}

pub struct Installer<'a> {
    fetcher: &'a dyn Fetch,
    repository: &'a Repository,
}

impl<'a> Installer<'a> {
    pub fn new(fetcher: &'a dyn Fetch, repository: &'a Repository) -> Self {
        Self {
            fetcher,
            repository,
        }
    }

    /// Install the application named by `identifier` (repository name or
    /// installer-descriptor URL) and reload `registry`.
    ///
    /// Nothing touches disk until every check has passed; once the application
    /// directory exists, any failure removes it again.
    pub fn install(
        &self,
        identifier: &str,
        registry: &mut AppRegistry,
        console: &mut dyn Console,
    ) -> Result<InstallOutcome, InstallError> {
        let installer_url = self.resolve(identifier, console)?;

        let text = self.fetcher.fetch_text(&installer_url)?;
        let Parsed {
            value: installer,
            warnings,
        } = InstallerDescriptor::parse(&text, &installer_url)?;
        report_warnings(console, "installer descriptor", warnings);

        console.notify(Notice::info(format!(
            "Fetching app config from {}",
            installer.conf_url
        )));
        let conf_text = self.fetcher.fetch_text(&installer.conf_url)?;
        let Parsed {
            value: descriptor,
            warnings,
        } = ApplicationDescriptor::parse(&conf_text, &installer.conf_url)?;
        report_warnings(console, "app config", warnings);
        check_script_name(&installer, &descriptor, console);

        registry.check_available(&descriptor.command)?;

        if !is_safe_file_name(&descriptor.file) {
            return Err(InstallError::PathTraversal(descriptor.file));
        }
        let root = canonical_path(registry.root())?;
        let app_dir = resolve_app_dir(&root, &installer.folder_name)?;
        let optional = plan_optional_files(&installer, &descriptor, console);

        let staged = prepare_dir(&root, &app_dir, &installer.folder_name, console)?;
        let materialized = self.materialize(
            &staged.path,
            &installer,
            &descriptor,
            &optional,
            &conf_text,
            console,
        );
        if let Err(err) = materialized {
            console.notify(Notice::warn(format!(
                "installation failed, removing incomplete directory '{}'",
                installer.folder_name
            )));
            drop(staged);
            return Err(err);
        }
        staged.commit();

        let script_path = app_dir.join(&descriptor.file);
        if let Err(err) = make_executable(&script_path) {
            console.notify(Notice::warn(format!(
                "could not make '{}' executable: {err}",
                descriptor.file
            )));
        }

        let report = registry.load();
        report_warnings(console, "applications", report.warnings);

        tracing::info!(
            "installed {} (command {}) into {}",
            descriptor.name,
            descriptor.command,
            app_dir.display()
        );
        console.notify(Notice::success(format!(
            "Installed '{}' (command: {} v{}) into '{}'",
            descriptor.name, descriptor.command, descriptor.version, installer.folder_name
        )));

        Ok(InstallOutcome {
            descriptor,
            app_dir,
        })
    }

    fn resolve(&self, identifier: &str, console: &mut dyn Console) -> Result<String, InstallError> {
        if let Some(url) = self.repository.get(identifier) {
            console.notify(Notice::info(format!(
                "Found '{identifier}' in repository, using {url}"
            )));
            return Ok(url.to_string());
        }

        if is_web_url(identifier) {
            console.notify(Notice::info(format!("Using installer URL {identifier}")));
            return Ok(identifier.to_string());
        }

        Err(InstallError::Resolution(identifier.to_string()))
    }

    fn materialize(
        &self,
        app_dir: &Path,
        installer: &InstallerDescriptor,
        descriptor: &ApplicationDescriptor,
        optional: &[PlannedFile],
        conf_text: &str,
        console: &mut dyn Console,
    ) -> Result<(), InstallError> {
        let bytes = self
            .fetcher
            .fetch_to_file(&installer.script_url, &app_dir.join(&descriptor.file))?;
        console.notify(Notice::info(format!(
            "Downloaded {} ({bytes} bytes)",
            descriptor.file
        )));

        for file in optional {
            match self.fetcher.fetch_to_file(&file.url, &app_dir.join(&file.file_name)) {
                Ok(bytes) => console.notify(Notice::info(format!(
                    "Downloaded {} ({bytes} bytes)",
                    file.file_name
                ))),
                Err(err) => console.notify(Notice::warn(format!(
                    "optional file '{}' not installed: {err}",
                    file.file_name
                ))),
            }
        }

        let conf_path = app_dir.join(APP_CONF);
        fs::write(&conf_path, conf_text)
            .map_err(|err| InstallError::filesystem("failed to write", &conf_path, err))?;
        Ok(())
    }
}

/// Remove the application that provides `command` and reload `registry`.
pub fn uninstall(
    command: &str,
    registry: &mut AppRegistry,
    console: &mut dyn Console,
) -> Result<InstalledApplication, InstallError> {
    let app = registry
        .get(command)
        .cloned()
        .ok_or_else(|| InstallError::UnknownCommand(command.to_string()))?;

    let root = canonical_path(registry.root())?;
    let app_dir = fs::canonicalize(&app.app_dir)
        .map_err(|err| InstallError::filesystem("failed to resolve", &app.app_dir, err))?;
    if app_dir == root || !app_dir.starts_with(&root) {
        return Err(InstallError::PathTraversal(app_dir.display().to_string()));
    }

    let rel = app_dir.strip_prefix(&root).unwrap_or(&app_dir).display().to_string();
    let prompt = format!(
        "Remove application '{}' (command: {}) and delete '{rel}'?",
        app.name, app.command
    );
    if !console.confirm(&prompt, false) {
        return Err(InstallError::Declined);
    }

    fs::remove_dir_all(&app_dir)
        .map_err(|err| InstallError::filesystem("failed to remove", &app_dir, err))?;
    tracing::info!("uninstalled {} from {}", app.command, app_dir.display());

    let report = registry.load();
    report_warnings(console, "applications", report.warnings);
    console.notify(Notice::success(format!(
        "Uninstalled '{}' (command: {})",
        app.name, app.command
    )));
    Ok(app)
}

/// Join `folder_name` under the canonical `root`, refusing anything that could
/// land outside it. Writes nothing, so `root` itself may not exist yet.
fn resolve_app_dir(root: &Path, folder_name: &str) -> Result<PathBuf, InstallError> {
    let reject = || InstallError::PathTraversal(folder_name.to_string());

    let folder = Path::new(folder_name);
    let components: Vec<Component<'_>> = folder.components().collect();
    if components.is_empty() || components.len() > MAX_FOLDER_COMPONENTS {
        return Err(reject());
    }
    for component in &components {
        let Component::Normal(part) = component else {
            return Err(reject());
        };
        let part = part.to_string_lossy();
        if part.starts_with('.') || part.contains('\\') {
            return Err(reject());
        }
    }

    let target = root.join(folder);

    // The deepest existing ancestor decides where symlinks really point.
    // Above the root there is nothing to follow: `root` is already canonical.
    let existing = target
        .ancestors()
        .find(|ancestor| ancestor.exists())
        .unwrap_or(root);
    if !root.starts_with(existing) {
        let resolved = fs::canonicalize(existing)
            .map_err(|err| InstallError::filesystem("failed to resolve", existing, err))?;
        if !resolved.starts_with(root) {
            return Err(reject());
        }
    }

    Ok(target)
}

/// Canonical form of `path`, which need not exist: its deepest existing
/// ancestor is resolved and the missing tail appended unchanged.
fn canonical_path(path: &Path) -> Result<PathBuf, InstallError> {
    let mut missing = Vec::new();
    let mut existing = path;
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    if existing.as_os_str().is_empty() {
        existing = Path::new(".");
    }

    let mut resolved = fs::canonicalize(existing)
        .map_err(|err| InstallError::filesystem("failed to resolve", existing, err))?;
    resolved.extend(missing.into_iter().rev());
    Ok(resolved)
}

fn plan_optional_files(
    installer: &InstallerDescriptor,
    descriptor: &ApplicationDescriptor,
    console: &mut dyn Console,
) -> Vec<PlannedFile> {
    let mut planned = Vec::new();

    for url in &installer.optional_urls {
        let Some(file_name) = url_file_name(url) else {
            console.notify(Notice::warn(format!(
                "could not determine a file name for optional URL {url}, skipping"
            )));
            continue;
        };

        if !is_safe_file_name(&file_name) || file_name == APP_CONF || file_name == descriptor.file {
            console.notify(Notice::warn(format!(
                "skipping optional URL with unsafe file name '{file_name}'"
            )));
            continue;
        }

        planned.push(PlannedFile {
            url: url.clone(),
            file_name,
        });
    }

    planned
}

fn prepare_dir(
    root: &Path,
    app_dir: &Path,
    folder_name: &str,
    console: &mut dyn Console,
) -> Result<StagedDir, InstallError> {
    if app_dir.exists() {
        let prompt = format!("Application directory '{folder_name}' already exists. Overwrite?");
        if !console.confirm(&prompt, false) {
            return Err(InstallError::Declined);
        }

        console.notify(Notice::info(format!(
            "Removing existing directory '{folder_name}'"
        )));
        let removed = if app_dir.is_dir() {
            fs::remove_dir_all(app_dir)
        } else {
            fs::remove_file(app_dir)
        };
        removed.map_err(|err| InstallError::filesystem("failed to remove", app_dir, err))?;
    }

    let created = app_dir
        .ancestors()
        .take_while(|ancestor| *ancestor != root && !ancestor.exists())
        .last()
        .unwrap_or(app_dir)
        .to_path_buf();
    fs::create_dir_all(app_dir)
        .map_err(|err| InstallError::filesystem("failed to create", app_dir, err))?;

    Ok(StagedDir {
        path: app_dir.to_path_buf(),
        created,
        committed: false,
    })
}

fn check_script_name(
    installer: &InstallerDescriptor,
    descriptor: &ApplicationDescriptor,
    console: &mut dyn Console,
) {
    match url_file_name(&installer.script_url) {
        Some(name) if name == descriptor.file => {}
        Some(name) => console.notify(Notice::warn(format!(
            "script-url file '{name}' does not match app config file '{}', saving as '{}'",
            descriptor.file, descriptor.file
        ))),
        None => console.notify(Notice::warn(format!(
            "could not determine a file name from script-url {}",
            installer.script_url
        ))),
    }
}

fn report_warnings(console: &mut dyn Console, context: &str, warnings: Vec<String>) {
    for warning in warnings {
        console.notify(Notice::warn(format!("{context}: {warning}")));
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o100);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::error::{CommandOwner, FetchError};
    use crate::apps::fetch::testing::StaticFetcher;
    use crate::console::RecordingConsole;
    use tempfile::TempDir;

    const INSTALLER_URL: &str = "https://x/weather.inst";
    const WEATHER_INSTALLER: &str = "folder-name: weather\n\
                                     conf-url: https://x/app.conf\n\
                                     script-url: https://x/weather.py\n";
    const NESTED_INSTALLER: &str = "folder-name: tools/weather\n\
                                    conf-url: https://x/app.conf\n\
                                    script-url: https://x/weather.py\n";
    const WEATHER_CONF: &str = "name: Weather\ncommand: weather\nversion: 1.0\nfile: weather.py\n";

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        repository: Repository,
        registry: AppRegistry,
    }

    /// Fixture whose applications root has not been created yet.
    fn unscanned_fixture() -> Fixture {
        let temp = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let root = temp.path().join("applications");
        let repository = Repository::new(temp.path().join("repo.txt"));
        let registry = AppRegistry::new(root.clone());
        Fixture {
            _temp: temp,
            root,
            repository,
            registry,
        }
    }

    fn fixture() -> Fixture {
        let mut fx = unscanned_fixture();
        fx.registry.load();
        fx
    }

    fn weather_fetcher() -> StaticFetcher {
        StaticFetcher::new()
            .with(INSTALLER_URL, WEATHER_INSTALLER)
            .with("https://x/app.conf", WEATHER_CONF)
            .with("https://x/weather.py", "print('sunny')\n")
    }

    fn install_with(
        fx: &mut Fixture,
        fetcher: &dyn Fetch,
        identifier: &str,
        console: &mut RecordingConsole,
    ) -> Result<InstallOutcome, InstallError> {
        Installer::new(fetcher, &fx.repository).install(identifier, &mut fx.registry, console)
    }

    fn install(
        fx: &mut Fixture,
        fetcher: &dyn Fetch,
        identifier: &str,
    ) -> Result<InstallOutcome, InstallError> {
        install_with(fx, fetcher, identifier, &mut RecordingConsole::default())
    }

    /// Serves like `inner`, but blocks `app.conf` with a directory once the
    /// script has been downloaded.
    struct ConfBlocker {
        inner: StaticFetcher,
    }

    impl Fetch for ConfBlocker {
        fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
            self.inner.fetch_text(url)
        }

        fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
            let bytes = self.inner.fetch_to_file(url, path)?;
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir.join(APP_CONF)).unwrap();
            }
            Ok(bytes)
        }
    }

    #[test]
    fn test_install_from_url_registers_app() {
        let mut fx = fixture();
        let fetcher = weather_fetcher();
        let mut console = RecordingConsole::default();

        let outcome = install_with(&mut fx, &fetcher, INSTALLER_URL, &mut console).unwrap();

        assert_eq!(outcome.descriptor.command, "weather");
        assert!(fx.root.join("weather/app.conf").is_file());
        assert!(fx.root.join("weather/weather.py").is_file());
        assert_eq!(
            fs::read_to_string(fx.root.join("weather/app.conf")).unwrap(),
            WEATHER_CONF
        );

        let app = fx.registry.get("weather").unwrap();
        assert_eq!(app.name, "Weather");
        assert_eq!(app.version, "1.0");
        assert!(app.script_path.is_file());
        assert!(console.warnings().is_empty());
    }

    #[test]
    fn test_install_creates_missing_applications_root() {
        let mut fx = unscanned_fixture();
        assert!(!fx.root.exists());

        install(&mut fx, &weather_fetcher(), INSTALLER_URL).unwrap();

        assert!(fx.root.join("weather/weather.py").is_file());
        assert!(fx.registry.get("weather").is_some());
    }

    #[test]
    fn test_rejected_install_with_missing_root_writes_nothing() {
        let mut fx = unscanned_fixture();
        let fetcher = weather_fetcher().with(
            INSTALLER_URL,
            "folder-name: ../evil\n\
             conf-url: https://x/app.conf\n\
             script-url: https://x/weather.py\n",
        );

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(err, InstallError::PathTraversal(_)));
        assert!(!fx.root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_installed_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let mut fx = fixture();

        install(&mut fx, &weather_fetcher(), INSTALLER_URL).unwrap();

        let mode = fs::metadata(fx.root.join("weather/weather.py"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o100, 0o100);
    }

    #[test]
    fn test_install_by_repository_name() {
        let mut fx = fixture();
        fx.repository.add("weather", INSTALLER_URL).unwrap();
        let fetcher = weather_fetcher();

        install(&mut fx, &fetcher, "weather").unwrap();

        assert_eq!(fetcher.requests.borrow()[0], INSTALLER_URL);
        assert!(fx.registry.get("weather").is_some());
    }

    #[test]
    fn test_unknown_name_that_is_not_a_url_fails_to_resolve() {
        let mut fx = fixture();
        let fetcher = StaticFetcher::new();

        let err = install(&mut fx, &fetcher, "weather").unwrap_err();

        assert!(matches!(err, InstallError::Resolution(_)));
        assert!(fetcher.requests.borrow().is_empty());
    }

    #[test]
    fn test_unreachable_installer_descriptor_is_a_network_error() {
        let mut fx = fixture();

        let err = install(&mut fx, &StaticFetcher::new(), INSTALLER_URL).unwrap_err();

        assert!(matches!(
            err,
            InstallError::Network(FetchError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn test_failed_script_download_leaves_no_directory() {
        let mut fx = fixture();
        let fetcher = StaticFetcher::new()
            .with(INSTALLER_URL, WEATHER_INSTALLER)
            .with("https://x/app.conf", WEATHER_CONF);

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(err, InstallError::Network(_)));
        assert!(!fx.root.join("weather").exists());
        assert!(fx.registry.get("weather").is_none());

        // A retry with the script available succeeds.
        install(&mut fx, &weather_fetcher(), INSTALLER_URL).unwrap();
        assert!(fx.registry.get("weather").is_some());
    }

    #[test]
    fn test_failed_app_conf_write_rolls_back() {
        let mut fx = fixture();
        let fetcher = ConfBlocker {
            inner: weather_fetcher(),
        };

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(err, InstallError::Filesystem { .. }));
        assert!(!fx.root.join("weather").exists());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_failed_nested_install_removes_created_parent() {
        let mut fx = fixture();
        let fetcher = StaticFetcher::new()
            .with(INSTALLER_URL, NESTED_INSTALLER)
            .with("https://x/app.conf", WEATHER_CONF);

        install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(!fx.root.join("tools").exists());
    }

    #[test]
    fn test_failed_nested_install_keeps_existing_parent() {
        let mut fx = fixture();
        fs::create_dir_all(fx.root.join("tools")).unwrap();
        fs::write(fx.root.join("tools/readme.txt"), "mine").unwrap();
        let fetcher = StaticFetcher::new()
            .with(INSTALLER_URL, NESTED_INSTALLER)
            .with("https://x/app.conf", WEATHER_CONF);

        install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(fx.root.join("tools/readme.txt").is_file());
        assert!(!fx.root.join("tools/weather").exists());
    }

    #[test]
    fn test_parent_escaping_folder_is_rejected_before_any_write() {
        let mut fx = fixture();
        let fetcher = weather_fetcher().with(
            INSTALLER_URL,
            "folder-name: ../evil\n\
             conf-url: https://x/app.conf\n\
             script-url: https://x/weather.py\n",
        );

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(err, InstallError::PathTraversal(_)));
        assert!(!fx.root.parent().unwrap().join("evil").exists());
        assert_eq!(fs::read_dir(&fx.root).unwrap().count(), 0);
    }

    #[test]
    fn test_folder_name_rules() {
        let fx = fixture();
        let root = fs::canonicalize(&fx.root).unwrap();

        assert_eq!(resolve_app_dir(&root, "weather").unwrap(), root.join("weather"));
        assert_eq!(
            resolve_app_dir(&root, "tools/weather").unwrap(),
            root.join("tools/weather")
        );
        let rejected = [
            "", "..", "../evil", "a/../../b", "/etc", ".hidden", "a/.git", "a/b/c", "a\\b",
        ];
        for bad in rejected {
            assert!(
                matches!(resolve_app_dir(&root, bad), Err(InstallError::PathTraversal(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_canonical_path_of_missing_directory() {
        let fx = unscanned_fixture();
        let parent = fs::canonicalize(fx.root.parent().unwrap()).unwrap();

        let resolved = canonical_path(&fx.root.join("tools")).unwrap();

        assert_eq!(resolved, parent.join("applications/tools"));
        assert!(!fx.root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_folder_pointing_outside_is_rejected() {
        let fx = fixture();
        let root = fs::canonicalize(&fx.root).unwrap();
        let outside = root.parent().unwrap().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("linked")).unwrap();

        assert!(matches!(
            resolve_app_dir(&root, "linked/app"),
            Err(InstallError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_unsafe_script_file_is_rejected() {
        let mut fx = fixture();
        let fetcher = weather_fetcher().with(
            "https://x/app.conf",
            "name: Weather\ncommand: weather\nfile: ../weather.py\n",
        );

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(err, InstallError::PathTraversal(_)));
        assert!(!fx.root.join("weather").exists());
    }

    #[test]
    fn test_builtin_command_conflict_aborts_before_mutation() {
        let mut fx = fixture();
        let fetcher = weather_fetcher().with(
            "https://x/app.conf",
            "name: Lister\ncommand: ls\nfile: weather.py\n",
        );

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(
            err,
            InstallError::NameConflict {
                owner: CommandOwner::Builtin,
                ..
            }
        ));
        assert!(!fx.root.join("weather").exists());
    }

    #[test]
    fn test_installed_command_conflict_aborts() {
        let mut fx = fixture();
        install(&mut fx, &weather_fetcher(), INSTALLER_URL).unwrap();
        let fetcher = StaticFetcher::new()
            .with(
                "https://y/other.inst",
                "folder-name: other\nconf-url: https://y/app.conf\nscript-url: https://y/o.py\n",
            )
            .with("https://y/app.conf", "name: Other\ncommand: weather\nfile: o.py\n");

        let err = install(&mut fx, &fetcher, "https://y/other.inst").unwrap_err();

        assert!(matches!(
            err,
            InstallError::NameConflict {
                owner: CommandOwner::Application(ref name),
                ..
            } if name == "Weather"
        ));
        assert!(!fx.root.join("other").exists());
    }

    #[test]
    fn test_missing_required_descriptor_fields() {
        let mut fx = fixture();
        let fetcher = weather_fetcher().with("https://x/app.conf", "command: weather\n");

        let err = install(&mut fx, &fetcher, INSTALLER_URL).unwrap_err();

        assert!(matches!(err, InstallError::InvalidDescriptor { .. }));
        assert!(!fx.root.join("weather").exists());
    }

    #[test]
    fn test_declined_overwrite_keeps_existing_directory() {
        let mut fx = fixture();
        let existing = fx.root.join("weather");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("notes.txt"), "keep me").unwrap();
        let mut console = RecordingConsole::answering(&[false]);

        let err = install_with(&mut fx, &weather_fetcher(), INSTALLER_URL, &mut console)
            .unwrap_err();

        assert!(matches!(err, InstallError::Declined));
        assert_eq!(console.prompts.len(), 1);
        assert_eq!(
            fs::read_to_string(existing.join("notes.txt")).unwrap(),
            "keep me"
        );
        assert!(!existing.join("weather.py").exists());
    }

    #[test]
    fn test_confirmed_overwrite_replaces_directory() {
        let mut fx = fixture();
        let existing = fx.root.join("weather");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("notes.txt"), "stale").unwrap();
        let mut console = RecordingConsole::answering(&[true]);

        install_with(&mut fx, &weather_fetcher(), INSTALLER_URL, &mut console).unwrap();

        assert!(!existing.join("notes.txt").exists());
        assert!(existing.join("weather.py").is_file());
    }

    #[test]
    fn test_optional_files_are_best_effort() {
        let mut fx = fixture();
        let fetcher = weather_fetcher()
            .with(
                INSTALLER_URL,
                "folder-name: weather\n\
                 conf-url: https://x/app.conf\n\
                 script-url: https://x/weather.py\n\
                 optional-url: https://x/icons.txt\n\
                 optional-url: https://x/missing.txt\n\
                 optional-url: https://x/.env\n\
                 optional-url: https://x/assets/\n",
            )
            .with("https://x/icons.txt", "sun\n");
        let mut console = RecordingConsole::default();

        install_with(&mut fx, &fetcher, INSTALLER_URL, &mut console).unwrap();

        let dir = fx.root.join("weather");
        assert!(dir.join("icons.txt").is_file());
        assert!(!dir.join("missing.txt").exists());
        assert!(!dir.join(".env").exists());
        assert!(!dir.join("assets").exists());
        assert_eq!(console.warnings().len(), 3);
        assert!(fx.registry.get("weather").is_some());
    }

    #[test]
    fn test_script_name_mismatch_is_a_warning() {
        let mut fx = fixture();
        let fetcher = weather_fetcher()
            .with(
                INSTALLER_URL,
                "folder-name: weather\n\
                 conf-url: https://x/app.conf\n\
                 script-url: https://x/main.py\n",
            )
            .with("https://x/main.py", "print('x')\n");
        let mut console = RecordingConsole::default();

        install_with(&mut fx, &fetcher, INSTALLER_URL, &mut console).unwrap();

        assert!(fx.root.join("weather/weather.py").is_file());
        assert!(!fx.root.join("weather/main.py").exists());
        assert!(console.warnings()[0].contains("main.py"));
    }

    #[test]
    fn test_nested_folder_install_is_registered() {
        let mut fx = fixture();
        let fetcher = weather_fetcher().with(INSTALLER_URL, NESTED_INSTALLER);

        install(&mut fx, &fetcher, INSTALLER_URL).unwrap();

        assert!(fx.root.join("tools/weather/weather.py").is_file());
        assert!(fx.registry.get("weather").is_some());
    }

    #[test]
    fn test_uninstall_removes_directory_and_registration() {
        let mut fx = fixture();
        install(&mut fx, &weather_fetcher(), INSTALLER_URL).unwrap();
        let mut console = RecordingConsole::answering(&[true]);

        let removed = uninstall("weather", &mut fx.registry, &mut console).unwrap();

        assert_eq!(removed.name, "Weather");
        assert!(!fx.root.join("weather").exists());
        assert!(fx.registry.get("weather").is_none());
    }

    #[test]
    fn test_uninstall_declined_or_unknown() {
        let mut fx = fixture();
        install(&mut fx, &weather_fetcher(), INSTALLER_URL).unwrap();

        let mut console = RecordingConsole::answering(&[false]);
        assert!(matches!(
            uninstall("weather", &mut fx.registry, &mut console),
            Err(InstallError::Declined)
        ));
        assert!(fx.root.join("weather").is_dir());

        assert!(matches!(
            uninstall("nope", &mut fx.registry, &mut RecordingConsole::default()),
            Err(InstallError::UnknownCommand(_))
        ));
    }
}
