use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use crate::apps::error::RunError;
use crate::apps::manager::InstalledApplication;

/// How a script is started: the program to spawn and the arguments that
/// precede the user's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    pub warnings: Vec<String>,
}

/// Switches the process into a directory and switches back on drop.
struct WorkingDirGuard {
    original: Option<PathBuf>,
    fallback: PathBuf,
}

impl WorkingDirGuard {
    fn enter(dir: &Path, fallback: &Path) -> Result<Self, RunError> {
        let original = env::current_dir().ok();
        env::set_current_dir(dir).map_err(|source| RunError::EnterDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            original,
            fallback: fallback.to_path_buf(),
        })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Some(original) = &self.original {
            match env::set_current_dir(original) {
                Ok(()) => return,
                Err(err) => tracing::warn!(
                    "cannot return to {}: {err}, using {}",
                    original.display(),
                    self.fallback.display()
                ),
            }
        }

        if let Err(err) = env::set_current_dir(&self.fallback) {
            tracing::error!("cannot enter fallback dir {}: {err}", self.fallback.display());
        }
    }
}

/// Run `app` synchronously from inside its directory.
///
/// The previous working directory is restored however the run ends; when it
/// no longer exists the process lands in `fallback_dir` instead.
pub fn run_app(
    app: &InstalledApplication,
    args: &[String],
    fallback_dir: &Path,
) -> Result<RunOutcome, RunError> {
    let launch = plan_launch(&app.script_path)?;
    tracing::info!(
        "running {} via {} in {}",
        app.command,
        launch.program.display(),
        app.app_dir.display()
    );

    let _guard = WorkingDirGuard::enter(&app.app_dir, fallback_dir)?;
    let status = Command::new(&launch.program)
        .args(&launch.args)
        .args(args)
        .status()
        .map_err(|source| RunError::Spawn {
            program: launch.program.display().to_string(),
            source,
        })?;

    tracing::info!("{} exited with {status}", app.command);
    Ok(RunOutcome {
        status,
        warnings: launch.warnings,
    })
}

/// Pick an interpreter from the script's extension.
pub fn plan_launch(script: &Path) -> Result<Launch, RunError> {
    let extension = script
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let script_arg = || vec![script.as_os_str().to_os_string()];

    match extension.as_deref() {
        Some("py") => interpreted(&["python3", "python"], script_arg()),
        Some("js") => interpreted(&["node"], script_arg()),
        Some("lua") => interpreted(&["lua"], script_arg()),
        Some("sh" | "bash") => {
            let mut launch = interpreted(&["bash", "sh"], script_arg())?;
            if !is_executable(script) {
                launch.warnings.push(format!(
                    "{} is not marked executable, running it through {}",
                    script.display(),
                    launch.program.display()
                ));
            }
            Ok(launch)
        }
        Some("class") => {
            let dir = script.parent().unwrap_or(Path::new("."));
            let class = script.file_stem().unwrap_or_default();
            interpreted(
                &["java"],
                vec![
                    OsString::from("-cp"),
                    dir.as_os_str().to_os_string(),
                    class.to_os_string(),
                ],
            )
        }
        Some("exe" | "bat" | "cmd") if cfg!(windows) => Ok(direct(script)),
        _ if is_executable(script) => Ok(direct(script)),
        _ => Err(RunError::Unsupported {
            path: script.to_path_buf(),
        }),
    }
}

fn interpreted(candidates: &[&'static str], args: Vec<OsString>) -> Result<Launch, RunError> {
    let program = candidates
        .iter()
        .find_map(|candidate| which::which(candidate).ok())
        .ok_or_else(|| RunError::MissingInterpreter {
            tried: candidates.to_vec(),
        })?;

    Ok(Launch {
        program,
        args,
        warnings: Vec::new(),
    })
}

fn direct(script: &Path) -> Launch {
    Launch {
        program: script.to_path_buf(),
        args: Vec::new(),
        warnings: Vec::new(),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
