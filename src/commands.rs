use crate::apps::manager::{AppRegistry, InstalledApplication};

/// Commands the shell itself answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Help,
    Clear,
    Exit,
    Pwd,
    Cd,
    Ls,
    Install,
    Uninstall,
    Repo,
    Apps,
    /// Names kept out of the application namespace but not served here.
    Reserved(&'static str),
}

const RESERVED: [&str; 12] = [
    "delf", "deld", "mkdir", "touch", "move", "edit", "javac", "run", "download", "cowsay",
    "delpanic", "neofetch",
];

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "help" => Builtin::Help,
            "clear" => Builtin::Clear,
            "exit" => Builtin::Exit,
            "pwd" => Builtin::Pwd,
            "cd" => Builtin::Cd,
            "ls" => Builtin::Ls,
            "install" => Builtin::Install,
            "uninstall" => Builtin::Uninstall,
            "repo" => Builtin::Repo,
            "apps" => Builtin::Apps,
            other => {
                return RESERVED
                    .iter()
                    .copied()
                    .find(|reserved| *reserved == other)
                    .map(Builtin::Reserved);
            }
        };
        Some(builtin)
    }

    pub fn usage(&self) -> &'static str {
        match self {
            Builtin::Help => "help",
            Builtin::Clear => "clear",
            Builtin::Exit => "exit",
            Builtin::Pwd => "pwd",
            Builtin::Cd => "cd [dir]",
            Builtin::Ls => "ls [dir]",
            Builtin::Install => "install <url_or_name>",
            Builtin::Uninstall => "uninstall <command>",
            Builtin::Repo => "repo list | update [<url>] | add <name> <url> | remove <name>",
            Builtin::Apps => "apps",
            Builtin::Reserved(name) => name,
        }
    }

    pub fn served() -> [Builtin; 10] {
        [
            Builtin::Help,
            Builtin::Clear,
            Builtin::Exit,
            Builtin::Pwd,
            Builtin::Cd,
            Builtin::Ls,
            Builtin::Install,
            Builtin::Uninstall,
            Builtin::Repo,
            Builtin::Apps,
        ]
    }
}

pub fn is_builtin(name: &str) -> bool {
    Builtin::from_name(name).is_some()
}

/// A resolved entry of the command namespace.
#[derive(Debug, Clone, Copy)]
pub enum Command<'a> {
    Builtin(Builtin),
    App(&'a InstalledApplication),
}

/// Look `name` up in built-ins ∪ installed applications.
///
/// The registry never admits a built-in name, so at most one side matches.
pub fn resolve<'a>(name: &str, registry: &'a AppRegistry) -> Option<Command<'a>> {
    Builtin::from_name(name)
        .map(Command::Builtin)
        .or_else(|| registry.get(name).map(Command::App))
}
