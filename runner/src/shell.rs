//! Shell detection for shell actions.

use std::path::{Path, PathBuf};

use smithy_types::ShellSettings;

/// Shell used to run shell-action command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments to pass before the command line (e.g. `["-c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl DetectedShell {
    /// Program and argument vector for one command line.
    #[must_use]
    pub fn command_for(&self, command_line: &str) -> (String, Vec<String>) {
        let mut args = self.args.clone();
        args.push(command_line.to_string());
        (self.binary.to_string_lossy().into_owned(), args)
    }
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Detect the shell to use.
///
/// Priority:
/// - Configured binary (args default by shell name when not configured)
/// - `$SHELL`, if it exists
/// - `bash` on `PATH`
/// - `/bin/sh`
#[must_use]
pub fn detect_shell(settings: &ShellSettings) -> DetectedShell {
    if let Some(binary) = &settings.binary {
        let args = settings
            .args
            .clone()
            .unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: "configured".into(),
        };
    }

    let mut shell = detect_platform_shell();
    if let Some(args) = &settings.args {
        shell.args.clone_from(args);
    }
    shell
}

/// Infer default args for a shell binary name.
fn default_args_for(binary: &str) -> Vec<String> {
    let name = Path::new(binary)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(binary)
        .to_lowercase();

    match name.as_str() {
        "cmd" => vec!["/C".to_string()],
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        // Most Unix shells use -c
        _ => vec!["-c".to_string()],
    }
}

#[cfg(windows)]
fn detect_platform_shell() -> DetectedShell {
    let comspec = std::env::var("ComSpec")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(r"C:\Windows\System32\cmd.exe"));
    DetectedShell {
        binary: comspec,
        args: vec!["/C".to_string()],
        name: "cmd".into(),
    }
}

#[cfg(not(windows))]
fn detect_platform_shell() -> DetectedShell {
    if let Ok(shell) = std::env::var("SHELL") {
        let path = Path::new(&shell);
        if path.exists() {
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("user-shell")
                .to_string();
            return DetectedShell {
                binary: PathBuf::from(&shell),
                args: vec!["-c".to_string()],
                name,
            };
        }
    }

    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }

    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}
