/// Launch script builder
/// The script is an ordered list of statements rendered to POSIX sh.
/// Every interpolated value goes through `shell_quote`, so paths with
/// spaces, quotes or `$` cannot break out of their argument.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::app::{APP_DATA_ENV, SPEECH_LIBRARY_ENV, UNBUFFERED_ENV};
use crate::backend::environment::LaunchEnvironment;

/// Variables re-exported by the script on top of the inherited environment
const EXPORTED_VARS: &[&str] = &["PATH", "HOME", APP_DATA_ENV, UNBUFFERED_ENV];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Comment(String),
    Export { name: String, value: String },
    /// Export the first candidate that is a regular file
    ExportFirstExisting { name: String, candidates: Vec<String> },
    Log(String),
    LogVar(String),
    ListDirectory(PathBuf),
    ChangeDir(PathBuf),
    MakeExecutable(PathBuf),
    /// Replace the shell with the program, output appended to the log
    Exec(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellScript {
    interpreter: PathBuf,
    log_file: PathBuf,
    statements: Vec<Statement>,
}

/// Single-quote a value for sh
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Only plain identifiers may be exported
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl ShellScript {
    pub fn new(interpreter: impl Into<PathBuf>, log_file: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            log_file: log_file.into(),
            statements: Vec::new(),
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn push(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn comment(self, text: &str) -> Self {
        self.push(Statement::Comment(text.to_string()))
    }

    pub fn export(self, name: &str, value: &str) -> Self {
        self.push(Statement::Export {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    pub fn export_first_existing(self, name: &str, candidates: &[String]) -> Self {
        self.push(Statement::ExportFirstExisting {
            name: name.to_string(),
            candidates: candidates.to_vec(),
        })
    }

    pub fn log(self, message: &str) -> Self {
        self.push(Statement::Log(message.to_string()))
    }

    pub fn log_var(self, name: &str) -> Self {
        self.push(Statement::LogVar(name.to_string()))
    }

    pub fn list_directory(self, dir: &Path) -> Self {
        self.push(Statement::ListDirectory(dir.to_path_buf()))
    }

    pub fn change_dir(self, dir: &Path) -> Self {
        self.push(Statement::ChangeDir(dir.to_path_buf()))
    }

    pub fn make_executable(self, path: &Path) -> Self {
        self.push(Statement::MakeExecutable(path.to_path_buf()))
    }

    pub fn exec(self, program: &Path) -> Self {
        self.push(Statement::Exec(program.to_path_buf()))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("#!{}\n", self.interpreter.display()));
        out.push_str(&format!("LOGFILE={}\n", quote_path(&self.log_file)));
        out.push_str("echo \"$(date): Starting backend script\" > \"$LOGFILE\"\n");

        for statement in &self.statements {
            match statement {
                Statement::Comment(text) => {
                    for line in text.lines() {
                        out.push_str(&format!("# {}\n", line));
                    }
                }
                Statement::Export { name, value } => {
                    if is_valid_name(name) {
                        out.push_str(&format!("export {}={}\n", name, shell_quote(value)));
                    }
                }
                Statement::ExportFirstExisting { name, candidates } => {
                    if !is_valid_name(name) {
                        continue;
                    }
                    let list: Vec<String> = candidates.iter().map(|c| shell_quote(c)).collect();
                    out.push_str(&format!("for candidate in {}; do\n", list.join(" ")));
                    out.push_str("  if [ -f \"$candidate\" ]; then\n");
                    out.push_str(&format!("    export {}=\"$candidate\"\n", name));
                    out.push_str(&format!(
                        "    echo \"$(date): Found {} at: $candidate\" >> \"$LOGFILE\"\n",
                        name
                    ));
                    out.push_str("    break\n  fi\ndone\n");
                    out.push_str(&format!("if [ -z \"${{{}:-}}\" ]; then\n", name));
                    out.push_str(&format!(
                        "  echo \"$(date): ERROR - {} not found in known locations\" >> \"$LOGFILE\"\n",
                        name
                    ));
                    out.push_str("fi\n");
                }
                Statement::Log(message) => {
                    out.push_str(&format!(
                        "echo \"$(date): \"{} >> \"$LOGFILE\"\n",
                        shell_quote(message)
                    ));
                }
                Statement::LogVar(name) => {
                    if is_valid_name(name) {
                        out.push_str(&format!(
                            "echo \"{}: ${{{}:-}}\" >> \"$LOGFILE\"\n",
                            name, name
                        ));
                    }
                }
                Statement::ListDirectory(dir) => {
                    out.push_str(&format!("ls -la {} >> \"$LOGFILE\" 2>&1\n", quote_path(dir)));
                }
                Statement::ChangeDir(dir) => {
                    out.push_str(&format!(
                        "cd {} || {{ echo \"$(date): cd failed\" >> \"$LOGFILE\"; exit 1; }}\n",
                        quote_path(dir)
                    ));
                }
                Statement::MakeExecutable(path) => {
                    out.push_str(&format!("chmod +x {}\n", quote_path(path)));
                }
                Statement::Exec(program) => {
                    out.push_str(&format!("exec {} >> \"$LOGFILE\" 2>&1\n", quote_path(program)));
                }
            }
        }
        out
    }

    /// Write the script with mode 0755
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}

/// The script used for GUI launches on macOS
pub fn backend_launch_script(
    interpreter: &Path,
    executable: &Path,
    env: &LaunchEnvironment,
    speech_library_candidates: &[String],
    log_file: &Path,
) -> ShellScript {
    let backend_dir = executable.parent().unwrap_or_else(|| Path::new("."));

    let mut script = ShellScript::new(interpreter, log_file)
        .comment("Generated by the companio host; safe to delete")
        .export_first_existing(SPEECH_LIBRARY_ENV, speech_library_candidates);

    for name in EXPORTED_VARS {
        if let Some(value) = env.get(name) {
            script = script.export(name, value);
        }
    }

    script
        .export("DYLD_LIBRARY_PATH", &backend_dir.to_string_lossy())
        .log(&format!("Backend path: {}", executable.display()))
        .log_var(APP_DATA_ENV)
        .log_var("HOME")
        .log_var(SPEECH_LIBRARY_ENV)
        .log_var("PATH")
        .list_directory(backend_dir)
        .make_executable(executable)
        .change_dir(backend_dir)
        .log(&format!("Changed directory to {}", backend_dir.display()))
        .exec(executable)
}
