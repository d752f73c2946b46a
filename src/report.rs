//! Report directory host.
//!
//! Runs collected commands one at a time and stores their combined output
//! under `sos_commands/<plugin>/`, with notes, alerts and per-command results
//! kept in `manifest.json` at the report root.

use crate::collectors::CollectedCommand;
use crate::regdump_plugin::{Host, RegdumpPlugin};
use crate::utils::errors::RegdumpError;
use crate::utils::psutils::{HostSummary, ProcFs, ProcessTable, host_summary};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const NAME_MAX: usize = 255;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const NOT_FOUND_STATUS: i32 = 127;

static BIN_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(usr/|)(bin|sbin)/").expect("valid prefix pattern"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-\./]+").expect("valid character pattern"));

#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: String,
    /// Output file, relative to the report root.
    pub filename: PathBuf,
    pub exit_status: Option<i32>,
    pub duration_secs: f64,
    pub timed_out: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginManifest {
    pub plugin: String,
    pub started: DateTime<Local>,
    pub finished: Option<DateTime<Local>>,
    pub host: HostSummary,
    pub commands: Vec<CommandRecord>,
    pub notes: Vec<String>,
    pub alerts: Vec<String>,
}

pub struct ReportHost {
    root: PathBuf,
    processes: ProcFs,
    timeout: Option<Duration>,
    manifest: PluginManifest,
}

impl ReportHost {
    /// Prepare `root` for a new report. `timeout` of `None` waits forever.
    pub fn create(
        root: impl Into<PathBuf>,
        processes: ProcFs,
        timeout: Option<Duration>,
    ) -> Result<Self, RegdumpError> {
        let root = root.into();
        let host = Self {
            root,
            processes,
            timeout,
            manifest: PluginManifest {
                plugin: RegdumpPlugin::NAME.to_string(),
                started: Local::now(),
                finished: None,
                host: host_summary(),
                commands: Vec::new(),
                notes: Vec::new(),
                alerts: Vec::new(),
            },
        };

        let commands_dir = host.commands_dir();
        fs::create_dir_all(&commands_dir).map_err(|e| RegdumpError::io(&commands_dir, e))?;
        info!("Writing report to {}", host.root.display());
        Ok(host)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn commands_dir(&self) -> PathBuf {
        self.root.join("sos_commands").join(RegdumpPlugin::NAME)
    }

    /// Stamp the manifest and write it next to the collected output.
    pub fn finish(mut self) -> Result<PluginManifest, RegdumpError> {
        self.manifest.finished = Some(Local::now());
        let path = self.root.join(MANIFEST_FILE);
        let contents = serde_json::to_string_pretty(&self.manifest)?;
        fs::write(&path, contents).map_err(|e| RegdumpError::io(&path, e))?;
        debug!("Manifest written to {}", path.display());
        Ok(self.manifest)
    }

    /// Output file for `name`, relative to the report root. Names already
    /// taken get `_2`, `_3`, ... appended, as sosreport does.
    fn unique_filename(&self, name: &str) -> PathBuf {
        let dir = Path::new("sos_commands").join(RegdumpPlugin::NAME);
        let mut filename = dir.join(name);
        let mut suffix = 2;
        while self.root.join(&filename).exists() {
            filename = dir.join(format!("{}_{}", name, suffix));
            suffix += 1;
        }
        filename
    }

    fn execute(
        &self,
        command: &CollectedCommand,
        output: &Path,
    ) -> Result<(ExitStatus, bool), RunError> {
        let stdout = File::options()
            .write(true)
            .create_new(true)
            .open(output)
            .map_err(RunError::Io)?;
        let stderr = stdout.try_clone().map_err(RunError::Io)?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(RunError::Spawn)?;

        let waited = match self.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout),
            None => child.wait().map(|status| (status, false)),
        };
        waited.map_err(RunError::Io)
    }
}

/// Why a command has no exit status of its own.
#[derive(Debug)]
enum RunError {
    /// The program could not be started.
    Spawn(io::Error),
    /// Capturing output or waiting for the program failed.
    Io(io::Error),
}

/// Wait for `child`, killing it once `timeout` has passed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<(ExitStatus, bool)> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if start.elapsed() >= timeout {
            if let Err(e) = child.kill() {
                // It may have exited since the last poll
                debug!("Cannot kill pid {}: {}", child.id(), e);
                if let Some(status) = child.try_wait()? {
                    return Ok((status, false));
                }
                return Err(e);
            }
            return child.wait().map(|status| (status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// File name for a suggested artifact name, following sosreport's rules.
pub fn mangle_filename(name: &str) -> String {
    let name = BIN_PREFIX.replace(name, "");
    let name = UNSAFE_CHARS.replace_all(&name, "_");
    let name = name.replace('/', ".");
    let name = name.trim_matches(|c| matches!(c, ' ' | '.' | '_' | '-'));

    let mut end = name.len().min(NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

impl ProcessTable for ReportHost {
    fn pids(&self) -> io::Result<Vec<u32>> {
        self.processes.pids()
    }

    fn cmdline(&self, pid: u32) -> io::Result<Vec<u8>> {
        self.processes.cmdline(pid)
    }
}

impl Host for ReportHost {
    /// Only the last path component may hold wildcards.
    fn glob(&self, pattern: &str) -> Vec<PathBuf> {
        let pattern = Path::new(pattern);
        let (Some(dir), Some(name_pattern)) = (pattern.parent(), pattern.file_name()) else {
            return Vec::new();
        };
        let name_pattern = name_pattern.to_string_lossy();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut matches: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| glob_match::glob_match(&name_pattern, &entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        matches.sort();
        matches
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn run_command(&mut self, command: &CollectedCommand) {
        let filename = self.unique_filename(&mangle_filename(&command.suggest_filename));
        let output = self.root.join(&filename);

        debug!("Running '{}' into {}", command, output.display());
        let start = Instant::now();
        let result = self.execute(command, &output);
        let duration_secs = start.elapsed().as_secs_f64();

        let record = match result {
            Ok((status, timed_out)) => {
                if timed_out {
                    warn!("'{}' timed out after {:.1}s", command, duration_secs);
                } else if !status.success() {
                    warn!("'{}' exited with {}", command, status);
                }
                CommandRecord {
                    command: command.to_string(),
                    filename,
                    exit_status: status.code(),
                    duration_secs,
                    timed_out,
                    error: None,
                }
            }
            Err(RunError::Spawn(e)) => {
                warn!("Unable to run '{}': {}", command, e);
                CommandRecord {
                    command: command.to_string(),
                    filename,
                    exit_status: Some(NOT_FOUND_STATUS),
                    duration_secs,
                    timed_out: false,
                    error: Some(e.to_string()),
                }
            }
            Err(RunError::Io(e)) => {
                warn!("'{}' failed: {}", command, e);
                CommandRecord {
                    command: command.to_string(),
                    filename,
                    exit_status: None,
                    duration_secs,
                    timed_out: false,
                    error: Some(e.to_string()),
                }
            }
        };
        self.manifest.commands.push(record);
    }

    fn record_note(&mut self, text: &str) {
        info!("{}", text);
        self.manifest.notes.push(text.to_string());
    }

    fn record_alert(&mut self, text: &str) {
        warn!("{}", text);
        self.manifest.alerts.push(text.to_string());
    }
}
