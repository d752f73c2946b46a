use crate::collectors::{
    CollectedCommand, RegdumpInvocation, SocketPattern, discover_sockets, locate_hypervisor,
    version_command,
};
use crate::options::RegdumpOptions;
use crate::utils::errors::RegdumpError;
use crate::utils::psutils::ProcessTable;
use log::info;
use std::fmt;
use std::path::{Path, PathBuf};

pub const NO_HYPERVISOR_NOTE: &str = "No qemu-system-* binary found";
pub const NO_SOCKETS_NOTE: &str = "No QEMU processes with QMP sockets found";

/// How far a collection run got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    NoHypervisor,
    ToolMissing(PathBuf),
    NoSockets,
    Collected {
        hypervisor: PathBuf,
        sockets: Vec<String>,
    },
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::NoHypervisor => f.write_str("no QEMU binary installed"),
            Collection::ToolMissing(path) => write!(f, "dump tool {} missing", path.display()),
            Collection::NoSockets => f.write_str("no QMP sockets found"),
            Collection::Collected { sockets, .. } => {
                write!(f, "collected {} register dump(s)", sockets.len())
            }
        }
    }
}

/// QEMU register dump plugin.
///
/// Stages run in order and any of them can end the run early after leaving a
/// note or alert on the host:
/// locate `qemu-system-*` → capture its version → check the dump tool →
/// find QMP sockets → run the dump tool once per socket.
pub struct RegdumpPlugin {
    options: RegdumpOptions,
    pattern: SocketPattern,
}

impl RegdumpPlugin {
    pub const NAME: &'static str = crate::options::PLUGIN_NAME;

    pub fn new(options: RegdumpOptions) -> Result<Self, RegdumpError> {
        let pattern = SocketPattern::new(options.pattern)?;
        Ok(Self { options, pattern })
    }

    pub fn options(&self) -> &RegdumpOptions {
        &self.options
    }

    pub fn setup<H: Host + ?Sized>(&self, host: &mut H) -> Collection {
        let Some(hypervisor) = locate_hypervisor(&*host) else {
            host.record_note(NO_HYPERVISOR_NOTE);
            return Collection::NoHypervisor;
        };
        host.run_command(&version_command(&hypervisor));

        let tool = Path::new(self.options.tool_path());
        if !host.is_file(tool) {
            host.record_alert(&format!("qmp-regdump tool '{}' not found", tool.display()));
            return Collection::ToolMissing(tool.to_path_buf());
        }

        let sockets = discover_sockets(self.options.socket(), &*host, &self.pattern);
        if sockets.is_empty() {
            host.record_note(NO_SOCKETS_NOTE);
            return Collection::NoSockets;
        }

        for command in RegdumpInvocation::from_options(&self.options).for_sockets(&sockets) {
            info!("Collecting {}", command);
            host.run_command(&command);
        }

        Collection::Collected {
            hypervisor,
            sockets,
        }
    }
}

/// What the plugin needs from the report framework hosting it.
pub trait Host: ProcessTable {
    /// Paths matching `pattern`, sorted. Wildcards are only expanded in the
    /// last path component.
    fn glob(&self, pattern: &str) -> Vec<PathBuf>;

    fn is_file(&self, path: &Path) -> bool;

    /// Run `command` to completion and capture its output under
    /// `command.suggest_filename`. Failures are the host's to record.
    fn run_command(&mut self, command: &CollectedCommand);

    fn record_note(&mut self, text: &str);

    fn record_alert(&mut self, text: &str);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::options::PatternMode;
    use std::collections::{BTreeMap, HashSet};
    use std::io;

    /// In-memory host with a synthetic process table.
    #[derive(Default)]
    pub struct FakeHost {
        globs: Vec<PathBuf>,
        files: HashSet<PathBuf>,
        processes: BTreeMap<u32, Option<Vec<u8>>>,
        broken_table: bool,
        pub commands: Vec<CollectedCommand>,
        pub notes: Vec<String>,
        pub alerts: Vec<String>,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_glob(mut self, paths: &[&str]) -> Self {
            self.globs.extend(paths.iter().map(PathBuf::from));
            self
        }

        pub fn with_file(mut self, path: &str) -> Self {
            self.files.insert(PathBuf::from(path));
            self
        }

        pub fn with_process(mut self, pid: u32, cmdline: &[u8]) -> Self {
            self.processes.insert(pid, Some(cmdline.to_vec()));
            self
        }

        pub fn with_vanished_process(mut self, pid: u32) -> Self {
            self.processes.insert(pid, None);
            self
        }

        pub fn with_broken_table(mut self) -> Self {
            self.broken_table = true;
            self
        }

        /// QEMU and the dump tool both installed at their default paths.
        pub fn installed() -> Self {
            Self::new()
                .with_glob(&["/usr/bin/qemu-system-x86_64"])
                .with_file("/usr/bin/qemu-system-x86_64")
                .with_file("/usr/bin/qmp-regdump")
        }

        fn command_lines(&self) -> Vec<String> {
            self.commands.iter().map(|c| c.to_string()).collect()
        }
    }

    impl ProcessTable for FakeHost {
        fn pids(&self) -> io::Result<Vec<u32>> {
            if self.broken_table {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "no procfs"));
            }
            Ok(self.processes.keys().copied().collect())
        }

        fn cmdline(&self, pid: u32) -> io::Result<Vec<u8>> {
            match self.processes.get(&pid) {
                Some(Some(cmdline)) => Ok(cmdline.clone()),
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "process exited")),
            }
        }
    }

    impl Host for FakeHost {
        fn glob(&self, pattern: &str) -> Vec<PathBuf> {
            self.globs
                .iter()
                .filter(|path| glob_match::glob_match(pattern, &path.to_string_lossy()))
                .cloned()
                .collect()
        }

        fn is_file(&self, path: &Path) -> bool {
            self.files.contains(path)
        }

        fn run_command(&mut self, command: &CollectedCommand) {
            self.commands.push(command.clone());
        }

        fn record_note(&mut self, text: &str) {
            self.notes.push(text.to_string());
        }

        fn record_alert(&mut self, text: &str) {
            self.alerts.push(text.to_string());
        }
    }

    fn plugin(args: &[&str]) -> RegdumpPlugin {
        let mut options = RegdumpOptions::default();
        for arg in args {
            options.apply_arg(arg).unwrap();
        }
        RegdumpPlugin::new(options).unwrap()
    }

    #[test]
    // Without a hypervisor binary nothing at all is run
    fn test_no_hypervisor() {
        let mut host = FakeHost::new()
            .with_file("/usr/bin/qmp-regdump")
            .with_process(1, b"qemu-system-x86_64\0-qmp\0unix:/tmp/a,server\0");

        let outcome = plugin(&[]).setup(&mut host);

        assert_eq!(outcome, Collection::NoHypervisor);
        assert_eq!(host.notes, vec!["No qemu-system-* binary found"]);
        assert!(host.commands.is_empty());
        assert!(host.alerts.is_empty());
    }

    #[test]
    // A glob hit that is not a file does not count as installed
    fn test_hypervisor_glob_hit_without_file() {
        let mut host = FakeHost::new().with_glob(&["/usr/bin/qemu-system-x86_64"]);
        assert_eq!(plugin(&[]).setup(&mut host), Collection::NoHypervisor);
        assert!(host.commands.is_empty());
    }

    #[test]
    // The version is captured before the dump tool is checked
    fn test_missing_tool() {
        let mut host = FakeHost::new()
            .with_glob(&["/usr/bin/qemu-system-x86_64"])
            .with_file("/usr/bin/qemu-system-x86_64")
            .with_process(1, b"qemu-system-x86_64\0-qmp\0unix:/tmp/a,server\0");

        let outcome = plugin(&["path=/opt/bin/qmp-regdump"]).setup(&mut host);

        assert_eq!(
            outcome,
            Collection::ToolMissing(PathBuf::from("/opt/bin/qmp-regdump"))
        );
        assert_eq!(
            host.alerts,
            vec!["qmp-regdump tool '/opt/bin/qmp-regdump' not found"]
        );
        assert_eq!(
            host.command_lines(),
            vec!["/usr/bin/qemu-system-x86_64 --version"]
        );
        assert_eq!(host.commands[0].suggest_filename, "qemu-version");
    }

    #[test]
    fn test_no_sockets() {
        let mut host = FakeHost::installed().with_process(1, b"/sbin/init\0");

        let outcome = plugin(&[]).setup(&mut host);

        assert_eq!(outcome, Collection::NoSockets);
        assert_eq!(host.notes, vec!["No QEMU processes with QMP sockets found"]);
        assert_eq!(host.commands.len(), 1);
        assert_eq!(host.commands[0].suggest_filename, "qemu-version");
    }

    #[test]
    // An explicit socket is dumped even when no guest is visible
    fn test_explicit_socket() {
        let mut host = FakeHost::installed()
            .with_process(1, b"qemu-system-x86_64\0-qmp\0unix:/tmp/a,server\0");

        let outcome = plugin(&["socket=/custom/sock"]).setup(&mut host);

        assert_eq!(
            outcome,
            Collection::Collected {
                hypervisor: PathBuf::from("/usr/bin/qemu-system-x86_64"),
                sockets: vec!["/custom/sock".to_string()],
            }
        );
        assert_eq!(
            host.command_lines(),
            vec![
                "/usr/bin/qemu-system-x86_64 --version",
                "/usr/bin/qmp-regdump -s /custom/sock"
            ]
        );
    }

    #[test]
    // One dump per guest, with kernel and map file passed through
    fn test_dump_every_guest() {
        let mut host = FakeHost::installed()
            .with_process(100, b"qemu-system-x86_64\0-qmp\0unix:/run/vm1.qmp,server,nowait\0")
            .with_vanished_process(101)
            .with_process(102, b"bash\0")
            .with_process(103, b"qemu-system-aarch64\0-qmp\0tcp:127.0.0.1:4444,server\0");

        let outcome = plugin(&["kernel=/srv/vmlinux", "mapfile=/srv/System.map"]).setup(&mut host);

        assert_eq!(
            outcome,
            Collection::Collected {
                hypervisor: PathBuf::from("/usr/bin/qemu-system-x86_64"),
                sockets: vec!["/run/vm1.qmp".to_string(), "127.0.0.1:4444".to_string()],
            }
        );
        assert_eq!(
            host.command_lines(),
            vec![
                "/usr/bin/qemu-system-x86_64 --version",
                "/usr/bin/qmp-regdump -k /srv/vmlinux -m /srv/System.map -s /run/vm1.qmp",
                "/usr/bin/qmp-regdump -k /srv/vmlinux -m /srv/System.map -s 127.0.0.1:4444",
            ]
        );
        assert_eq!(host.commands[1].suggest_filename, "qmp-regdump-/run/vm1.qmp");
        assert_eq!(host.commands[2].suggest_filename, "qmp-regdump-127.0.0.1:4444");
        assert!(host.notes.is_empty());
        assert!(host.alerts.is_empty());
    }

    #[test]
    fn test_strict_pattern_option() {
        let mut host = FakeHost::installed().with_process(
            7,
            b"qemu-system-x86_64\0-qmp\0unix:/run/q.sock,server\0-netdev\0user,hostfwd=tcp::2222-:22\0",
        );

        let outcome = plugin(&["pattern=strict"]).setup(&mut host);

        assert_eq!(plugin(&["pattern=strict"]).options().pattern, PatternMode::Strict);
        assert!(matches!(
            outcome,
            Collection::Collected { ref sockets, .. } if sockets == &vec!["/run/q.sock".to_string()]
        ));
    }

    #[test]
    fn test_collection_display() {
        assert_eq!(Collection::NoSockets.to_string(), "no QMP sockets found");
        let collected = Collection::Collected {
            hypervisor: PathBuf::from("/usr/bin/qemu-system-x86_64"),
            sockets: vec!["/a".to_string(), "/b".to_string()],
        };
        assert_eq!(collected.to_string(), "collected 2 register dump(s)");
    }
}
