pub mod hypervisor;
pub mod qmp_sockets;
pub mod regdump_command;

pub use hypervisor::{locate_hypervisor, version_command};
pub use qmp_sockets::{SocketPattern, discover_sockets};
pub use regdump_command::RegdumpInvocation;

use std::fmt;

/// An external command whose output the host captures into a report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Artifact name before the host turns it into a file name.
    pub suggest_filename: String,
}

impl CollectedCommand {
    pub fn new(program: impl Into<String>, suggest_filename: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            suggest_filename: suggest_filename.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for CollectedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
