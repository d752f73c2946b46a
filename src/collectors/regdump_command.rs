use crate::collectors::CollectedCommand;
use crate::options::RegdumpOptions;

pub const ARTIFACT_PREFIX: &str = "qmp-regdump-";

/// Builds one `qmp-regdump` invocation per socket.
#[derive(Debug, Clone)]
pub struct RegdumpInvocation<'a> {
    tool: &'a str,
    kernel: Option<&'a str>,
    mapfile: Option<&'a str>,
}

impl<'a> RegdumpInvocation<'a> {
    pub fn new(tool: &'a str, kernel: Option<&'a str>, mapfile: Option<&'a str>) -> Self {
        Self {
            tool,
            kernel,
            mapfile,
        }
    }

    pub fn from_options(options: &'a RegdumpOptions) -> Self {
        Self::new(options.tool_path(), options.kernel(), options.mapfile())
    }

    /// `<tool> [-k <kernel>] [-m <mapfile>] -s <socket>`
    pub fn for_socket(&self, socket: &str) -> CollectedCommand {
        let mut command =
            CollectedCommand::new(self.tool, format!("{}{}", ARTIFACT_PREFIX, socket));
        if let Some(kernel) = self.kernel {
            command = command.arg("-k").arg(kernel);
        }
        if let Some(mapfile) = self.mapfile {
            command = command.arg("-m").arg(mapfile);
        }
        command.arg("-s").arg(socket)
    }

    pub fn for_sockets(&self, sockets: &[String]) -> Vec<CollectedCommand> {
        sockets.iter().map(|socket| self.for_socket(socket)).collect()
    }
}
