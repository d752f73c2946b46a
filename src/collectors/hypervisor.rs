use crate::collectors::CollectedCommand;
use crate::regdump_plugin::Host;
use log::{debug, info};
use std::path::{Path, PathBuf};

pub const HYPERVISOR_GLOB: &str = "/usr/bin/qemu-system-*";
pub const VERSION_ARTIFACT: &str = "qemu-version";

/// First installed `qemu-system-*` binary, if any.
pub fn locate_hypervisor<H: Host + ?Sized>(host: &H) -> Option<PathBuf> {
    let candidates = host.glob(HYPERVISOR_GLOB);
    debug!("{} candidates for {}", candidates.len(), HYPERVISOR_GLOB);

    let found = candidates.into_iter().find(|path| host.is_file(path));
    if let Some(ref path) = found {
        info!("Using hypervisor binary {}", path.display());
    }
    found
}

pub fn version_command(binary: &Path) -> CollectedCommand {
    CollectedCommand::new(binary.to_string_lossy(), VERSION_ARTIFACT).arg("--version")
}
