//! QMP socket discovery.
//!
//! Running QEMU guests are found by matching each process command line
//! against a single regular expression. Two patterns exist:
//!
//! * [`PatternMode::Compat`] is the expression the sosreport plugin has always
//!   used, `.*qemu-system-.*-qmp.*[unix|tcp]:([^\x00|,]*)`. `[unix|tcp]` is a
//!   character class (`u n i x | t c p`), not an alternation, and the greedy
//!   `.*` in front of it selects the *last* `<class char>:` of the whole
//!   command line. A guest started with `-qmp unix:/run/q.sock,server` and
//!   later `hostfwd=tcp::2222-:22` is therefore reported as `:2222-:22`.
//!   Kept as the default so reports stay comparable with older collections.
//! * [`PatternMode::Strict`] only accepts a `unix:` or `tcp:` value directly
//!   following the `-qmp` flag.
//!
//! The capture stops at the next NUL or comma in both modes.

use crate::options::PatternMode;
use crate::utils::errors::RegdumpError;
use crate::utils::psutils::ProcessTable;
use log::{debug, info, warn};
use regex::bytes::Regex;

const COMPAT_PATTERN: &str = r"(?-u).*qemu-system-.*-qmp.*[unix|tcp]:([^\x00|,]*)";
const STRICT_PATTERN: &str = r"(?-u)qemu-system-.*-qmp[\x00 =](?:unix|tcp):([^\x00,]*)";

#[derive(Debug, Clone)]
pub struct SocketPattern {
    mode: PatternMode,
    regex: Regex,
}

impl SocketPattern {
    pub fn new(mode: PatternMode) -> Result<Self, RegdumpError> {
        let source = match mode {
            PatternMode::Compat => COMPAT_PATTERN,
            PatternMode::Strict => STRICT_PATTERN,
        };
        Ok(Self {
            mode,
            regex: Regex::new(source)?,
        })
    }

    pub fn mode(&self) -> PatternMode {
        self.mode
    }

    /// Socket address referenced by `cmdline`, if it is a QEMU process with a
    /// QMP socket. Invalid UTF-8 in the address is replaced.
    pub fn extract(&self, cmdline: &[u8]) -> Option<String> {
        let captures = self.regex.captures(cmdline)?;
        let address = captures.get(1)?.as_bytes();
        if address.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(address).into_owned())
    }
}

/// Sockets to dump, in process-table order.
///
/// An explicit socket short-circuits the scan. Processes that exit while the
/// table is being read are skipped.
pub fn discover_sockets<P: ProcessTable + ?Sized>(
    explicit: Option<&str>,
    table: &P,
    pattern: &SocketPattern,
) -> Vec<String> {
    if let Some(socket) = explicit {
        info!("Using configured QMP socket {}", socket);
        return vec![socket.to_string()];
    }

    let pids = match table.pids() {
        Ok(pids) => pids,
        Err(e) => {
            warn!("Unable to list processes: {}", e);
            return Vec::new();
        }
    };

    let mut sockets = Vec::new();
    for pid in pids {
        let cmdline = match table.cmdline(pid) {
            Ok(cmdline) => cmdline,
            Err(e) => {
                debug!("Skipping pid {}: {}", pid, e);
                continue;
            }
        };

        if let Some(socket) = pattern.extract(&cmdline) {
            debug!("pid {} exposes QMP socket {}", pid, socket);
            sockets.push(socket);
        }
    }

    info!(
        "Found {} QMP socket(s) ({} pattern)",
        sockets.len(),
        pattern.mode()
    );
    sockets
}
