mod utils {
    pub mod errors;
    pub mod logger;
    pub mod psutils;
}

// Plugin modules
pub mod collectors;
pub mod options;
pub mod regdump_plugin;
pub mod report;

use clap::{ArgAction, Parser};
use log::{error, info};
use options::{OPTION_TABLE, PLUGIN_NAME, RegdumpOptions};
use regdump_plugin::RegdumpPlugin;
use report::ReportHost;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use utils::errors::RegdumpError;
use utils::psutils::ProcFs;

/// Collect qmp-regdump register dumps from every running QEMU guest.
#[derive(Parser, Debug)]
#[clap(about, long_about = None, version)]
struct Args {
    /// Report directory [default: qemu-regdump-<timestamp>]
    #[clap(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Plugin option as [qemu_regdump.]NAME=VALUE, may be repeated
    #[clap(short = 'k', long = "plugin-option", value_name = "OPTION")]
    plugin_options: Vec<String>,
    /// TOML file with a [qemu_regdump] table
    #[clap(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Root of the process information filesystem
    #[clap(long, value_name = "DIR", default_value = utils::psutils::DEFAULT_PROC_ROOT)]
    proc_root: PathBuf,
    /// Per-command timeout in seconds, 0 waits forever
    #[clap(long, value_name = "SECS", default_value_t = report::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
    /// List plugin options and exit
    #[clap(short, long)]
    list_options: bool,
    /// Print extra output while collecting
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    utils::logger::setup_logger(args.verbose);

    if args.list_options {
        print_options();
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), RegdumpError> {
    let mut options = match args.config {
        Some(ref path) => RegdumpOptions::load(path)?,
        None => RegdumpOptions::default(),
    };
    for arg in &args.plugin_options {
        options.apply_arg(arg)?;
    }

    let plugin = RegdumpPlugin::new(options)?;
    info!(
        "Plugin {} using {} ({} pattern)",
        RegdumpPlugin::NAME,
        plugin.options().tool_path(),
        plugin.options().pattern
    );

    let output = args.output.unwrap_or_else(default_report_dir);
    let timeout = (args.timeout > 0).then(|| Duration::from_secs(args.timeout));
    let processes = ProcFs::new(&args.proc_root);
    info!("Scanning processes under {}", processes.root().display());

    let mut host = ReportHost::create(output, processes, timeout)?;
    let collection = plugin.setup(&mut host);
    let root = host.root().to_path_buf();
    let manifest = host.finish()?;

    info!(
        "{}: {} ({} command(s), {} alert(s)) in {}",
        RegdumpPlugin::NAME,
        collection,
        manifest.commands.len(),
        manifest.alerts.len(),
        root.display()
    );
    Ok(())
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(format!(
        "qemu-regdump-{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}

fn print_options() {
    println!("The following plugin options are available:\n");
    for (name, default, description) in OPTION_TABLE {
        let default = if default.is_empty() { "\"\"" } else { *default };
        println!(
            "  {:<28} {:<24} {}",
            format!("{}.{}", PLUGIN_NAME, name),
            default,
            description
        );
    }
}
