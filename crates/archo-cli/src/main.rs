//! Command-line interface for the archo Mach-O editor and signer.
//!
//! Inspects a slice, edits its dylib dependencies, reserves signature space
//! and signs it with a PKCS#12 or PEM identity (or ad-hoc).

use archo::{DylibEditor, DylibKind, MachOContainer, SignOptions, SignatureSpaceAllocator};
use clap::{Args, Parser, Subcommand};
use log::warn;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "archo")]
#[command(about = "Mach-O dylib editor and code signing tool")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print header, signature and dependency summary
    Info {
        /// Input Mach-O file
        input: PathBuf,
    },

    /// List linked dylibs
    List {
        /// Input Mach-O file
        input: PathBuf,
    },

    /// Add a dylib load command
    Inject {
        #[command(flatten)]
        io: EditIo,

        /// Install path of the dylib
        dylib: String,

        /// Use LC_LOAD_WEAK_DYLIB
        #[arg(short, long)]
        weak: bool,
    },

    /// Remove dylib load commands
    Remove {
        #[command(flatten)]
        io: EditIo,

        /// Install paths to remove
        #[arg(required = true)]
        dylibs: Vec<String>,
    },

    /// Change the path of a linked dylib
    Rename {
        #[command(flatten)]
        io: EditIo,

        /// Current install path
        old: String,

        /// New install path
        new: String,
    },

    /// Reserve code signature space without signing
    Reserve {
        #[command(flatten)]
        io: EditIo,

        /// Minimum number of bytes to reserve
        #[arg(short, long, default_value = "0")]
        bytes: u64,
    },

    /// Sign the binary (ad-hoc when no identity is given)
    Sign(SignArgs),
}

#[derive(Args)]
struct EditIo {
    /// Input Mach-O file
    input: PathBuf,

    /// Output file (default: modify input in place)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct SignArgs {
    #[command(flatten)]
    io: EditIo,

    /// Certificate file (PEM or DER)
    #[arg(short = 'c', long)]
    certificate: Option<PathBuf>,

    /// Private key file (PKCS#8 PEM or DER)
    #[arg(short = 'k', long)]
    private_key: Option<PathBuf>,

    /// Intermediate certificates (PEM) to embed after the leaf; repeatable
    #[arg(long = "chain")]
    chain: Vec<PathBuf>,

    /// PKCS#12 file (.p12)
    #[arg(short = 'p', long)]
    pkcs12: Option<PathBuf>,

    /// Password for the PKCS#12 file
    #[arg(long)]
    password: Option<String>,

    /// Provisioning profile
    #[arg(short = 'm', long)]
    profile: Option<PathBuf>,

    /// Entitlements plist (overrides the profile's)
    #[arg(short = 'e', long)]
    entitlements: Option<PathBuf>,

    /// Signing identifier (default: file name)
    #[arg(short = 'b', long)]
    bundle_id: Option<String>,

    /// Info.plist to bind into the signature
    #[arg(long)]
    info_plist: Option<PathBuf>,

    /// CodeResources to bind into the signature
    #[arg(long)]
    code_resources: Option<PathBuf>,

    /// Dylib to inject before signing (repeatable)
    #[arg(short = 'l', long = "inject")]
    inject: Vec<String>,

    /// Inject as weak dylibs
    #[arg(long)]
    weak: bool,

    /// Dylib to remove before signing (repeatable)
    #[arg(long = "remove")]
    remove: Vec<String>,

    /// Replace an existing signature
    #[arg(short, long)]
    force: bool,

    /// Minimum signature space in bytes
    #[arg(long, default_value = "0")]
    reserve: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Info { input } => {
            let container = MachOContainer::open(&input)?;
            print!("{}", container.info());
        }
        Command::List { input } => {
            let container = MachOContainer::open(&input)?;
            for dylib in container.dylibs() {
                println!("{dylib}");
            }
        }
        Command::Inject { io, dylib, weak } => {
            let kind = if weak { DylibKind::Weak } else { DylibKind::Strong };
            edit(&io, |container| DylibEditor::new(container).inject_dylib(&dylib, kind))?;
        }
        Command::Remove { io, dylibs } => {
            let names: BTreeSet<String> = dylibs.into_iter().collect();
            edit(&io, |container| {
                let removed = DylibEditor::new(container).remove_dylibs(&names)?;
                println!("Removed {removed} load command(s)");
                Ok(())
            })?;
        }
        Command::Rename { io, old, new } => {
            edit(&io, |container| DylibEditor::new(container).rename_dylib(&old, &new))?;
        }
        Command::Reserve { io, bytes } => {
            let mut container = MachOContainer::open(&io.input)?;
            let target = io.output.as_ref().unwrap_or(&io.input);
            let reserved = SignatureSpaceAllocator::new()
                .reserve_at_least(bytes)
                .realloc_to(&mut container, target)?;
            println!("Reserved {reserved} bytes: {}", target.display());
        }
        Command::Sign(args) => {
            let output = sign_options(&args).sign_file(&args.io.input)?;
            println!("Signed: {}", output.display());
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Opens the input, applies `op` and writes the result.
fn edit(
    io: &EditIo,
    op: impl FnOnce(&mut MachOContainer) -> archo::Result<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut container = MachOContainer::open(&io.input)?;
    let signed = container.embedded_signature().is_some();
    op(&mut container)?;

    let target = io.output.as_ref().unwrap_or(&io.input);
    container.write_to(target)?;
    if signed {
        warn!("{} has a stale code signature; re-sign it", target.display());
    }
    println!("Wrote: {}", target.display());
    Ok(())
}

fn sign_options(args: &SignArgs) -> SignOptions {
    let mut options = SignOptions::new().force(args.force).reserve(args.reserve);

    if let Some(path) = &args.certificate {
        options = options.certificate(path);
    }
    if let Some(path) = &args.private_key {
        options = options.private_key(path);
    }
    for path in &args.chain {
        options = options.chain(path);
    }
    if let Some(path) = &args.pkcs12 {
        options = options.pkcs12(path);
        options = options.password(args.password.clone().unwrap_or_default());
    }
    if let Some(path) = &args.profile {
        options = options.provisioning_profile(path);
    }
    if let Some(path) = &args.entitlements {
        options = options.entitlements(path);
    }
    if let Some(id) = &args.bundle_id {
        options = options.bundle_id(id.as_str());
    }
    if let Some(path) = &args.info_plist {
        options = options.info_plist(path);
    }
    if let Some(path) = &args.code_resources {
        options = options.code_resources(path);
    }

    let kind = if args.weak { DylibKind::Weak } else { DylibKind::Strong };
    for dylib in &args.inject {
        options = options.inject(dylib.as_str(), kind);
    }
    for dylib in &args.remove {
        options = options.remove(dylib.as_str());
    }
    if let Some(path) = &args.io.output {
        options = options.output(path);
    }
    options
}
