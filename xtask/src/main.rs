use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::Command;

const EBPF_CRATE: &str = "crates/xdp-engine/ebpf";
const BPF_TARGET: &str = "bpfel-unknown-none";

/// Ironsift 빌드 태스크
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// XDP 커널 프로그램 빌드 (ironsift-ebpf)
    BuildEbpf {
        /// 릴리스 모드로 빌드
        #[arg(long)]
        release: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::BuildEbpf { release } => build_ebpf(release),
    }
}

fn build_ebpf(release: bool) {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(EBPF_CRATE);

    cmd.args([
        "+nightly",
        "build",
        &format!("--target={BPF_TARGET}"),
        "-Z",
        "build-std=core",
    ]);

    if release {
        cmd.arg("--release");
    }

    let status = match cmd.status() {
        Ok(status) => status,
        Err(e) => {
            eprintln!("failed to run cargo for {EBPF_CRATE}: {e}");
            std::process::exit(1);
        }
    };
    if !status.success() {
        eprintln!("XDP program build failed");
        std::process::exit(status.code().unwrap_or(1));
    }

    let profile = if release { "release" } else { "debug" };
    let object = Path::new(EBPF_CRATE)
        .join("target")
        .join(BPF_TARGET)
        .join(profile)
        .join("ironsift-ebpf");
    println!("XDP program built: {}", object.display());
    println!("set capture.xdp_program_path to this path");
}
