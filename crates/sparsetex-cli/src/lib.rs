//! # Sparsetex CLI
//!
//! Headless tools around the residency manager.
//!
//! ## Commands
//! - `run` - Drive the frame loop against the software device
//! - `inspect` - Print the mip pyramid of an image and its page coverage
//! - `pages` - Print the software device's page size table

pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sparsetex_assets::{FileImageSource, ImageSource};
use sparsetex_core::{PixelFormat, ResidencyConfig, TextureTarget};
use sparsetex_renderer::{
    PageSize, ResidencyManager, SoftwareDevice, SoftwareDeviceConfig, SparseDevice,
};

pub use run::{RunOptions, RunSummary};

/// Sparse texture residency CLI
#[derive(Parser)]
#[command(name = "sparsetex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Built-in configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// One 2D texture per image, cap 64
    Default,
    /// One image in layer 0 of a 4096x4096x2 array texture
    Atlas,
    /// Cap 3, 100 ms ticks
    Quick,
}

impl Preset {
    pub fn config(self) -> ResidencyConfig {
        match self {
            Self::Default => ResidencyConfig::default(),
            Self::Atlas => ResidencyConfig::atlas(),
            Self::Quick => ResidencyConfig::quick(),
        }
    }
}

/// Texture target names on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    #[value(name = "2d")]
    Texture2D,
    #[value(name = "2d-array")]
    Texture2DArray,
}

impl From<TargetArg> for TextureTarget {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Texture2D => TextureTarget::Texture2D,
            TargetArg::Texture2DArray => TextureTarget::Texture2DArray,
        }
    }
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Drive the frame loop against the software device
    Run {
        /// Images to admit, one per frame
        images: Vec<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Built-in configuration used without --config
        #[arg(long, value_enum, default_value = "default")]
        preset: Preset,

        /// Generated checkerboards to admit when no images are given
        #[arg(long, default_value = "8")]
        synthetic: usize,

        /// Frames to simulate
        #[arg(short, long, default_value = "600")]
        frames: u64,

        /// Simulated frame rate
        #[arg(long, default_value = "60")]
        fps: f64,

        /// Override the admission cap
        #[arg(long)]
        cap: Option<usize>,

        /// Override the eviction tick interval in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Keep image rows top-down
        #[arg(long)]
        no_flip: bool,

        /// Disable bindless handles on the device
        #[arg(long)]
        classic: bool,

        /// Print the effective configuration as JSON and exit
        #[arg(long)]
        dump_config: bool,
    },

    /// Print the mip pyramid of an image and how it maps onto pages
    Inspect {
        /// Image file (DDS, PNG, JPEG, TGA, BMP)
        image: PathBuf,

        /// Place the image in the atlas layout instead of its own texture
        #[arg(long)]
        atlas: bool,
    },

    /// Print the software device's page size table
    Pages {
        /// Target to list
        #[arg(long, value_enum, default_value = "2d")]
        target: TargetArg,
    },
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Run {
            images,
            config,
            preset,
            synthetic,
            frames,
            fps,
            cap,
            tick_ms,
            no_flip,
            classic,
            dump_config,
        } => {
            let mut residency = match config {
                Some(path) => ResidencyConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => preset.config(),
            };
            if let Some(cap) = cap {
                residency.admission_cap = cap;
            }
            if let Some(tick_ms) = tick_ms {
                residency.tick_interval_ms = tick_ms;
            }
            residency.validate()?;

            if dump_config {
                println!("{}", serde_json::to_string_pretty(&residency)?);
                return Ok(());
            }

            let options = RunOptions {
                config: residency,
                images,
                synthetic,
                frames,
                fps,
                flip_rows: !no_flip,
                bindless: !classic,
            };
            let summary = run::run(&options)?;
            log::info!("{summary}");
        }

        Commands::Inspect { image, atlas } => {
            let desc = FileImageSource::default()
                .load(&image)
                .with_context(|| format!("loading {}", image.display()))?;
            println!(
                "{}: {} {}, {} of {} mips, {} bytes",
                desc.name(),
                desc.extent(),
                desc.format(),
                desc.mip_count(),
                desc.full_mip_count(),
                desc.total_bytes()
            );
            for (mip, level) in desc.mips().iter().enumerate() {
                println!(
                    "  mip {mip:2}: {:>12} {:>10} bytes",
                    format!("{}x{}", level.extent.x, level.extent.y),
                    level.data.len()
                );
            }

            let config = if atlas {
                ResidencyConfig::atlas()
            } else {
                ResidencyConfig::default()
            };
            let device = SoftwareDevice::new(SoftwareDeviceConfig::default());
            let mut manager = ResidencyManager::new(device, config)?;
            manager.try_admit(&desc)?;
            if let Some(slot) = manager.table().slots().next() {
                match slot.geometry() {
                    Some(geometry) => println!(
                        "Sparse {} storage {}: {} pages, mips {}..={} committed ({} pages, {} KiB), max sparse level {}",
                        slot.target(),
                        slot.extent(),
                        geometry.page.extent(),
                        slot.committed_base_mip(),
                        slot.committed_max_mip(),
                        slot.committed_pages(),
                        slot.committed_bytes() / 1024,
                        geometry.max_sparse_level
                    ),
                    None => println!(
                        "Fully backed {} storage {}: no mip can be committed page by page ({} KiB)",
                        slot.target(),
                        slot.extent(),
                        slot.committed_bytes() / 1024
                    ),
                }
            }
            manager.release()?;
        }

        Commands::Pages { target } => {
            let device = SoftwareDevice::new(SoftwareDeviceConfig::default());
            let target: TextureTarget = target.into();
            println!("Virtual page sizes for {target} textures:");
            for format in PixelFormat::ALL {
                let sizes = device.virtual_page_sizes(target, format);
                match sizes.first().copied().map(PageSize) {
                    Some(page) => println!(
                        "  {:<10} {:>12} {:>6} KiB",
                        format.to_string(),
                        format!("{}x{}x{}", page.extent().x, page.extent().y, page.extent().z),
                        page.bytes(format) / 1024
                    ),
                    None => println!("  {:<10} not sparse", format.to_string()),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from(["sparsetex", "run"]);
        if let Commands::Run {
            images,
            preset,
            synthetic,
            frames,
            cap,
            ..
        } = cli.command
        {
            assert!(images.is_empty());
            assert_eq!(preset, Preset::Default);
            assert_eq!(synthetic, 8);
            assert_eq!(frames, 600);
            assert_eq!(cap, None);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "sparsetex", "-v", "run", "a.png", "b.dds", "--preset", "quick", "--cap", "2",
            "--tick-ms", "250", "--classic",
        ]);
        assert!(cli.verbose);
        if let Commands::Run {
            images,
            preset,
            cap,
            tick_ms,
            classic,
            no_flip,
            ..
        } = cli.command
        {
            assert_eq!(images, vec![PathBuf::from("a.png"), PathBuf::from("b.dds")]);
            assert_eq!(preset, Preset::Quick);
            assert_eq!(cap, Some(2));
            assert_eq!(tick_ms, Some(250));
            assert!(classic);
            assert!(!no_flip);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_pages_command() {
        let cli = Cli::parse_from(["sparsetex", "pages", "--target", "2d-array"]);
        assert!(matches!(
            cli.command,
            Commands::Pages {
                target: TargetArg::Texture2DArray
            }
        ));
    }

    #[test]
    fn test_inspect_command() {
        assert!(Cli::try_parse_from(["sparsetex", "inspect"]).is_err());

        let cli = Cli::parse_from(["sparsetex", "inspect", "photo.png", "--atlas"]);
        if let Commands::Inspect { image, atlas } = cli.command {
            assert_eq!(image, PathBuf::from("photo.png"));
            assert!(atlas);
        } else {
            panic!("Expected Inspect command");
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(Preset::Atlas.config().admission_cap, 1);
        assert_eq!(Preset::Quick.config().tick_interval_ms, 100);
        assert_eq!(Preset::Default.config(), ResidencyConfig::default());
    }
}
