//! Command-line definitions and the shared mount plumbing.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use packagefs::config::MountOptions;
use packagefs::vfs::NoopBridge;
use packagefs::volume::Volume;
use packagefs_shared::control::MountType;

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "pkgfs", about = "Explore the union view of a packages directory")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Packages directory to mount.
    #[arg(long, env = "PKGFS_PACKAGES")]
    pub packages: PathBuf,

    /// Mount type: system, home or custom.
    #[arg(long, default_value = "system")]
    pub mount_type: String,

    /// Mount point; defaults to the parent of the packages directory.
    #[arg(long)]
    pub mount_point: Option<PathBuf>,

    /// Mount an archived packages state instead of the live one.
    #[arg(long)]
    pub state: Option<String>,
}

impl GlobalFlags {
    pub fn mount(&self) -> anyhow::Result<Arc<Volume>> {
        let mut options = MountOptions::new(&self.packages);
        options.mount_type = match self.mount_type.as_str() {
            "system" => MountType::System,
            "home" => MountType::Home,
            "custom" => MountType::Custom,
            other => anyhow::bail!("invalid mount type: {other}"),
        };
        options.mount_point = self.mount_point.clone();
        options.packages_state = self.state.clone();

        let volume = Volume::mount(options, Arc::new(NoopBridge))
            .context("mounting the packages directory")?;
        tracing::debug!(
            packages = volume.packages_snapshot().len(),
            "mounted packages directory"
        );
        Ok(volume)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List a directory.
    Ls(commands::ls::LsArgs),
    /// Print the whole tree.
    Tree(commands::tree::TreeArgs),
    /// Print a file's contents.
    Cat(commands::cat::CatArgs),
    /// Show a node's stat data.
    Stat(commands::stat::StatArgs),
    /// Print a symlink's target.
    Readlink(commands::readlink::ReadlinkArgs),
    /// Show volume and active-package information.
    Info(commands::info::InfoArgs),
    /// Apply activation changes, then show the resulting package set.
    Activate(commands::activate::ActivateArgs),
}
