use clap::Args;
use std::sync::Arc;

use packagefs::volume::Volume;

#[derive(Args, Debug)]
pub struct ReadlinkArgs {
    pub path: String,
}

pub fn execute(volume: &Arc<Volume>, args: ReadlinkArgs) -> anyhow::Result<()> {
    let node = super::resolve(volume, &args.path)?;
    println!("{}", volume.read_symlink(&node)?);
    Ok(())
}
