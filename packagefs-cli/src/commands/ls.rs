use clap::Args;
use std::sync::Arc;

use packagefs::volume::Volume;

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Directory to list.
    #[arg(default_value = "/")]
    pub path: String,

    /// Long listing with mode, size and mtime.
    #[arg(short, long)]
    pub long: bool,
}

pub fn execute(volume: &Arc<Volume>, args: LsArgs) -> anyhow::Result<()> {
    let node = super::resolve(volume, &args.path)?;
    for child in super::list_children(volume, &node)? {
        if args.long {
            println!("{}", super::format_entry(volume, &child));
        } else {
            println!("{}", child.name());
        }
    }
    Ok(())
}
