use clap::Args;
use std::sync::Arc;

use packagefs::volume::Volume;

#[derive(Args, Debug)]
pub struct StatArgs {
    pub path: String,
}

pub fn execute(volume: &Arc<Volume>, args: StatArgs) -> anyhow::Result<()> {
    let node = super::resolve(volume, &args.path)?;
    let stat = volume.read_stat(&node);

    println!("  node id: {}", node.id());
    println!("     mode: {:o}", stat.mode);
    println!("      uid: {}", stat.uid);
    println!("      gid: {}", stat.gid);
    println!("     size: {}", stat.size);
    println!("    nlink: {}", stat.nlink);
    println!("    mtime: {}", stat.modified_time);

    let attributes = volume.list_attributes(&node);
    if !attributes.is_empty() {
        println!("attributes:");
        for attribute in attributes {
            println!(
                "  {} ({} bytes, type {:#x})",
                attribute.name,
                attribute.data.len(),
                attribute.type_code
            );
        }
    }
    Ok(())
}
