use clap::Args;
use std::sync::Arc;

use packagefs::node::NodeRef;
use packagefs::volume::Volume;

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Subtree to print.
    #[arg(default_value = "/")]
    pub path: String,
}

pub fn execute(volume: &Arc<Volume>, args: TreeArgs) -> anyhow::Result<()> {
    let node = super::resolve(volume, &args.path)?;
    println!("{}", if args.path == "/" { "/" } else { &args.path });
    print_subtree(volume, &node, 1)?;
    Ok(())
}

fn print_subtree(volume: &Arc<Volume>, node: &NodeRef, depth: usize) -> anyhow::Result<()> {
    for child in super::list_children(volume, node)? {
        let indent = "  ".repeat(depth);
        let stat = volume.read_stat(&child);
        if child.is_directory() {
            println!("{indent}{}/", child.name());
            print_subtree(volume, &child, depth + 1)?;
        } else if stat.mode & 0o170000 == 0o120000 {
            let target = volume.read_symlink(&child)?;
            println!("{indent}{} -> {}", child.name(), target);
        } else {
            println!("{indent}{} ({} bytes)", child.name(), stat.size);
        }
    }
    Ok(())
}
