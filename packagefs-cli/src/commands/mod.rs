pub mod activate;
pub mod cat;
pub mod info;
pub mod ls;
pub mod readlink;
pub mod stat;
pub mod tree;

use anyhow::Context;
use std::sync::Arc;

use packagefs::node::NodeRef;
use packagefs::volume::Volume;

use crate::cli::{Cli, Commands};

pub fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let volume = cli.global.mount()?;
    let result = match cli.command {
        Commands::Ls(args) => ls::execute(&volume, args),
        Commands::Tree(args) => tree::execute(&volume, args),
        Commands::Cat(args) => cat::execute(&volume, args),
        Commands::Stat(args) => stat::execute(&volume, args),
        Commands::Readlink(args) => readlink::execute(&volume, args),
        Commands::Info(args) => info::execute(&volume, args),
        Commands::Activate(args) => activate::execute(&volume, args),
    };
    volume.unmount();
    result
}

/// Resolve a slash-separated path from the volume root.
pub fn resolve(volume: &Arc<Volume>, path: &str) -> anyhow::Result<NodeRef> {
    let mut node = volume.root_directory().clone();
    for component in path.split('/').filter(|component| !component.is_empty()) {
        node = volume
            .lookup(&node, component)
            .with_context(|| format!("resolving {path}"))?;
    }
    Ok(node)
}

/// Children of a directory node, in readdir order, without "." and "..".
pub fn list_children(volume: &Arc<Volume>, node: &NodeRef) -> anyhow::Result<Vec<NodeRef>> {
    let mut iterator = volume.open_dir(node)?;
    let mut buffer = vec![0u8; 64 * 1024];
    let count = volume.read_dir(&mut iterator, &mut buffer, u32::MAX)?;
    let records = packagefs::vfs::dirent::parse_records(&buffer, count)?;

    let mut children = Vec::new();
    for record in records {
        if record.name == "." || record.name == ".." {
            continue;
        }
        children.push(volume.lookup(node, &record.name)?);
    }
    Ok(children)
}

/// One `ls -l` style line for a node.
pub fn format_entry(volume: &Arc<Volume>, node: &NodeRef) -> String {
    let stat = volume.read_stat(node);
    let kind = match stat.mode & libc_ifmt() {
        bits if bits == libc_ifdir() => 'd',
        bits if bits == libc_iflnk() => 'l',
        _ => '-',
    };
    format!(
        "{kind}{:03o} {:>8} {:>10} {}",
        stat.mode & 0o777,
        stat.size,
        stat.modified_time,
        node.name()
    )
}

// Mode-bit helpers; keeps libc out of the individual commands.
fn libc_ifmt() -> u32 {
    0o170000
}

fn libc_ifdir() -> u32 {
    0o040000
}

fn libc_iflnk() -> u32 {
    0o120000
}
