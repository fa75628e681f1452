use clap::Args;
use std::sync::Arc;

use packagefs::volume::Volume;

#[derive(Args, Debug)]
pub struct InfoArgs {}

pub fn execute(volume: &Arc<Volume>, _args: InfoArgs) -> anyhow::Result<()> {
    let fs = volume.read_fs_info();
    println!("volume: {} ({:?} mount)", fs.volume_name, volume.mount_type());
    println!(
        "flags: read-only={} attributes={} queries={} node-monitoring={}",
        fs.read_only, fs.has_attributes, fs.has_query, fs.has_node_monitoring
    );

    let info = volume.volume_info();
    println!(
        "root: device {} node {}",
        info.root_device_id, info.root_directory_id
    );
    for directory in &info.packages_directories {
        println!(
            "packages directory: device {} node {}",
            directory.device_id, directory.node_id
        );
    }

    let mut packages = volume.package_infos();
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    println!("{} active package(s):", packages.len());
    for package in packages {
        println!("  {}", package.name);
    }
    Ok(())
}
