use clap::Args;
use std::sync::Arc;

use packagefs::volume::Volume;
use packagefs_shared::control::{
    ActivationChangeItem, ActivationChangeKind, ActivationChangeRequest,
};

#[derive(Args, Debug)]
pub struct ActivateArgs {
    /// Package files to activate.
    #[arg(long = "add", num_args = 0..)]
    pub add: Vec<String>,

    /// Package files to deactivate.
    #[arg(long = "remove", num_args = 0..)]
    pub remove: Vec<String>,

    /// Package files to reactivate (reload in place).
    #[arg(long = "refresh", num_args = 0..)]
    pub refresh: Vec<String>,
}

pub fn execute(volume: &Arc<Volume>, args: ActivateArgs) -> anyhow::Result<()> {
    let live = volume
        .domains()
        .into_iter()
        .next()
        .expect("mounted volume has a live packages directory");

    let mut items = Vec::new();
    let mut push = |names: &[String], kind: ActivationChangeKind| {
        for name in names {
            items.push(ActivationChangeItem {
                kind,
                parent_device_id: live.device_id() as u32,
                parent_directory_id: live.node_id(),
                name: name.clone(),
            });
        }
    };
    push(&args.add, ActivationChangeKind::Activate);
    push(&args.remove, ActivationChangeKind::Deactivate);
    push(&args.refresh, ActivationChangeKind::Reactivate);

    if items.is_empty() {
        anyhow::bail!("nothing to do; pass --add, --remove or --refresh");
    }

    volume.change_activation(&ActivationChangeRequest { items })?;

    let mut packages = volume.package_infos();
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    println!("{} active package(s):", packages.len());
    for package in packages {
        println!("  {}", package.name);
    }
    Ok(())
}
