use anyhow::Context;
use clap::Args;
use std::io::Write;
use std::sync::Arc;

use packagefs::volume::Volume;

#[derive(Args, Debug)]
pub struct CatArgs {
    pub path: String,
}

pub fn execute(volume: &Arc<Volume>, args: CatArgs) -> anyhow::Result<()> {
    let node = super::resolve(volume, &args.path)?;
    let size = volume.read_stat(&node).size;

    let mut stdout = std::io::stdout().lock();
    let mut offset = 0u64;
    let mut buffer = vec![0u8; 64 * 1024];
    while offset < size {
        let read = volume
            .read(&node, offset, &mut buffer)
            .with_context(|| format!("reading {}", args.path))?;
        if read == 0 {
            break;
        }
        stdout.write_all(&buffer[..read])?;
        offset += read as u64;
    }
    Ok(())
}
