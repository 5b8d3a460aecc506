use std::io;
use std::sync::Arc;

use clap::Parser;
use fat::FatFileSystem;
use fat_server::{Cli, Server};
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let geometry = cli.geometry().map_err(io::Error::other)?;
    log::info!(
        "store={:?} size={} files={} blocks={}x{}",
        cli.store,
        ByteSizeIec(geometry.total_size),
        geometry.max_files,
        geometry.max_blocks,
        geometry.block_size
    );

    let fs = Arc::new(FatFileSystem::open(&cli.store, geometry).map_err(io::Error::other)?);
    let server = Server::bind(cli.listen, fs.clone())?;
    println!("Server started. Listening on {}...", server.local_addr()?);
    server.run()?;

    fs.close().map_err(io::Error::other)
}
