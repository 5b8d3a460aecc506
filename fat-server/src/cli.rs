use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use fat::Geometry;

#[derive(Debug, Parser)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, short, default_value = "127.0.0.1:12345")]
    pub listen: SocketAddr,

    /// Backing store file, created if missing
    #[arg(long, short, default_value = "filesystem.dat")]
    pub store: PathBuf,

    /// Directory table capacity
    #[arg(long, default_value_t = 5)]
    pub max_files: usize,

    /// Total number of blocks, metadata included
    #[arg(long, default_value_t = 10)]
    pub max_blocks: usize,

    /// Block size in bytes
    #[arg(long, default_value_t = 128)]
    pub block_size: usize,

    /// Backing store size in bytes [default: max_blocks * block_size]
    #[arg(long)]
    pub total_size: Option<u64>,
}

impl Cli {
    pub fn geometry(&self) -> fat::Result<Geometry> {
        match self.total_size {
            Some(total_size) => {
                Geometry::new(total_size, self.max_files, self.max_blocks, self.block_size)
            }
            None => Geometry::fitted(self.max_files, self.max_blocks, self.block_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["fat-server"]);
        assert_eq!("127.0.0.1:12345".parse::<SocketAddr>().unwrap(), cli.listen);
        assert_eq!(Geometry::fitted(5, 10, 128).unwrap(), cli.geometry().unwrap());
    }

    #[test]
    fn explicit_geometry() {
        let cli = Cli::parse_from([
            "fat-server",
            "-s",
            "/tmp/x.dat",
            "--max-files",
            "8",
            "--max-blocks",
            "16",
            "--total-size",
            "4096",
        ]);
        let geometry = cli.geometry().unwrap();
        assert_eq!(4096, geometry.total_size);
        assert_eq!(8, geometry.max_files);

        let cli = Cli::parse_from(["fat-server", "--total-size", "10"]);
        assert!(cli.geometry().is_err());
    }
}
