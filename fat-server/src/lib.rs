mod cli;
pub mod protocol;
mod server;

pub use self::{
    cli::Cli,
    server::{Server, ShutdownHandle},
};
