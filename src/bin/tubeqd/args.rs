use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;
use tubeq::config::Config;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub(crate) listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 11300)]
    pub(crate) port: u16,
    /// Enables write-ahead logging and set the directory to store WAL files in.
    #[arg(short = 'b', long)]
    pub(crate) wal_dir: Option<PathBuf>,
    /// Sets the maximum allowed job size.
    #[arg(short = 'z', long, default_value_t = 65535)]
    pub(crate) max_job_size: u32,
    /// Size reported for WAL files in server stats.
    #[arg(long, default_value_t = 10 << 20)]
    pub(crate) binlog_max_size: u64,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            max_job_size: args.max_job_size,
            binlog_max_size: args.binlog_max_size,
        }
    }
}
