use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, builder::RangedU64ValueParser};

use crate::engine::{DEFAULT_INTAKE_CAPACITY, EngineConfig};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address for the REST interface. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub http_listen: SocketAddr,

    /// Socket address for the line-delimited JSON interface.
    #[arg(long, default_value = "127.0.0.1:8081")]
    pub tcp_listen: SocketAddr,

    /// Operations the store buffers before callers have to wait.
    #[arg(long, default_value_t = DEFAULT_INTAKE_CAPACITY, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub intake_capacity: usize,

    /// JSON object of `{"<id>": <value>}` pairs loaded into the store at startup.
    #[arg(long)]
    pub seed: Option<PathBuf>,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            intake_capacity: self.intake_capacity,
        }
    }
}
