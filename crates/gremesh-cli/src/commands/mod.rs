pub mod config;
pub mod tunnels;
