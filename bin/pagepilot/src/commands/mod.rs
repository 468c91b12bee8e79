pub mod config_cmd;
pub mod runs;
pub mod servers;
pub mod status;
pub mod tools_cmd;
