pub mod ask;
pub mod config_cmd;
pub mod resolve;
pub mod serve;
