pub mod audio;
pub mod frontend;
pub mod num;
pub mod rom;

pub const SAVE_STATE_VERSION: &str = "0.1.0";

pub fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}
