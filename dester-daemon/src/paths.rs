use std::path::{Path, PathBuf};

pub const DAEMON_CONFIG_FILE: &str = "rclone.conf";
pub const DAEMON_BINARY_NAME: &str = "rclone";

pub fn dester_root(home: &Path) -> PathBuf {
    dester_core::store::data_dir_at(home)
}

pub fn daemon_config_path(home: &Path) -> PathBuf {
    dester_root(home).join(DAEMON_CONFIG_FILE)
}

pub fn rc_address(port: u16) -> String {
    format!("localhost:{port}")
}

pub fn rc_base_url(port: u16) -> String {
    format!("http://{}", rc_address(port))
}
