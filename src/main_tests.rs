use std::path::{Path, PathBuf};

use super::config_base_dir;

#[test]
fn directory_origins_resolve_next_to_the_config_file() {
    assert_eq!(
        config_base_dir(Path::new(".shoplist/config.toml")),
        PathBuf::from(".shoplist")
    );
    assert_eq!(
        config_base_dir(Path::new("/etc/shoplist/config.toml")),
        PathBuf::from("/etc/shoplist")
    );
}

#[test]
fn bare_config_names_resolve_against_the_working_directory() {
    assert_eq!(config_base_dir(Path::new("config.toml")), PathBuf::from("."));
}
