//! Default config location resolution.
//!
//! Kept in its own test binary because it mutates the process environment.

use robomania::config::BotConfig;
use std::path::PathBuf;

#[test]
fn config_path_resolves_to_absolute_platform_dir_or_override() {
    unsafe { std::env::remove_var("ROBOMANIA_CONFIG_DIR") };
    unsafe { std::env::set_var("XDG_CONFIG_HOME", "relative/dir") };

    let path = BotConfig::default_config_path();
    assert!(path.is_absolute(), "got {}", path.display());
    assert!(!path.starts_with("relative"));
    assert!(path.ends_with("robomania/config.toml"));

    unsafe { std::env::set_var("ROBOMANIA_CONFIG_DIR", "/srv/robomania") };
    assert_eq!(
        BotConfig::default_config_path(),
        PathBuf::from("/srv/robomania/config.toml")
    );
}
