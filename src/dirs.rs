use std::path::PathBuf;

pub(crate) fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("vidhop")).or_else(|| {
        std::env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(|path| path.join("vidhop-config")))
    })
}

pub(crate) fn get_config_file() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}
