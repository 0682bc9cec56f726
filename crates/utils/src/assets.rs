use std::path::PathBuf;

use directories::ProjectDirs;

/// Directory holding the database and config file.
///
/// `CROWDWORK_ASSET_DIR` wins when set; debug builds use a `dev_assets`
/// folder next to the workspace so local runs never touch real data.
pub fn asset_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CROWDWORK_ASSET_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../dev_assets")
    } else {
        ProjectDirs::from("org", "crowdwork", "crowdwork")
            .expect("OS didn't give us a home directory")
            .data_dir()
            .to_path_buf()
    }
    // ✔ Linux → ~/.local/share/crowdwork
    // ✔ macOS → ~/Library/Application Support/org.crowdwork.crowdwork
}

pub fn config_path() -> PathBuf {
    asset_dir().join("config.json")
}

pub fn database_path() -> PathBuf {
    asset_dir().join("db.sqlite")
}
