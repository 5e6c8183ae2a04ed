use std::path::{Path, PathBuf};

pub fn healthsync_root(home: &Path) -> PathBuf {
    home.join(".healthsync")
}

pub fn records_path(home: &Path) -> PathBuf {
    healthsync_core::record_store::store_path_at(home)
}

pub fn health_store_path(home: &Path) -> PathBuf {
    healthsync_sync::sandbox::store_path_at(home)
}

pub fn config_path(home: &Path) -> PathBuf {
    healthsync_core::config::config_path_at(home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_lives_under_one_root() {
        let home = Path::new("/home/someone");
        let root = healthsync_root(home);
        for path in [records_path(home), health_store_path(home), config_path(home)] {
            assert_eq!(path.parent(), Some(root.as_path()));
        }
    }
}
