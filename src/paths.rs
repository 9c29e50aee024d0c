use std::path::PathBuf;
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

const APP_DIR_NAME: &str = "biometry-ocr";

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the default config path: `<exe_dir>/config.json`
pub fn get_default_config_path() -> PathBuf {
    get_exe_dir().join("config.json")
}

/// Returns the local tessdata directory used when the system installation
/// lacks a requested language: `<data_local_dir>/biometry-ocr/tessdata/`
pub fn get_tessdata_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| get_exe_dir().clone())
        .join(APP_DIR_NAME)
        .join("tessdata")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        assert!(get_default_config_path().ends_with("config.json"));
        assert_eq!(get_default_config_path().parent(), Some(get_exe_dir().as_path()));

        let tessdata = get_tessdata_dir();
        assert!(tessdata.ends_with("biometry-ocr/tessdata"));
    }
}
