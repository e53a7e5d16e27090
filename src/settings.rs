// ============================================================================
// EDITOR SETTINGS — persisted as `key=value` lines
// ============================================================================

use std::path::{Path, PathBuf};

use crate::canvas::{DEFAULT_MAX_LAYERS, MAX_ZOOM_PERCENT, MIN_ZOOM_PERCENT};
use crate::error::Result;
use crate::ops::filters::MedianBorder;
use crate::ops::transform::Interpolation;

const SETTINGS_FILE: &str = "gb7edit_settings.cfg";

#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    /// Layer stack cap.
    pub max_layers: usize,
    /// Largest width or height a resize may produce.
    pub max_resize_dimension: u32,
    /// Used for resize and for the zoomed view.
    pub interpolation: Interpolation,
    pub zoom_percent: u32,
    pub jpeg_quality: u8,
    pub median_border: MedianBorder,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_layers: DEFAULT_MAX_LAYERS,
            max_resize_dimension: 2000,
            interpolation: Interpolation::Bilinear,
            zoom_percent: 100,
            jpeg_quality: 90,
            median_border: MedianBorder::Unfiltered,
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/gb7edit/gb7edit_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\gb7edit\gb7edit_settings.cfg
    /// On macOS:   ~/Library/Application Support/gb7edit/gb7edit_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("gb7edit").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("gb7edit")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("gb7edit").join(SETTINGS_FILE))
        }
    }

    /// Load from the default location (defaults if the file is missing).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`. Missing file, unknown keys and bad values all fall
    /// back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_layers" => {
                    if let Ok(v) = val.parse::<usize>()
                        && v >= 1
                    {
                        s.max_layers = v;
                    }
                }
                "max_resize_dimension" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v >= 1
                    {
                        s.max_resize_dimension = v;
                    }
                }
                "interpolation" => {
                    if let Some(v) = Interpolation::from_name(val) {
                        s.interpolation = v;
                    }
                }
                "zoom_percent" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.zoom_percent = v.clamp(MIN_ZOOM_PERCENT, MAX_ZOOM_PERCENT);
                    }
                }
                "jpeg_quality" => {
                    if let Ok(v) = val.parse::<u8>() {
                        s.jpeg_quality = v.clamp(1, 100);
                    }
                }
                "median_border" => {
                    if let Some(v) = MedianBorder::from_name(val) {
                        s.median_border = v;
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_layers={}\n\
             max_resize_dimension={}\n\
             interpolation={}\n\
             zoom_percent={}\n\
             jpeg_quality={}\n\
             median_border={}\n",
            self.max_layers,
            self.max_resize_dimension,
            self.interpolation.name(),
            self.zoom_percent,
            self.jpeg_quality,
            self.median_border.name(),
        )
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<()> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_known_keys() {
        let s = EditorSettings::parse(
            "max_layers=5\ninterpolation = nearest\nzoom_percent=150\n\
             median_border=clamp\njpeg_quality=70\n",
        );
        assert_eq!(s.max_layers, 5);
        assert_eq!(s.interpolation, Interpolation::Nearest);
        assert_eq!(s.zoom_percent, 150);
        assert_eq!(s.median_border, MedianBorder::Clamp);
        assert_eq!(s.jpeg_quality, 70);
        assert_eq!(s.max_resize_dimension, 2000);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let s = EditorSettings::parse(
            "max_layers=0\ninterpolation=cubic\nzoom_percent=9000\nbogus\n# note=1\nwho=knows\n",
        );
        assert_eq!(s.max_layers, 2);
        assert_eq!(s.interpolation, Interpolation::Bilinear);
        assert_eq!(s.zoom_percent, 300);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("gb7edit-settings-{}", std::process::id()));
        let path = dir.join("nested").join(SETTINGS_FILE);
        let s = EditorSettings {
            max_layers: 4,
            zoom_percent: 50,
            median_border: MedianBorder::Clamp,
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(EditorSettings::load_from(&path), s);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("gb7edit-definitely-missing.cfg");
        assert_eq!(EditorSettings::load_from(&path), EditorSettings::default());
    }
}
