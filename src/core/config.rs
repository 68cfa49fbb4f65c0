use crate::core::errors::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: Level,
}

/// Batch scheduling configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Upper bound on concurrent workers per batch
    pub max_workers: usize,
    /// Delay between successive worker launches (0 disables staggering)
    pub launch_stagger_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            launch_stagger_ms: 4000,
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Vertical tolerance when grouping regions into reading rows
    pub row_threshold: i32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            row_threshold: 30,
        }
    }
}

/// Default languages and recognition engine
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    pub source_language: String,
    pub target_language: String,
    /// Engine selector passed to the recognizer ("auto" resolves per language)
    pub ocr_engine: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            source_language: "zh".to_string(),
            target_language: "ru".to_string(),
            ocr_engine: "auto".to_string(),
        }
    }
}

/// Durable output and scratch locations
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("translated"),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

/// Editing session store configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sessions_dir: PathBuf,
    /// Maximum cached sessions
    pub cache_capacity: usize,
    /// Number of oldest entries dropped when the cache overflows
    pub eviction_batch: usize,
    /// Sessions older than this are reaped
    pub max_age_hours: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("editor_sessions"),
            cache_capacity: 100,
            eviction_batch: 10,
            max_age_hours: 24,
        }
    }
}

/// Layout engine configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    pub font_dir: PathBuf,
    pub default_font_size: u32,
    /// Horizontal slack subtracted from the box width before wrapping
    pub wrap_margin: u32,
    /// Side margin for left/right alignment
    pub align_margin: i32,
    /// Mean luminance below which a region counts as dark
    pub dark_luminance_threshold: f32,
    /// Luminance written into dark regions
    pub dark_fill_value: u8,
    /// Max per-channel spread for a pixel to count as gray
    pub grayscale_tolerance: u8,
    pub inpaint_radius: u32,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            font_dir: PathBuf::from("fonts"),
            default_font_size: crate::core::types::DEFAULT_FONT_SIZE,
            wrap_margin: 15,
            align_margin: 5,
            dark_luminance_threshold: 60.0,
            dark_fill_value: 5,
            grayscale_tolerance: 10,
            inpaint_radius: 7,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub batch: BatchConfig,
    pub detection: DetectionConfig,
    pub languages: LanguageConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub rendering: RenderingConfig,
}

fn default_max_workers() -> usize {
    num_cpus::get().clamp(1, 12)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Self {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let batch = BatchConfig::default();
        let detection = DetectionConfig::default();
        let languages = LanguageConfig::default();
        let storage = StorageConfig::default();
        let session = SessionConfig::default();
        let rendering = RenderingConfig::default();

        Self {
            logging: LoggingConfig { log_level },
            batch: BatchConfig {
                max_workers: env_parse("MAX_WORKERS").unwrap_or(batch.max_workers),
                launch_stagger_ms: env_parse("LAUNCH_STAGGER_MS")
                    .unwrap_or(batch.launch_stagger_ms),
            },
            detection: DetectionConfig {
                confidence_threshold: env_parse("CONFIDENCE_THRESHOLD")
                    .unwrap_or(detection.confidence_threshold),
                row_threshold: env_parse("ROW_THRESHOLD").unwrap_or(detection.row_threshold),
            },
            languages: LanguageConfig {
                source_language: env_string("SOURCE_LANGUAGE")
                    .unwrap_or(languages.source_language),
                target_language: env_string("TARGET_LANGUAGE")
                    .unwrap_or(languages.target_language),
                ocr_engine: env_string("OCR_ENGINE").unwrap_or(languages.ocr_engine),
            },
            storage: StorageConfig {
                output_dir: env_string("OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(storage.output_dir),
                temp_dir: env_string("TEMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(storage.temp_dir),
            },
            session: SessionConfig {
                sessions_dir: env_string("EDITOR_SESSIONS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(session.sessions_dir),
                cache_capacity: env_parse("SESSION_CACHE_SIZE").unwrap_or(session.cache_capacity),
                eviction_batch: env_parse("SESSION_EVICT_BATCH")
                    .unwrap_or(session.eviction_batch),
                max_age_hours: env_parse("SESSION_MAX_AGE_HOURS")
                    .unwrap_or(session.max_age_hours),
            },
            rendering: RenderingConfig {
                font_dir: env_string("FONT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(rendering.font_dir),
                default_font_size: env_parse("DEFAULT_FONT_SIZE")
                    .unwrap_or(rendering.default_font_size),
                dark_luminance_threshold: env_parse("DARK_LUMINANCE_THRESHOLD")
                    .unwrap_or(rendering.dark_luminance_threshold),
                inpaint_radius: env_parse("INPAINT_RADIUS").unwrap_or(rendering.inpaint_radius),
                ..rendering
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if self.batch.max_workers == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.batch.max_workers));
        }

        if self.session.cache_capacity == 0 {
            return Err(ConfigError::InvalidSessionConfig(
                "cache_capacity must be > 0".to_string(),
            ));
        }
        if self.session.eviction_batch == 0
            || self.session.eviction_batch > self.session.cache_capacity
        {
            return Err(ConfigError::InvalidSessionConfig(format!(
                "eviction_batch must be in 1..={}, got {}",
                self.session.cache_capacity, self.session.eviction_batch
            )));
        }

        if !(6..=128).contains(&self.rendering.default_font_size) {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "default_font_size must be between 6 and 128, got {}",
                self.rendering.default_font_size
            )));
        }
        if !(0.0..=255.0).contains(&self.rendering.dark_luminance_threshold) {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "dark_luminance_threshold must be between 0 and 255, got {}",
                self.rendering.dark_luminance_threshold
            )));
        }
        if self.rendering.inpaint_radius == 0 {
            return Err(ConfigError::InvalidRenderingConfig(
                "inpaint_radius must be > 0".to_string(),
            ));
        }

        for dir in [
            &self.storage.output_dir,
            &self.storage.temp_dir,
            &self.session.sessions_dir,
        ] {
            validate_parent_exists(dir)?;
        }

        Ok(())
    }

    pub fn log_level(&self) -> Level {
        self.logging.log_level
    }

    pub fn launch_stagger(&self) -> Duration {
        Duration::from_millis(self.batch.launch_stagger_ms)
    }

    pub fn max_workers(&self) -> usize {
        self.batch.max_workers
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.session.sessions_dir
    }
}

fn validate_parent_exists(dir: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = dir.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ConfigError::InvalidStoragePath(format!(
                "Parent directory does not exist: {}",
                parent.display()
            )));
        }
    }
    Ok(())
}

// Note: No Default implementation because Config::new() can fail.
// Tests build the section structs directly from their defaults.

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        Config {
            logging: LoggingConfig {
                log_level: Level::INFO,
            },
            batch: BatchConfig::default(),
            detection: DetectionConfig::default(),
            languages: LanguageConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            rendering: RenderingConfig::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.cache_capacity, 100);
        assert_eq!(config.session.eviction_batch, 10);
        assert!(config.max_workers() <= 12);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = defaults();
        config.detection.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));

        let mut config = defaults();
        config.batch.max_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerCount(0))
        ));

        let mut config = defaults();
        config.session.eviction_batch = 200;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSessionConfig(_))
        ));
    }
}
