use crate::limits::DEFAULT_TILE_SIZE;

/// Runs the native stream validator over both streams when a command buffer ends.
pub const VALIDATE_STREAMS_ENV: &str = "VKMTL_VALIDATE_STREAMS";

/// Forces every render pass to load its attachments and clear them with explicit clears.
pub const FORCE_ATTACHMENT_LOAD_ENV: &str = "VKMTL_FORCE_ATTACHMENT_LOAD";

/// Device-wide recording configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Validate the recorded native streams at `end()`; a violation is a bug in the engine.
    pub validate_streams: bool,
    /// Never start a render pass with a clear load action.
    pub force_attachment_load: bool,
    /// Rasterizer tile size used to decide whether a render area is tile aligned.
    pub tile_size: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            validate_streams: cfg!(debug_assertions),
            force_attachment_load: false,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

impl DeviceConfig {
    /// Default configuration with overrides from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env_var_truthy(VALIDATE_STREAMS_ENV) {
            config.validate_streams = true;
        }
        if env_var_truthy(FORCE_ATTACHMENT_LOAD_ENV) {
            config.force_attachment_load = true;
        }
        config
    }

    pub(crate) fn tile_mask(&self) -> u32 {
        debug_assert!(self.tile_size.is_power_of_two());
        self.tile_size - 1
    }
}

fn env_var_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };

    is_truthy(&raw)
}

fn is_truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(is_truthy(v), "{v:?} should be truthy");
        }
        for v in ["", "0", "false", "off", "2"] {
            assert!(!is_truthy(v), "{v:?} should not be truthy");
        }
    }

    #[test]
    fn default_tile_mask() {
        assert_eq!(DeviceConfig::default().tile_mask(), 31);
    }
}
