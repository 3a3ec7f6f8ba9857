use std::env;

/// Engine-wide defaults (spec.md §9 "Configuration ... is passed via the
/// context"). These can be overridden by env vars but do not require any
/// user-authored config file, in the shape of the teacher's
/// `AppDefaults::load()`.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Bytes of trailing padding reserved per rewritten message header
    /// (spec.md §6: "Header padding default is 64 bytes per rewritten
    /// message").
    pub header_padding: usize,
    /// Whether to stage a header MD5 into the `md5hdr_ext` extension
    /// column (spec.md §9 "md5 fallback").
    pub md5_enabled: bool,
    /// Whether flag-only rewrites may be deferred (marked dirty) instead
    /// of written immediately (spec.md §4.3 "Header handler", `delay_writes`).
    pub delay_writes: bool,
    /// Attempts before the driver gives up retrying a failed pass
    /// (spec.md §4.1 step 5 / §9 "Control flow restart").
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            header_padding: 64,
            md5_enabled: true,
            delay_writes: false,
            max_retries: 3,
        }
    }
}

impl SyncConfig {
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let header_padding = env::var("MBOXSYNC_HEADER_PADDING")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.header_padding);
        let md5_enabled = env::var("MBOXSYNC_MD5_ENABLED")
            .ok()
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.md5_enabled);
        let delay_writes = env::var("MBOXSYNC_DELAY_WRITES")
            .ok()
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.delay_writes);
        let max_retries = env::var("MBOXSYNC_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.max_retries);

        Ok(Self {
            header_padding,
            md5_enabled,
            delay_writes,
            max_retries,
        })
    }
}
