use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub default_page_size: u64,
    pub max_page_size: u64,
    /// When set, Delete only succeeds while the listing is available.
    pub restrict_delete: bool,
    pub expiry_sweep_enabled: bool,
    pub expiry_sweep_cron: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            restrict_delete: false,
            expiry_sweep_enabled: false,
            expiry_sweep_cron: "0 */15 * * * *".to_string(),
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_page_size = env_u64("FRIDGE_MAX_PAGE_SIZE").unwrap_or(defaults.max_page_size).max(1);
        let config = Self {
            default_page_size: env_u64("FRIDGE_DEFAULT_PAGE_SIZE")
                .unwrap_or(defaults.default_page_size)
                .clamp(1, max_page_size),
            max_page_size,
            restrict_delete: env_flag("FRIDGE_RESTRICT_DELETE").unwrap_or(defaults.restrict_delete),
            expiry_sweep_enabled: env_flag("FRIDGE_EXPIRY_SWEEP_ENABLED")
                .unwrap_or(defaults.expiry_sweep_enabled),
            expiry_sweep_cron: std::env::var("FRIDGE_EXPIRY_SWEEP_CRON")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.expiry_sweep_cron),
        };
        info!(
            default_page_size = config.default_page_size,
            max_page_size = config.max_page_size,
            restrict_delete = config.restrict_delete,
            expiry_sweep_enabled = config.expiry_sweep_enabled,
            expiry_sweep_cron = %config.expiry_sweep_cron,
            "lifecycle configuration loaded"
        );
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
}
