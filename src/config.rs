use crate::policy::{PlacementPolicy, PolicyConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    /// Mutation bursts inside this window collapse into one persisted write.
    pub debounce_ms: u64,
    pub queue_capacity: usize,
    pub link_opened: PlacementPolicy,
    pub manual_opened: PlacementPolicy,
    /// First id the stub host hands out for synthesized group tabs.
    pub group_tab_base: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./tabforest.sqlite".to_string()),
            debounce_ms: std::env::var("DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(500),
            queue_capacity: std::env::var("QUEUE_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(256),
            link_opened: std::env::var("LINK_OPEN_POLICY")
                .ok()
                .and_then(|v| PlacementPolicy::parse(&v))
                .unwrap_or(PlacementPolicy::Child),
            manual_opened: std::env::var("MANUAL_OPEN_POLICY")
                .ok()
                .and_then(|v| PlacementPolicy::parse(&v))
                .unwrap_or(PlacementPolicy::End),
            group_tab_base: std::env::var("GROUP_TAB_BASE").ok().and_then(|v| v.parse().ok()).unwrap_or(1 << 32),
        }
    }

    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig { link_opened: self.link_opened, manual_opened: self.manual_opened }
    }
}
