use std::time::Duration;

/// Application error codes the portal returns both for "entry already
/// exists" conflicts and for genuine validation failures. A failure carrying
/// one of these cannot be trusted either way, so it goes through
/// verification like a timeout would.
pub const DEFAULT_AMBIGUOUS_CODES: &[i64] = &[2022, 2025];

const DEFAULT_DWELL: Duration = Duration::from_secs(12);
const DEFAULT_FADE_LEAD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Codes treated as ambiguous in addition to timeouts, network failures
    /// and 5xx responses. Policy, not hardcoded: override per deployment.
    pub ambiguous_codes: Vec<i64>,
    /// How long a succeeded operation stays visible before auto-clear.
    pub autoclear_dwell: Duration,
    /// How long before removal the cosmetic "expiring" flag is set.
    pub autoclear_fade_lead: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            ambiguous_codes: DEFAULT_AMBIGUOUS_CODES.to_vec(),
            autoclear_dwell: DEFAULT_DWELL,
            autoclear_fade_lead: DEFAULT_FADE_LEAD,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `PROXYDECK_AMBIGUOUS_CODES` (comma-separated)
    /// and `PROXYDECK_AUTOCLEAR_SECS`. Unparseable values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = OrchestratorConfig::default();

        if let Ok(raw) = std::env::var("PROXYDECK_AMBIGUOUS_CODES") {
            let codes: Vec<i64> = raw
                .split(',')
                .filter_map(|part| {
                    let part = part.trim();
                    if part.is_empty() {
                        return None;
                    }
                    match part.parse() {
                        Ok(code) => Some(code),
                        Err(_) => {
                            tracing::warn!("ignoring unparseable ambiguous code {:?}", part);
                            None
                        }
                    }
                })
                .collect();
            config.ambiguous_codes = codes;
        }

        if let Ok(raw) = std::env::var("PROXYDECK_AUTOCLEAR_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => config.autoclear_dwell = Duration::from_secs(secs),
                Err(_) => tracing::warn!("ignoring unparseable PROXYDECK_AUTOCLEAR_SECS {:?}", raw),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.ambiguous_codes, DEFAULT_AMBIGUOUS_CODES);
        assert_eq!(config.autoclear_dwell, Duration::from_secs(12));
        assert_eq!(config.autoclear_fade_lead, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn env_overrides_ambiguous_codes() {
        std::env::set_var("PROXYDECK_AMBIGUOUS_CODES", "2022, 3105,junk");
        let config = OrchestratorConfig::from_env();
        std::env::remove_var("PROXYDECK_AMBIGUOUS_CODES");

        assert_eq!(config.ambiguous_codes, vec![2022, 3105]);
    }

    #[test]
    #[serial]
    fn env_overrides_dwell() {
        std::env::set_var("PROXYDECK_AUTOCLEAR_SECS", "30");
        let config = OrchestratorConfig::from_env();
        std::env::remove_var("PROXYDECK_AUTOCLEAR_SECS");

        assert_eq!(config.autoclear_dwell, Duration::from_secs(30));
    }
}
