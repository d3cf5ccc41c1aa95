use std::env;
use std::sync::OnceLock;

static NPURS_DISABLE_WINOGRAD: OnceLock<bool> = OnceLock::new();
static NPURS_PLAN_STATS: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn winograd_disabled() -> bool {
    *NPURS_DISABLE_WINOGRAD.get_or_init(|| match env::var("NPURS_DISABLE_WINOGRAD") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

pub(crate) fn plan_stats_enabled() -> bool {
    *NPURS_PLAN_STATS.get_or_init(|| match env::var("NPURS_PLAN_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
