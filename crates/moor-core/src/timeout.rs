use std::time::Duration;

/// Used when nobody configured anything.
pub const FALLBACK_READINESS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutSource {
    Descriptor,
    Invoker,
    Config,
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectiveTimeout {
    pub duration: Duration,
    pub source: TimeoutSource,
}

/// Strict precedence: descriptor override, then the invoker's value for this
/// call, then the configured default, then [`FALLBACK_READINESS_TIMEOUT`].
pub fn resolve_readiness_timeout(
    descriptor: Option<Duration>,
    invoker: Option<Duration>,
    configured: Option<Duration>,
) -> EffectiveTimeout {
    let candidates = [
        (descriptor, TimeoutSource::Descriptor),
        (invoker, TimeoutSource::Invoker),
        (configured, TimeoutSource::Config),
    ];
    candidates
        .into_iter()
        .find_map(|(d, source)| d.filter(|d| !d.is_zero()).map(|duration| EffectiveTimeout { duration, source }))
        .unwrap_or(EffectiveTimeout { duration: FALLBACK_READINESS_TIMEOUT, source: TimeoutSource::Fallback })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    #[test]
    fn descriptor_override_wins() {
        let t = resolve_readiness_timeout(secs(90), secs(30), secs(60));
        assert_eq!(t.duration, Duration::from_secs(90));
        assert_eq!(t.source, TimeoutSource::Descriptor);
    }

    #[test]
    fn each_level_falls_through() {
        assert_eq!(resolve_readiness_timeout(None, secs(30), secs(60)).source, TimeoutSource::Invoker);
        assert_eq!(resolve_readiness_timeout(None, None, secs(60)).duration, Duration::from_secs(60));
        let t = resolve_readiness_timeout(None, None, None);
        assert_eq!(t.source, TimeoutSource::Fallback);
        assert_eq!(t.duration, FALLBACK_READINESS_TIMEOUT);
    }

    #[test]
    fn zero_is_treated_as_unset() {
        assert_eq!(resolve_readiness_timeout(secs(0), secs(30), None).source, TimeoutSource::Invoker);
    }
}
