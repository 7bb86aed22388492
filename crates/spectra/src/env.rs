use std::env;
use std::sync::OnceLock;

static SPECTRA_ZERO_INIT: OnceLock<bool> = OnceLock::new();
static SPECTRA_MAX_ALLOC_BYTES: OnceLock<Option<usize>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Whether `StorageBuffer::allocate` zero-fills. Defaults to on.
pub(crate) fn zero_init_enabled() -> bool {
    *SPECTRA_ZERO_INIT.get_or_init(|| match env::var("SPECTRA_ZERO_INIT") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => true,
    })
}

/// Upper bound on a single engine allocation, if one is configured.
pub(crate) fn max_alloc_bytes() -> Option<usize> {
    *SPECTRA_MAX_ALLOC_BYTES.get_or_init(|| match env::var("SPECTRA_MAX_ALLOC_BYTES") {
        Ok(value) => {
            let parsed = value.trim().parse::<usize>().ok();
            if parsed.is_none() && !value.trim().is_empty() {
                log::warn!("ignoring malformed SPECTRA_MAX_ALLOC_BYTES={value:?}");
            }
            parsed
        }
        Err(_) => None,
    })
}
