//! Kubernetes resource quantity parsing
//!
//! Quantities such as `500m`, `1.5`, `250n`, `128Mi` or `1e3` are turned
//! into millicores (CPU) or bytes (memory). Fractional results round up,
//! matching how the API server reports milli values.

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a CPU quantity into millicores
pub fn parse_cpu_millicores(quantity: &str) -> Option<u64> {
    parse_quantity(quantity).map(|cores| round_up(cores * 1000.0))
}

/// Parse a memory quantity into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    parse_quantity(quantity).map(round_up)
}

/// Parse a quantity into its base unit (cores or bytes)
fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }

    let value = if let Ok(plain) = quantity.parse::<f64>() {
        // Plain numbers and exponent forms like "1e3"
        plain
    } else if let Some((number, scale)) = split_suffix(quantity, BINARY_SUFFIXES) {
        number * scale
    } else if let Some((number, scale)) = split_suffix(quantity, DECIMAL_SUFFIXES) {
        number * scale
    } else {
        return None;
    };

    (value.is_finite() && value >= 0.0).then_some(value)
}

fn split_suffix(quantity: &str, suffixes: &[(&str, f64)]) -> Option<(f64, f64)> {
    suffixes.iter().find_map(|(suffix, scale)| {
        quantity
            .strip_suffix(suffix)
            .and_then(|number| number.parse::<f64>().ok())
            .map(|number| (number, *scale))
    })
}

/// Round up, ignoring float noise below one part in a million
fn round_up(value: f64) -> u64 {
    let nearest = value.round();
    if (value - nearest).abs() < 1e-6 {
        nearest as u64
    } else {
        value.ceil() as u64
    }
}
