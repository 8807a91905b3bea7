//! Development-kit board lookup
//!
//! Nordic allocates debug probe serial numbers in blocks per board design,
//! so the leading digits of a probe serial identify the PCA board it is
//! soldered onto. Longer prefixes are tried first so the 960x blocks are
//! not shadowed by a hypothetical 960 entry.

use conflater::serial_key;

const BOARD_PREFIXES: &[(&str, &str)] = &[
    ("9600", "PCA10090"),
    ("9601", "PCA10095"),
    ("9602", "PCA10115"),
    ("680", "PCA10031"),
    ("681", "PCA10028"),
    ("682", "PCA10040"),
    ("683", "PCA10056"),
    ("684", "PCA10068"),
    ("685", "PCA10100"),
    ("686", "PCA10064"),
];

/// Board design for a probe serial number, when known
///
/// Serials of the form `PCA10056_1234` name their board directly; numeric
/// serials are canonicalized (leading zeros stripped) before the prefix
/// lookup so `000683011234` resolves like `683011234`.
pub fn board_version(serial: &str) -> Option<String> {
    if let Some(rest) = serial.strip_prefix("PCA") {
        let digits = rest.split('_').next().unwrap_or(rest);
        return Some(format!("PCA{digits}"));
    }

    let canonical = serial_key::normalize(serial)?;
    if !canonical.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    BOARD_PREFIXES
        .iter()
        .find(|(prefix, _)| canonical.starts_with(prefix))
        .map(|(_, board)| (*board).to_string())
}
