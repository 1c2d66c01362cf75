//! Deterministic derivation of avatar initials and colors.
//!
//! The same seed must map to the same presentation on every platform and
//! in every release, so hashing avoids `DefaultHasher` (whose output is
//! unspecified across std versions) in favor of a fixed FNV-1a.

/// Background palette cycled by the seed hash.
pub const AVATAR_PALETTE: [&str; 8] = [
    "#f44336", "#e91e63", "#9c27b0", "#3f51b5", "#03a9f4", "#009688", "#8bc34a", "#ff9800",
];

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable 64-bit FNV-1a hash of a seed string.
pub fn stable_hash(seed: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in seed.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Palette color for a seed. Same seed, same color, forever.
pub fn color_for(seed: &str) -> &'static str {
    let index = (stable_hash(seed) % AVATAR_PALETTE.len() as u64) as usize;
    AVATAR_PALETTE[index]
}

/// Up to two uppercased initials derived from a display name or id.
///
/// Words are alphanumeric runs, so "Grace Hopper", "grace.hopper" and
/// "grace-hopper" all yield "GH". Seeds without any alphanumeric content
/// fall back to "?".
pub fn initials_for(seed: &str) -> String {
    let mut initials = String::new();
    let words = seed
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(2);
    for word in words {
        if let Some(first) = word.chars().next() {
            initials.extend(first.to_uppercase());
        }
    }
    if initials.is_empty() {
        initials.push('?');
    }
    initials
}
