//! Path and name hashes used as lookup keys.
//!
//! | Hash        | Input                                     | Used by                         |
//! |-------------|-------------------------------------------|---------------------------------|
//! | FNV-1a 64   | UTF-8 path + `"++"`                       | legacy bundle index             |
//! | Murmur64A   | UTF-8 lowercase path, trailing `/` trimmed | current bundle index            |
//! | Murmur2 32  | UTF-16LE lowercase name                   | GGPK directory entry name hash  |
//!
//! The index declares which 64-bit scheme it uses through the hash stored for
//! its first directory (the root, whose path is empty). See
//! [`NameHashScheme::detect`].

/// Murmur64A of the empty path with [`MURMUR64A_SEED`].
pub const MURMUR64A_ROOT_SENTINEL: u64 = 0xF42A_94E6_9CFF_42FE;
pub const MURMUR64A_SEED: u64 = 0x1337_B33F;

const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME:  u64 = 0x0000_0100_0000_01B3;

// ── FNV-1a 64 ────────────────────────────────────────────────────────────────

/// Legacy index path hash.
///
/// Directory paths (ending in `/`) keep their case and drop the trailing
/// slashes; file paths are lowercased. Both get a `"++"` suffix.
pub fn fnv1a64_path(path: &str) -> u64 {
    let key = match path.strip_suffix('/') {
        Some(_) => format!("{}++", path.trim_end_matches('/')),
        None    => format!("{}++", path.to_lowercase()),
    };
    fnv1a64(key.as_bytes())
}

pub fn fnv1a64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

// ── Murmur64A ────────────────────────────────────────────────────────────────

/// Current index path hash.
pub fn murmur64a_path(path: &str) -> u64 {
    let lower = path.trim_end_matches('/').to_lowercase();
    murmur64a(lower.as_bytes(), MURMUR64A_SEED)
}

pub fn murmur64a(data: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut blocks = data.chunks_exact(8);
    for block in &mut blocks {
        let mut k = u64::from_le_bytes([
            block[0], block[1], block[2], block[3],
            block[4], block[5], block[6], block[7],
        ]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        for (i, &b) in tail.iter().enumerate() {
            h ^= (b as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

// ── Murmur2 32 ───────────────────────────────────────────────────────────────

/// Hash stored next to each GGPK directory entry.
pub fn ggpk_name_hash(name: &str) -> u32 {
    let bytes: Vec<u8> = name
        .to_lowercase()
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    murmur2(&bytes, 0)
}

pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    if data.is_empty() {
        return 0;
    }
    let mut h = seed ^ data.len() as u32;

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    match *blocks.remainder() {
        [a, b, c] => {
            h ^= u16::from_le_bytes([a, b]) as u32;
            h ^= (c as u32) << 16;
            h = h.wrapping_mul(M);
        }
        [a, b] => {
            h ^= u16::from_le_bytes([a, b]) as u32;
            h = h.wrapping_mul(M);
        }
        [a] => {
            h ^= a as u32;
            h = h.wrapping_mul(M);
        }
        _ => {}
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

// ── Scheme selection ─────────────────────────────────────────────────────────

/// 64-bit path hash scheme of a bundle index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameHashScheme {
    Fnv1a64,
    Murmur64A,
}

impl NameHashScheme {
    /// Decide from the hash stored for the index's first directory.
    pub fn detect(first_directory_hash: Option<u64>) -> Self {
        match first_directory_hash {
            Some(MURMUR64A_ROOT_SENTINEL) => NameHashScheme::Murmur64A,
            _ => NameHashScheme::Fnv1a64,
        }
    }

    pub fn hash(self, path: &str) -> u64 {
        match self {
            NameHashScheme::Fnv1a64   => fnv1a64_path(path),
            NameHashScheme::Murmur64A => murmur64a_path(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur64a_root_is_the_sentinel() {
        assert_eq!(murmur64a_path(""), MURMUR64A_ROOT_SENTINEL);
        assert_eq!(murmur64a_path("/"), MURMUR64A_ROOT_SENTINEL);
    }

    #[test]
    fn detection_selects_murmur_for_sentinel() {
        let scheme = NameHashScheme::detect(Some(MURMUR64A_ROOT_SENTINEL));
        assert_eq!(scheme, NameHashScheme::Murmur64A);
        assert_eq!(scheme.hash("Data/Example.dat"), 0x76a7_4ca2_3c15_898f);
        assert_eq!(scheme.hash("Data/Example.dat"), murmur64a_path("data/example.dat"));

        let legacy = NameHashScheme::detect(Some(0x1234));
        assert_eq!(legacy, NameHashScheme::Fnv1a64);
        assert_eq!(legacy.hash("Data/Example.dat"), 0xf65f_0f48_2b61_4f15);
        assert_eq!(NameHashScheme::detect(None), NameHashScheme::Fnv1a64);
    }

    #[test]
    fn fnv_directories_keep_case() {
        assert_eq!(fnv1a64_path("Art/"), fnv1a64(b"Art++"));
        assert_eq!(fnv1a64_path("Art/a.DDS"), fnv1a64(b"art/a.dds++"));
        assert_eq!(fnv1a64(b""), FNV_OFFSET);
    }

    #[test]
    fn murmur2_entry_hashes() {
        assert_eq!(murmur2(b"", 0), 0);
        assert_eq!(ggpk_name_hash("Art"), 0x29bc_203e);
        assert_eq!(ggpk_name_hash("data"), 0x630e_e610);
        assert_eq!(murmur2(b"abc", 0), 0x1357_7c9b);
    }
}
