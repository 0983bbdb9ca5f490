use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use ulogview_types::MemoryUsagePolicy;

/// Compression level of a [`CompressedString`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressionLevel {
    None,
    Fast,
    Optimal,
}

impl CompressionLevel {
    /// Select the level for text of `length` characters, `None` means the shared empty value
    pub fn for_policy(policy: MemoryUsagePolicy, length: usize) -> Option<Self> {
        if length == 0 {
            return None;
        }
        let small_or_large = length <= 64 || length > 256;
        Some(match policy {
            MemoryUsagePolicy::Balance => {
                if small_or_large {
                    Self::Optimal
                } else {
                    Self::Fast
                }
            }
            MemoryUsagePolicy::BetterPerformance => {
                if small_or_large {
                    Self::Fast
                } else {
                    Self::None
                }
            }
            MemoryUsagePolicy::LessMemoryUsage => Self::Optimal,
        })
    }

    fn compression(&self) -> Compression {
        match self {
            Self::None => Compression::none(),
            Self::Fast => Compression::fast(),
            Self::Optimal => Compression::best(),
        }
    }
}

#[derive(Clone)]
enum Storage {
    Empty,
    Raw(Arc<str>),
    Deflated { data: Arc<[u8]>, byte_len: usize },
}

/// Immutable string which may be kept deflated in memory
///
/// Decompressing always yields the exact original text.
#[derive(Clone)]
pub struct CompressedString {
    storage: Storage,
    level: CompressionLevel,
    char_len: usize,
}

impl CompressedString {
    /// The shared empty string
    pub const EMPTY: CompressedString = CompressedString {
        storage: Storage::Empty,
        level: CompressionLevel::None,
        char_len: 0,
    };

    /// Create a compressed string at the given level
    pub fn new(s: &str, level: CompressionLevel) -> Self {
        if s.is_empty() {
            return Self::EMPTY;
        }
        let char_len = s.chars().count();
        let storage = match level {
            CompressionLevel::None => Storage::Raw(Arc::from(s)),
            _ => match deflate(s.as_bytes(), level.compression()) {
                // Keep the raw text when deflating does not pay off
                Some(data) if data.len() < s.len() => Storage::Deflated {
                    data: Arc::from(data),
                    byte_len: s.len(),
                },
                _ => Storage::Raw(Arc::from(s)),
            },
        };
        Self {
            storage,
            level,
            char_len,
        }
    }

    /// Create a compressed string with the level selected by a memory usage policy
    pub fn with_policy(s: &str, policy: MemoryUsagePolicy) -> Self {
        match CompressionLevel::for_policy(policy, s.chars().count()) {
            Some(level) => Self::new(s, level),
            None => Self::EMPTY,
        }
    }

    /// Requested compression level
    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Number of characters of the original text
    pub fn len(&self) -> usize {
        self.char_len
    }

    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    /// Whether the text is actually stored deflated
    pub fn is_deflated(&self) -> bool {
        matches!(self.storage, Storage::Deflated { .. })
    }

    /// Approximate heap usage in bytes
    pub fn memory_size(&self) -> usize {
        match &self.storage {
            Storage::Empty => 0,
            Storage::Raw(s) => s.len(),
            Storage::Deflated { data, .. } => data.len(),
        }
    }

    /// Decompress to the original text
    pub fn decompress(&self) -> String {
        match &self.storage {
            Storage::Empty => String::new(),
            Storage::Raw(s) => s.to_string(),
            Storage::Deflated { data, byte_len } => {
                let mut text = String::with_capacity(*byte_len);
                if let Err(e) = DeflateDecoder::new(&data[..]).read_to_string(&mut text) {
                    tracing::error!("Unable to inflate compressed string: {}", e);
                    text.clear();
                }
                text
            }
        }
    }
}

fn deflate(bytes: &[u8], compression: Compression) -> Option<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(bytes.len() / 2), compression);
    encoder.write_all(bytes).ok()?;
    encoder.finish().ok()
}

impl Default for CompressedString {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for CompressedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.storage {
            Storage::Raw(s) => f.write_str(s),
            _ => f.write_str(&self.decompress()),
        }
    }
}

impl fmt::Debug for CompressedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedString")
            .field("level", &self.level)
            .field("len", &self.char_len)
            .field("deflated", &self.is_deflated())
            .finish()
    }
}

impl PartialEq for CompressedString {
    fn eq(&self, other: &Self) -> bool {
        self.char_len == other.char_len && self.decompress() == other.decompress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [MemoryUsagePolicy; 3] = [
        MemoryUsagePolicy::Balance,
        MemoryUsagePolicy::BetterPerformance,
        MemoryUsagePolicy::LessMemoryUsage,
    ];

    #[test]
    fn test_round_trip_under_all_policies() {
        let long = "2024-01-15 10:30:00 connection reset by peer; retrying ".repeat(40);
        let texts = ["", "a", "héllo wörld ✓", "line1\nline2\r\nline3", long.as_str()];
        for policy in POLICIES {
            for text in texts {
                let s = CompressedString::with_policy(text, policy);
                assert_eq!(s.decompress(), text, "policy {:?}", policy);
                assert_eq!(s.len(), text.chars().count());
            }
        }
    }

    #[test]
    fn test_empty_is_shared_value() {
        let s = CompressedString::with_policy("", MemoryUsagePolicy::LessMemoryUsage);
        assert!(s.is_empty());
        assert_eq!(s.memory_size(), 0);
        assert_eq!(s.level(), CompressionLevel::None);
    }

    #[test]
    fn test_balance_thresholds() {
        let p = MemoryUsagePolicy::Balance;
        assert_eq!(CompressionLevel::for_policy(p, 0), None);
        assert_eq!(CompressionLevel::for_policy(p, 64), Some(CompressionLevel::Optimal));
        assert_eq!(CompressionLevel::for_policy(p, 65), Some(CompressionLevel::Fast));
        assert_eq!(CompressionLevel::for_policy(p, 256), Some(CompressionLevel::Fast));
        assert_eq!(CompressionLevel::for_policy(p, 257), Some(CompressionLevel::Optimal));
    }

    #[test]
    fn test_policy_monotonicity() {
        for length in 1..2048 {
            assert_ne!(
                CompressionLevel::for_policy(MemoryUsagePolicy::LessMemoryUsage, length),
                Some(CompressionLevel::None)
            );
            if length <= 256 {
                assert_ne!(
                    CompressionLevel::for_policy(MemoryUsagePolicy::BetterPerformance, length),
                    Some(CompressionLevel::Optimal)
                );
            }
        }
    }

    #[test]
    fn test_repetitive_text_is_deflated() {
        let text = "GET /api/v1/health 200 OK ".repeat(100);
        let s = CompressedString::new(&text, CompressionLevel::Optimal);
        assert!(s.is_deflated());
        assert!(s.memory_size() < text.len());
        assert_eq!(s.to_string(), text);
    }
}
