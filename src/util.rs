//! Shared utilities
//!
//! Saturating arithmetic, clamp/truncate casts, block-to-byte scaling and
//! fnmatch-style glob matching live here because the model, scanner,
//! exporter and importer all need them without depending on each other.
//! The human-readable formatting helpers at the bottom are used only by
//! the browsing UI.

use chrono::{DateTime, Utc};
use humansize::{format_size, BINARY, DECIMAL};
use std::path::Path;

/// 512-byte allocation unit, the UNIX `st_blocks` convention.
pub const BLOCK_SIZE: u64 = 512;

/// Saturating unsigned addition.
#[inline]
pub fn saturating_add(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// Saturating unsigned subtraction, clamped at zero.
#[inline]
pub fn saturating_sub(a: u64, b: u64) -> u64 {
    a.saturating_sub(b)
}

/// Truncate a 64-bit value to fit a 32-bit field (device/inode widths
/// the wire format and the dense DeviceId table use).
#[inline]
pub fn truncate_u32(v: u64) -> u32 {
    v as u32
}

/// Clamp a signed count to a non-negative `u32`, as used for `nlink`.
#[inline]
pub fn clamp_u32(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

/// `blocks_to_bytes(b) = if b >= 2^55 then UINT64_MAX else b << 9` (§6.4).
///
/// The shift is by 9 (×512); values at or above 2^55 would overflow a
/// u64 once shifted, so those saturate instead of wrapping.
#[inline]
pub fn blocks_to_bytes(blocks: u64) -> u64 {
    const MAX_SAFE_BLOCKS: u64 = 1 << 55;
    if blocks >= MAX_SAFE_BLOCKS {
        u64::MAX
    } else {
        blocks << 9
    }
}

/// A compiled fnmatch-style pattern (`*`, `?`, `[...]`), matched against
/// path text the way `fnmatch(3)` does — `*` and `?` never cross `/`.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    inner: glob::Pattern,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            inner: glob::Pattern::new(pattern)?,
        })
    }

    fn matches_str(&self, s: &str) -> bool {
        self.inner.matches(s)
    }
}

/// Try `pattern` against every suffix of `path` rooted at a `/` boundary,
/// the semantics §4.2 step c describes: a pattern matches if it matches
/// the whole path or any suffix that starts right after a `/`.
pub fn matches_any_suffix(pattern: &GlobPattern, path: &Path) -> bool {
    let path_str = path.to_string_lossy();
    if pattern.matches_str(&path_str) {
        return true;
    }
    let bytes = path_str.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'/' && i + 1 < bytes.len() {
            if pattern.matches_str(&path_str[i + 1..]) {
                return true;
            }
        }
    }
    false
}

/// Format a byte count using binary (KiB/MiB/...) or SI (kB/MB/...) units.
pub fn format_file_size(size: u64, use_si: bool) -> String {
    if use_si {
        format_size(size, DECIMAL)
    } else {
        format_size(size, BINARY)
    }
}

/// Format a block count as a human-readable byte size.
pub fn format_blocks(blocks: u64, use_si: bool) -> String {
    format_file_size(blocks_to_bytes(blocks), use_si)
}

/// Format a fraction of a total as a one-decimal percentage.
pub fn format_percentage(part: u64, total: u64) -> String {
    if total == 0 {
        "0.0%".to_string()
    } else {
        format!("{:.1}%", (part as f64 / total as f64) * 100.0)
    }
}

/// Format a Unix timestamp (§3 `ExtMeta::mtime`) as `YYYY-MM-DD HH:MM`,
/// the column `show-mtime` adds to the browser (requires `-e`).
pub fn format_mtime(mtime: i64) -> String {
    match DateTime::<Utc>::from_timestamp(mtime, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

/// Render a filled/empty bar graph of `width` cells for `percentage` (0-100).
pub fn render_bar(percentage: f64, width: usize, style: &str) -> String {
    let filled = ((percentage * width as f64 / 100.0).round() as usize).min(width);
    let (fill_ch, empty_ch) = match style {
        "hash" => ('#', ' '),
        "half-block" => ('▌', ' '),
        "eighth-block" => ('▏', ' '),
        _ => ('█', ' '),
    };
    let mut s = String::with_capacity(width);
    for _ in 0..filled {
        s.push(fill_ch);
    }
    for _ in filled..width {
        s.push(empty_ch);
    }
    s
}

/// Natural (digit-aware) string ordering, so `file2` sorts before `file10`.
pub fn natural_compare(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek(), b_chars.peek()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a_char), Some(b_char)) => {
                if a_char.is_ascii_digit() && b_char.is_ascii_digit() {
                    let a_num = extract_number(&mut a_chars);
                    let b_num = extract_number(&mut b_chars);
                    match a_num.cmp(&b_num) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                } else {
                    let a_next = a_chars.next().unwrap();
                    let b_next = b_chars.next().unwrap();
                    match a_next.cmp(&b_next) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
            }
        }
    }
}

fn extract_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> u64 {
    let mut num = 0u64;
    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_digit() {
            chars.next();
            if let Some(d) = ch.to_digit(10) {
                num = num.saturating_mul(10).saturating_add(d as u64);
            }
        } else {
            break;
        }
    }
    num
}

/// Truncate a string to at most `max_width` chars, appending `...` if cut.
pub fn truncate_string(s: &str, max_width: usize) -> String {
    if s.chars().count() <= max_width {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_width.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Left- or right-pad a string to `width` columns.
pub fn pad_string(s: &str, width: usize, right_align: bool) -> String {
    let len = s.chars().count();
    if len >= width {
        s.to_string()
    } else {
        let padding = " ".repeat(width - len);
        if right_align {
            format!("{}{}", padding, s)
        } else {
            format!("{}{}", s, padding)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_add_clamps() {
        assert_eq!(saturating_add(u64::MAX, 1), u64::MAX);
        assert_eq!(saturating_add(1, 2), 3);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        assert_eq!(saturating_sub(0, 1), 0);
        assert_eq!(saturating_sub(5, 2), 3);
    }

    #[test]
    fn blocks_to_bytes_saturates() {
        assert_eq!(blocks_to_bytes(0), 0);
        assert_eq!(blocks_to_bytes(8), 4096);
        assert_eq!(blocks_to_bytes(1u64 << 55), u64::MAX);
    }

    #[test]
    fn suffix_matching_respects_slash_boundaries() {
        let pattern = GlobPattern::new("node_modules").unwrap();
        assert!(matches_any_suffix(&pattern, Path::new("a/b/node_modules")));
        assert!(!matches_any_suffix(&pattern, Path::new("a/bnode_modules")));
    }

    #[test]
    fn natural_sort_orders_digits_numerically() {
        use std::cmp::Ordering;
        assert_eq!(natural_compare("file1", "file2"), Ordering::Less);
        assert_eq!(natural_compare("file10", "file2"), Ordering::Greater);
        assert_eq!(natural_compare("file01", "file1"), Ordering::Equal);
    }

    #[test]
    fn format_mtime_renders_utc_timestamp() {
        assert_eq!(format_mtime(0), "1970-01-01 00:00");
    }

    #[test]
    fn truncate_and_pad() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(pad_string("hi", 5, false), "hi   ");
        assert_eq!(pad_string("hi", 5, true), "   hi");
    }
}
