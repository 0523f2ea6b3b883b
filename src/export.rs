//! Streaming JSON dump writer (§4.3)
//!
//! The exporter is fed directly by the scanner (or the importer, when
//! converting a dump) through the shared [`Sink`] interface — it never
//! materializes the tree it is writing. `serde_json` is deliberately not
//! used here: the wire shape is not a plain serde struct (directories are
//! heterogeneous arrays) and the byte-exact, non-UTF-8-tolerant string
//! escaping this format requires is not something a generic serializer
//! gives us control over.

use crate::sink::{Sink, Special, Stat};
use crate::util::blocks_to_bytes;
use std::io::{self, Write};

/// Wire format major/minor, matching the established dump format
/// (§6.1 — implementations must accept greater minors than they emit).
pub const FORMAT_MAJOR: u32 = 1;
pub const FORMAT_MINOR: u32 = 2;

/// Streams `[MAJOR, MINOR, {metadata}, rootElement]` to `writer` as the
/// sink is driven. Call [`Exporter::finish`] once the root element's
/// `leave_dir` has returned to close the document.
pub struct Exporter<W: Write> {
    writer: W,
    /// One entry per currently-open directory level; `true` once that
    /// level has written its first child (so the next one needs a
    /// leading comma).
    levels: Vec<bool>,
    parent_dev: Vec<u64>,
    pending_name: Option<Vec<u8>>,
}

impl<W: Write> Exporter<W> {
    pub fn new(mut writer: W, progname: &str, progver: &str, timestamp: i64) -> io::Result<Self> {
        write!(writer, "[{},{},{{\"progname\":", FORMAT_MAJOR, FORMAT_MINOR)?;
        write_json_string(&mut writer, progname.as_bytes())?;
        write!(writer, ",\"progver\":")?;
        write_json_string(&mut writer, progver.as_bytes())?;
        write!(writer, ",\"timestamp\":{}}},", timestamp)?;
        Ok(Self {
            writer,
            levels: Vec::new(),
            parent_dev: Vec::new(),
            pending_name: None,
        })
    }

    /// Close the document. Must be called after the root element's
    /// `leave_dir` (if any) has returned.
    pub fn finish(mut self) -> io::Result<W> {
        write!(self.writer, "]")?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_comma_if_sibling(&mut self) -> io::Result<()> {
        if let Some(flag) = self.levels.last_mut() {
            if *flag {
                write!(self.writer, ",")?;
            }
            *flag = true;
        }
        Ok(())
    }

    fn write_header_object(
        &mut self,
        name: &[u8],
        stat: &Stat,
        parent_dev: Option<u64>,
    ) -> io::Result<()> {
        write!(self.writer, "{{\"name\":")?;
        write_json_string(&mut self.writer, name)?;
        if stat.size != 0 {
            write!(self.writer, ",\"asize\":{}", stat.size)?;
        }
        let dsize = blocks_to_bytes(stat.blocks);
        if dsize != 0 {
            write!(self.writer, ",\"dsize\":{}", dsize)?;
        }
        if parent_dev != Some(stat.dev) {
            write!(self.writer, ",\"dev\":{}", stat.dev)?;
        }
        if stat.is_hardlink_candidate() {
            write!(
                self.writer,
                ",\"ino\":{},\"hlnkc\":true,\"nlink\":{}",
                stat.ino, stat.nlink
            )?;
        }
        if stat.notreg {
            write!(self.writer, ",\"notreg\":true")?;
        }
        if let Some(ext) = stat.ext {
            write!(
                self.writer,
                ",\"uid\":{},\"gid\":{},\"mode\":{},\"mtime\":{}",
                ext.uid, ext.gid, ext.mode, ext.mtime
            )?;
        }
        write!(self.writer, "}}")?;
        Ok(())
    }
}

impl<W: Write> Sink for Exporter<W> {
    fn push_name(&mut self, name: &[u8]) {
        self.pending_name = Some(name.to_vec());
    }

    fn set_stat(&mut self, stat: &Stat) {
        let name = self
            .pending_name
            .take()
            .expect("push_name before set_stat");
        self.write_comma_if_sibling().expect("export write failed");
        let parent_dev = self.parent_dev.last().copied();
        if stat.is_dir {
            write!(self.writer, "[").expect("export write failed");
        }
        self.write_header_object(&name, stat, parent_dev)
            .expect("export write failed");
        if stat.is_dir {
            self.levels.push(false);
            self.parent_dev.push(stat.dev);
        }
    }

    fn set_special(&mut self, tag: Special) {
        let name = self
            .pending_name
            .take()
            .expect("push_name before set_special");
        self.write_comma_if_sibling().expect("export write failed");
        write!(self.writer, "{{\"name\":").expect("export write failed");
        write_json_string(&mut self.writer, &name).expect("export write failed");
        let attr = match tag {
            Special::ReadError => "\"read_error\":true",
            Special::OtherFs => "\"excluded\":\"othfs\"",
            Special::Kernfs => "\"excluded\":\"kernfs\"",
            Special::Excluded => "\"excluded\":\"pattern\"",
        };
        write!(self.writer, ",{}}}", attr).expect("export write failed");
    }

    fn enter_dir(&mut self) {
        // The bracket was already opened in set_stat; nothing to do.
    }

    fn leave_dir(&mut self) {
        write!(self.writer, "]").expect("export write failed");
        self.levels.pop();
        self.parent_dev.pop();
    }

    fn listing_error(&mut self) {
        // The open directory's own header object is already flushed to
        // the stream without a read_error flag by the time a listing
        // failure can be discovered; nothing can be retrofitted onto it.
        // The dump simply ends up with fewer children than a full scan
        // would have produced, same as the real dump format behaves.
    }
}

/// §4.3 string escaping: the five named JSON escapes and `\uXXXX` for
/// remaining control bytes (0x00-0x1F minus the five, plus 0x7F); every
/// other byte — including non-UTF-8 bytes ≥ 0x20 — passes through
/// verbatim so filenames survive byte-exactly.
fn write_json_string<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(b"\"")?;
    for &b in bytes {
        match b {
            b'"' => w.write_all(b"\\\"")?,
            b'\\' => w.write_all(b"\\\\")?,
            0x08 => w.write_all(b"\\b")?,
            0x0C => w.write_all(b"\\f")?,
            b'\n' => w.write_all(b"\\n")?,
            b'\r' => w.write_all(b"\\r")?,
            b'\t' => w.write_all(b"\\t")?,
            0x00..=0x1F | 0x7F => write!(w, "\\u{:04x}", b)?,
            _ => w.write_all(&[b])?,
        }
    }
    w.write_all(b"\"")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_stat(dev: u64) -> Stat {
        Stat {
            dev,
            ino: 0,
            nlink: 1,
            size: 0,
            blocks: 0,
            is_dir: true,
            notreg: false,
            ext: None,
        }
    }

    fn file_stat(dev: u64, size: u64, blocks: u64) -> Stat {
        Stat {
            dev,
            ino: 0,
            nlink: 1,
            size,
            blocks,
            is_dir: false,
            notreg: false,
            ext: None,
        }
    }

    #[test]
    fn empty_root_produces_valid_shape() {
        let mut exp = Exporter::new(Vec::new(), "rsdu", "0.1.0", 1700000000).unwrap();
        exp.push_name(b"/tmp/root");
        exp.set_stat(&dir_stat(1));
        exp.enter_dir();
        exp.leave_dir();
        let buf = exp.finish().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("[1,2,{"));
        assert!(text.contains("\"name\":\"/tmp/root\""));
        assert!(text.ends_with("]]"));
    }

    #[test]
    fn file_child_is_nested_with_comma_separation() {
        let mut exp = Exporter::new(Vec::new(), "rsdu", "0.1.0", 0).unwrap();
        exp.push_name(b"root");
        exp.set_stat(&dir_stat(1));
        exp.enter_dir();
        exp.push_name(b"a");
        exp.set_stat(&file_stat(1, 4096, 8));
        exp.push_name(b"b");
        exp.set_stat(&file_stat(1, 100, 1));
        exp.leave_dir();
        let buf = exp.finish().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"asize\":4096"));
        assert!(text.contains("\"dsize\":4096")); // 8 blocks * 512
        assert!(text.contains("{\"name\":\"a\""));
        assert!(text.contains("},{\"name\":\"b\""));
    }

    #[test]
    fn control_bytes_are_escaped_but_high_bytes_pass_through() {
        let mut exp = Exporter::new(Vec::new(), "rsdu", "0.1.0", 0).unwrap();
        exp.push_name(&[b'a', 0x01, 0xFF, b'b']);
        exp.set_stat(&dir_stat(1));
        exp.enter_dir();
        exp.leave_dir();
        let buf = exp.finish().unwrap();
        assert!(buf.windows(6).any(|w| w == b"\\u0001"));
        assert!(buf.contains(&0xFFu8));
    }

    #[test]
    fn notreg_entry_carries_notreg_flag() {
        let mut exp = Exporter::new(Vec::new(), "rsdu", "0.1.0", 0).unwrap();
        exp.push_name(b"root");
        exp.set_stat(&dir_stat(1));
        exp.enter_dir();
        exp.push_name(b"a.sock");
        let mut fifo_stat = file_stat(1, 0, 0);
        fifo_stat.notreg = true;
        exp.set_stat(&fifo_stat);
        exp.leave_dir();
        let buf = exp.finish().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"notreg\":true"));
    }

    #[test]
    fn excluded_entry_carries_pattern_tag() {
        let mut exp = Exporter::new(Vec::new(), "rsdu", "0.1.0", 0).unwrap();
        exp.push_name(b"root");
        exp.set_stat(&dir_stat(1));
        exp.enter_dir();
        exp.push_name(b"node_modules");
        exp.set_special(Special::Excluded);
        exp.leave_dir();
        let buf = exp.finish().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"excluded\":\"pattern\""));
    }
}
