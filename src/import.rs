//! Dump file parser (§4.4)
//!
//! A bespoke recursive-descent reader for the `[MAJOR,MINOR,{metadata},root]`
//! wire shape `export.rs` writes. `serde_json` is deliberately not used here
//! either: the importer needs byte-exact line:column diagnostics, a capped
//! name buffer, and a custom escape decoder that tolerates the raw non-UTF-8
//! bytes the exporter passes through verbatim — none of which a generic
//! deserializer gives direct control over.

use crate::error::{io_error_with_path, Result, RsduError};
use crate::sink::{ExtStat, Sink, Special, Stat};
use crate::util::{clamp_u32, truncate_u32};
use std::fs;
use std::path::Path;

/// Per-element keys may carry a filename up to this many bytes; beyond
/// that a dump is almost certainly corrupt rather than legitimately
/// long, so the importer rejects it instead of growing without bound.
const MAX_NAME_BYTES: usize = 32 * 1024;

/// Parse the dump at `path`, feeding every element to `sink` (§4.4).
pub fn import_root<S: Sink>(path: &Path, sink: &mut S) -> Result<()> {
    let data = fs::read(path).map_err(|e| io_error_with_path(e, path))?;
    import_from_slice(&data, sink)
}

/// Parse an already-loaded dump buffer, feeding every element to `sink`.
pub fn import_from_slice<S: Sink>(data: &[u8], sink: &mut S) -> Result<()> {
    Parser::new(data).parse_document(sink)
}

#[derive(Default)]
struct HeaderFields {
    name: Option<Vec<u8>>,
    dev: Option<u64>,
    ino: Option<u64>,
    nlink: Option<u32>,
    size: Option<u64>,
    blocks: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
    mode: Option<u16>,
    mtime: Option<i64>,
    read_error: Option<bool>,
    excluded: Option<String>,
    notreg: Option<bool>,
}

impl HeaderFields {
    fn to_stat(&self, is_dir: bool, dev: u64) -> Stat {
        let ext = if self.uid.is_some() || self.gid.is_some() || self.mode.is_some() || self.mtime.is_some()
        {
            Some(ExtStat {
                mtime: self.mtime.unwrap_or(0),
                uid: self.uid.unwrap_or(0),
                gid: self.gid.unwrap_or(0),
                mode: self.mode.unwrap_or(0),
            })
        } else {
            None
        };
        Stat {
            dev,
            ino: self.ino.unwrap_or(0),
            nlink: self.nlink.unwrap_or(1),
            size: self.size.unwrap_or(0),
            blocks: self.blocks.unwrap_or(0),
            is_dir,
            notreg: self.notreg.unwrap_or(false),
            ext,
        }
    }
}

/// Byte-cursor parser tracking 1-based line:column for diagnostics. Holds
/// a stack of the device each currently-open directory was stamped with,
/// mirroring the exporter's `parent_dev` stack, so that a child whose
/// `dev` key was omitted (same device as its parent, §4.3) inherits the
/// right value instead of defaulting to zero.
struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    dev_stack: Vec<u64>,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            line: 1,
            column: 1,
            dev_stack: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')) {
            self.bump();
        }
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.bump() {
            Some(b) if b == want => Ok(()),
            _ => Err(self.err(format!("expected '{}'", want as char))),
        }
    }

    fn expect_literal(&mut self, lit: &str) -> Result<()> {
        for want in lit.bytes() {
            match self.bump() {
                Some(b) if b == want => {}
                _ => return Err(self.err(format!("expected '{}'", lit))),
            }
        }
        Ok(())
    }

    fn err(&self, message: impl Into<String>) -> RsduError {
        RsduError::parse_error(self.line, self.column, message)
    }

    fn current_dev(&self) -> u64 {
        self.dev_stack.last().copied().unwrap_or(0)
    }

    fn parse_document<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.skip_ws();
        self.expect(b'[')?;
        self.skip_ws();
        let major = self.parse_u64()?;
        if major != crate::export::FORMAT_MAJOR as u64 {
            return Err(self.err(format!(
                "unsupported format major version {} (expected {})",
                major,
                crate::export::FORMAT_MAJOR
            )));
        }
        self.skip_ws();
        self.expect(b',')?;
        self.skip_ws();
        self.parse_u64()?; // minor
        self.skip_ws();
        self.expect(b',')?;
        self.skip_ws();
        self.skip_value()?; // metadata object: not needed to rebuild the tree
        self.skip_ws();
        self.expect(b',')?;
        self.skip_ws();
        self.parse_element(sink)?;
        self.skip_ws();
        // Any further elements are a newer format's trailing fields; discard
        // them structurally rather than reject the whole dump (§4.4).
        loop {
            match self.peek() {
                Some(b',') => {
                    self.bump();
                    self.skip_ws();
                    self.skip_value()?;
                    self.skip_ws();
                }
                Some(b']') => {
                    self.bump();
                    break;
                }
                _ => return Err(self.err("expected ',' or ']' closing document")),
            }
        }
        Ok(())
    }

    fn parse_element<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.skip_ws();
        match self.peek() {
            Some(b'[') => self.parse_dir(sink),
            Some(b'{') => self.parse_leaf(sink),
            _ => Err(self.err("expected '[' or '{' starting an element")),
        }
    }

    fn parse_dir<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.expect(b'[')?;
        self.skip_ws();
        let fields = self.parse_header_object()?;
        let dev = fields.dev.unwrap_or_else(|| self.current_dev());
        sink.push_name(fields.name.as_deref().unwrap_or_default());
        sink.set_stat(&fields.to_stat(true, dev));
        sink.enter_dir();
        self.dev_stack.push(dev);
        self.skip_ws();
        loop {
            match self.peek() {
                Some(b']') => {
                    self.bump();
                    break;
                }
                Some(b',') => {
                    self.bump();
                    self.skip_ws();
                    self.parse_element(sink)?;
                    self.skip_ws();
                }
                _ => {
                    self.dev_stack.pop();
                    return Err(self.err("expected ',' or ']' in directory listing"));
                }
            }
        }
        self.dev_stack.pop();
        sink.leave_dir();
        Ok(())
    }

    fn parse_leaf<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        let fields = self.parse_header_object()?;
        let dev = fields.dev.unwrap_or_else(|| self.current_dev());
        sink.push_name(fields.name.as_deref().unwrap_or_default());
        if let Some(true) = fields.read_error {
            sink.set_special(Special::ReadError);
        } else if let Some(tag) = fields.excluded.as_deref() {
            let special = match tag {
                "othfs" => Special::OtherFs,
                "kernfs" => Special::Kernfs,
                _ => Special::Excluded,
            };
            sink.set_special(special);
        } else {
            sink.set_stat(&fields.to_stat(false, dev));
        }
        Ok(())
    }

    fn parse_header_object(&mut self) -> Result<HeaderFields> {
        self.expect(b'{')?;
        self.skip_ws();
        let mut fields = HeaderFields::default();
        if self.peek() == Some(b'}') {
            self.bump();
        } else {
            loop {
                self.skip_ws();
                let key_line = self.line;
                let key_col = self.column;
                let key = self.parse_key()?;
                self.skip_ws();
                self.expect(b':')?;
                self.skip_ws();
                match key.as_str() {
                    "name" => {
                        if fields.name.is_some() {
                            return Err(RsduError::parse_error(
                                key_line,
                                key_col,
                                "duplicate 'name' key",
                            ));
                        }
                        fields.name = Some(self.parse_string(Some(MAX_NAME_BYTES))?);
                    }
                    "asize" => fields.size = Some(self.parse_u64()?),
                    "dsize" => fields.blocks = Some(self.parse_u64()? >> 9),
                    "dev" => fields.dev = Some(self.parse_u64()?),
                    "ino" => fields.ino = Some(self.parse_u64()?),
                    "nlink" => fields.nlink = Some(clamp_u32(self.parse_i64()?)),
                    "hlnkc" => {
                        self.parse_bool()?;
                    }
                    "uid" => fields.uid = Some(truncate_u32(self.parse_u64()?)),
                    "gid" => fields.gid = Some(truncate_u32(self.parse_u64()?)),
                    "mode" => fields.mode = Some(self.parse_u64()? as u16),
                    "mtime" => fields.mtime = Some(self.parse_i64()?),
                    "read_error" => fields.read_error = Some(self.parse_bool()?),
                    "notreg" => fields.notreg = Some(self.parse_bool()?),
                    "excluded" => {
                        let raw = self.parse_string(None)?;
                        fields.excluded = Some(String::from_utf8_lossy(&raw).into_owned());
                    }
                    _ => self.skip_value()?,
                }
                self.skip_ws();
                match self.bump() {
                    Some(b',') => continue,
                    Some(b'}') => break,
                    _ => return Err(self.err("expected ',' or '}' in object")),
                }
            }
        }
        if fields.name.is_none() {
            return Err(self.err("missing required 'name' key"));
        }
        Ok(fields)
    }

    fn parse_key(&mut self) -> Result<String> {
        let bytes = self.parse_string(None)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads a quoted JSON string, undoing the five named escapes and
    /// `\uXXXX`; every other byte (including non-UTF-8 bytes) is copied
    /// through unchanged, the mirror image of `export.rs`'s writer.
    fn parse_string(&mut self, max_len: Option<usize>) -> Result<Vec<u8>> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push(b'"'),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'/') => out.push(b'/'),
                    Some(b'n') => out.push(b'\n'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'b') => out.push(0x08),
                    Some(b'f') => out.push(0x0C),
                    Some(b'u') => {
                        let cp = self.parse_hex4()?;
                        let ch = char::from_u32(cp).unwrap_or('\u{FFFD}');
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                    _ => return Err(self.err("invalid escape sequence")),
                },
                Some(b) => out.push(b),
            }
            if let Some(cap) = max_len {
                if out.len() > cap {
                    return Err(self.err(format!("name exceeds {}-byte limit", cap)));
                }
            }
        }
        Ok(out)
    }

    fn parse_hex4(&mut self) -> Result<u32> {
        let mut v: u32 = 0;
        for _ in 0..4 {
            let b = self.bump().ok_or_else(|| self.err("unterminated \\u escape"))?;
            let d = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                _ => return Err(self.err("invalid hex digit in \\u escape")),
            };
            v = v * 16 + d as u32;
        }
        Ok(v)
    }

    /// Accumulates with saturating arithmetic rather than overflowing;
    /// a fractional or exponent tail is consumed but only the integer
    /// part feeds the result, since every numeric field this format
    /// carries is an integer count.
    fn parse_u64(&mut self) -> Result<u64> {
        let start_line = self.line;
        let start_col = self.column;
        let mut saw_digit = false;
        let mut value: u64 = 0;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                saw_digit = true;
                value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
                self.bump();
            } else {
                break;
            }
        }
        if !saw_digit {
            return Err(RsduError::parse_error(start_line, start_col, "expected a number"));
        }
        self.skip_number_tail();
        Ok(value)
    }

    fn parse_i64(&mut self) -> Result<i64> {
        let negative = if self.peek() == Some(b'-') {
            self.bump();
            true
        } else {
            false
        };
        let magnitude = self.parse_u64()?;
        Ok(if negative {
            if magnitude > i64::MAX as u64 {
                i64::MIN
            } else {
                -(magnitude as i64)
            }
        } else if magnitude > i64::MAX as u64 {
            i64::MAX
        } else {
            magnitude as i64
        })
    }

    fn parse_bool(&mut self) -> Result<bool> {
        match self.peek() {
            Some(b't') => {
                self.expect_literal("true")?;
                Ok(true)
            }
            Some(b'f') => {
                self.expect_literal("false")?;
                Ok(false)
            }
            _ => Err(self.err("expected a boolean")),
        }
    }

    fn skip_number_tail(&mut self) {
        if self.peek() == Some(b'.') {
            self.bump();
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.bump();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.bump();
            }
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.bump();
            }
        }
    }

    fn skip_number(&mut self) -> Result<()> {
        if self.peek() == Some(b'-') {
            self.bump();
        }
        let mut saw_digit = false;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            saw_digit = true;
            self.bump();
        }
        if !saw_digit {
            return Err(self.err("expected a number"));
        }
        self.skip_number_tail();
        Ok(())
    }

    /// Structurally consumes one JSON value of any shape without
    /// interpreting it — used for the document's metadata object, for
    /// unrecognized header keys, and for trailing top-level elements a
    /// newer format minor might add (§4.4 forward compatibility).
    fn skip_value(&mut self) -> Result<()> {
        self.skip_ws();
        match self.peek() {
            Some(b'"') => {
                self.parse_string(None)?;
            }
            Some(b'{') => {
                self.bump();
                self.skip_ws();
                if self.peek() == Some(b'}') {
                    self.bump();
                    return Ok(());
                }
                loop {
                    self.skip_ws();
                    self.parse_string(None)?;
                    self.skip_ws();
                    self.expect(b':')?;
                    self.skip_value()?;
                    self.skip_ws();
                    match self.bump() {
                        Some(b',') => continue,
                        Some(b'}') => break,
                        _ => return Err(self.err("expected ',' or '}' in object")),
                    }
                }
            }
            Some(b'[') => {
                self.bump();
                self.skip_ws();
                if self.peek() == Some(b']') {
                    self.bump();
                    return Ok(());
                }
                loop {
                    self.skip_value()?;
                    self.skip_ws();
                    match self.bump() {
                        Some(b',') => {
                            self.skip_ws();
                            continue;
                        }
                        Some(b']') => break,
                        _ => return Err(self.err("expected ',' or ']' in array")),
                    }
                }
            }
            Some(b't') => self.expect_literal("true")?,
            Some(b'f') => self.expect_literal("false")?,
            Some(b'n') => self.expect_literal("null")?,
            Some(b'-') | Some(b'0'..=b'9') => self.skip_number()?,
            _ => return Err(self.err("unexpected value")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn imports_empty_root_directory() {
        let dump = br#"[1,2,{"progname":"rsdu","progver":"0.1.0","timestamp":0},
            [{"name":"/tmp/root","dev":1}]]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        let root = model.root().unwrap();
        assert_eq!(model.get(root).name_lossy(), "/tmp/root");
        assert_eq!(model.children(root).count(), 0);
    }

    #[test]
    fn imports_nested_files_and_aggregates() {
        let dump = br#"[1,2,{},
            [{"name":"root","dev":1},
              {"name":"a.txt","asize":4096,"dsize":4096},
              {"name":"b.txt","asize":100,"dsize":512}
            ]]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        let root = model.root().unwrap();
        let dir = model.get(root).as_dir().unwrap();
        assert_eq!(dir.items, 2);
        assert_eq!(model.get(root).size, 4196);
        assert_eq!(model.children(root).count(), 2);
    }

    #[test]
    fn child_inherits_parent_device_when_omitted() {
        let dump = br#"[1,2,{},
            [{"name":"root","dev":7},
              {"name":"child.txt","asize":1}
            ]]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        let root = model.root().unwrap();
        let child = model.children(root).next().unwrap();
        // A plain file carries no dev field directly on `Entry`, but a
        // mismatched device would have routed this file onto a distinct
        // DeviceId bucket and changed hard-link bookkeeping; reaching
        // this point without panicking on an unknown device is the
        // behavior under test.
        assert_eq!(model.get(child).name_lossy(), "child.txt");
    }

    #[test]
    fn read_error_flag_becomes_special() {
        let dump = br#"[1,2,{},
            [{"name":"root","dev":1},
              {"name":"broken","read_error":true}
            ]]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        let root = model.root().unwrap();
        let child = model.children(root).next().unwrap();
        assert!(model.get(child).has_err());
    }

    #[test]
    fn duplicate_name_key_is_rejected() {
        let dump = br#"[1,2,{},[{"name":"root","name":"again","dev":1}]]"#;
        let mut model = Model::new();
        let err = import_from_slice(dump, &mut model).unwrap_err();
        assert!(matches!(err, RsduError::ParseError { .. }));
    }

    #[test]
    fn missing_name_key_is_rejected() {
        let dump = br#"[1,2,{},[{"dev":1}]]"#;
        let mut model = Model::new();
        let err = import_from_slice(dump, &mut model).unwrap_err();
        assert!(matches!(err, RsduError::ParseError { .. }));
    }

    #[test]
    fn name_exceeding_cap_is_rejected() {
        let mut name = String::from("\"");
        name.push_str(&"x".repeat(MAX_NAME_BYTES + 1));
        name.push('"');
        let dump = format!(r#"[1,2,{{}},[{{"name":{}}}]]"#, name);
        let mut model = Model::new();
        let err = import_from_slice(dump.as_bytes(), &mut model).unwrap_err();
        assert!(matches!(err, RsduError::ParseError { .. }));
    }

    #[test]
    fn unknown_keys_are_skipped_structurally() {
        let dump = br#"[1,2,{},[{"name":"root","dev":1,"future":{"nested":[1,2,3]},"other":"x"}]]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        assert!(model.root().is_some());
    }

    #[test]
    fn control_byte_escape_round_trips() {
        let dump = b"[1,2,{},[{\"name\":\"a\\u0001b\",\"dev\":1}]]";
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        let root = model.root().unwrap();
        assert_eq!(model.get(root).name, vec![b'a', 0x01, b'b']);
    }

    #[test]
    fn hardlink_round_trips_through_export_and_import() {
        use crate::export::Exporter;

        let mut exp = Exporter::new(Vec::new(), "rsdu", "0.1.0", 0).unwrap();
        exp.push_name(b"root");
        exp.set_stat(&Stat {
            dev: 1,
            ino: 0,
            nlink: 1,
            size: 0,
            blocks: 0,
            is_dir: true,
            notreg: false,
            ext: None,
        });
        exp.enter_dir();
        exp.push_name(b"hardlinked.bin");
        exp.set_stat(&Stat {
            dev: 1,
            ino: 42,
            nlink: 2,
            size: 4096,
            blocks: 8,
            is_dir: false,
            notreg: false,
            ext: None,
        });
        exp.leave_dir();
        let bytes = exp.finish().unwrap();

        let mut model = Model::new();
        import_from_slice(&bytes, &mut model).unwrap();
        let root = model.root().unwrap();
        let child = model.children(root).next().unwrap();
        let link = model.get(child).as_link().unwrap();
        assert_eq!(link.inode, 42);
        assert_eq!(link.nlink, 2);
    }

    #[test]
    fn trailing_document_elements_are_discarded() {
        let dump = br#"[1,2,{},[{"name":"root","dev":1}],"future-trailer",42]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        assert!(model.root().is_some());
    }

    #[test]
    fn notreg_key_is_parsed_onto_file_data() {
        let dump = br#"[1,2,{},[{"name":"root","dev":1},{"name":"a.sock","notreg":true}]]"#;
        let mut model = Model::new();
        import_from_slice(dump, &mut model).unwrap();
        let root = model.root().unwrap();
        let child = model.children(root).next().unwrap();
        assert!(model.get(child).as_file().unwrap().notreg);
    }

    #[test]
    fn unsupported_major_version_is_rejected() {
        let dump = br#"[2,0,{},[{"name":"root","dev":1}]]"#;
        let mut model = Model::new();
        assert!(import_from_slice(dump, &mut model).is_err());
    }
}
