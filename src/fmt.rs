//! Streaming output formatter for admin rendering.
//!
//! Admin results (CLI and REST) are built section-by-section and flushed
//! incrementally, so large listings never require the whole document in
//! memory. Two backends: JSON (optionally pretty-printed, the admin
//! default) and XML.

use std::io::{self, Write};

/// Section/value emitter shared by the JSON and XML backends.
///
/// Sections nest; `flush` drains everything emitted so far to the sink and
/// may be called between sections while the document is still open.
pub trait Formatter: Send {
    fn open_object_section(&mut self, name: &str);
    fn open_array_section(&mut self, name: &str);
    fn close_section(&mut self);
    fn dump_string(&mut self, name: &str, val: &str);
    fn dump_int(&mut self, name: &str, val: i64);
    fn flush(&mut self, out: &mut dyn Write) -> io::Result<()>;
}

struct JsonFrame {
    is_array: bool,
    entries: usize,
}

/// JSON formatter. The outermost section renders as the bare document
/// (its name is dropped), matching the admin output format.
pub struct JsonFormatter {
    buf: String,
    stack: Vec<JsonFrame>,
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self {
            buf: String::new(),
            stack: Vec::new(),
            pretty,
        }
    }

    fn indent(&mut self) {
        if self.pretty {
            self.buf.push('\n');
            for _ in 0..self.stack.len() {
                self.buf.push_str("  ");
            }
        }
    }

    /// Comma/indent bookkeeping plus the `"name":` prefix when the
    /// enclosing frame is an object.
    fn entry_prelude(&mut self, name: &str) {
        if let Some(frame) = self.stack.last_mut() {
            if frame.entries > 0 {
                self.buf.push(',');
            }
            frame.entries += 1;
            let in_array = frame.is_array;
            self.indent();
            if !in_array {
                self.buf.push('"');
                self.buf.push_str(&json_escape(name));
                self.buf.push_str("\":");
                if self.pretty {
                    self.buf.push(' ');
                }
            }
        }
    }

    fn open(&mut self, name: &str, is_array: bool) {
        self.entry_prelude(name);
        self.buf.push(if is_array { '[' } else { '{' });
        self.stack.push(JsonFrame {
            is_array,
            entries: 0,
        });
    }
}

impl Formatter for JsonFormatter {
    fn open_object_section(&mut self, name: &str) {
        self.open(name, false);
    }

    fn open_array_section(&mut self, name: &str) {
        self.open(name, true);
    }

    fn close_section(&mut self) {
        let frame = match self.stack.pop() {
            Some(f) => f,
            None => return,
        };
        if frame.entries > 0 {
            self.indent();
        }
        self.buf.push(if frame.is_array { ']' } else { '}' });
    }

    fn dump_string(&mut self, name: &str, val: &str) {
        self.entry_prelude(name);
        self.buf.push('"');
        self.buf.push_str(&json_escape(val));
        self.buf.push('"');
    }

    fn dump_int(&mut self, name: &str, val: i64) {
        self.entry_prelude(name);
        let mut itoa_buf = itoa::Buffer::new();
        self.buf.push_str(itoa_buf.format(val));
    }

    fn flush(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.buf.as_bytes())?;
        self.buf.clear();
        Ok(())
    }
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// XML formatter. Array sections render as a wrapping element whose
/// entries repeat inside it.
pub struct XmlFormatter {
    buf: String,
    stack: Vec<String>,
    pretty: bool,
}

impl XmlFormatter {
    pub fn new(pretty: bool) -> Self {
        Self {
            buf: String::new(),
            stack: Vec::new(),
            pretty,
        }
    }

    fn indent(&mut self) {
        if self.pretty && !self.buf.is_empty() {
            self.buf.push('\n');
            for _ in 0..self.stack.len() {
                self.buf.push_str("  ");
            }
        }
    }
}

impl Formatter for XmlFormatter {
    fn open_object_section(&mut self, name: &str) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        self.buf.push('>');
        self.stack.push(name.to_string());
    }

    fn open_array_section(&mut self, name: &str) {
        self.open_object_section(name);
    }

    fn close_section(&mut self) {
        let name = match self.stack.pop() {
            Some(n) => n,
            None => return,
        };
        self.indent();
        self.buf.push_str("</");
        self.buf.push_str(&name);
        self.buf.push('>');
    }

    fn dump_string(&mut self, name: &str, val: &str) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        self.buf.push('>');
        self.buf.push_str(&xml_escape(val));
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
    }

    fn dump_int(&mut self, name: &str, val: i64) {
        let mut itoa_buf = itoa::Buffer::new();
        self.dump_string(name, itoa_buf.format(val));
    }

    fn flush(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.buf.as_bytes())?;
        self.buf.clear();
        Ok(())
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Construct the formatter selected by `--format` / `format=`.
/// Returns `None` for an unrecognized format name.
pub fn for_format(format: &str, pretty: bool) -> Option<Box<dyn Formatter>> {
    match format {
        "json" => Some(Box::new(JsonFormatter::new(pretty))),
        "xml" => Some(Box::new(XmlFormatter::new(pretty))),
        _ => None,
    }
}

/// Render everything buffered so far into a String (admin REST bodies).
pub fn into_string(f: &mut dyn Formatter) -> String {
    let mut out = Vec::new();
    // Writing to a Vec cannot fail.
    let _ = f.flush(&mut out);
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: &mut dyn Formatter) -> String {
        into_string(f)
    }

    #[test]
    fn test_json_object() {
        let mut f = JsonFormatter::new(false);
        f.open_object_section("user_info");
        f.dump_string("user_id", "alice");
        f.dump_int("max_buckets", 1000);
        f.close_section();
        assert_eq!(render(&mut f), r#"{"user_id":"alice","max_buckets":1000}"#);
    }

    #[test]
    fn test_json_nested_array() {
        let mut f = JsonFormatter::new(false);
        f.open_object_section("top");
        f.open_array_section("keys");
        f.open_object_section("key");
        f.dump_string("access_key", "AK1");
        f.close_section();
        f.open_object_section("key");
        f.dump_string("access_key", "AK2");
        f.close_section();
        f.close_section();
        f.close_section();
        assert_eq!(
            render(&mut f),
            r#"{"keys":[{"access_key":"AK1"},{"access_key":"AK2"}]}"#
        );
    }

    #[test]
    fn test_json_escaping() {
        let mut f = JsonFormatter::new(false);
        f.open_object_section("t");
        f.dump_string("name", "a\"b\\c");
        f.close_section();
        assert_eq!(render(&mut f), r#"{"name":"a\"b\\c"}"#);
    }

    #[test]
    fn test_json_pretty() {
        let mut f = JsonFormatter::new(true);
        f.open_object_section("t");
        f.dump_string("a", "1");
        f.close_section();
        assert_eq!(render(&mut f), "{\n  \"a\": \"1\"\n}");
    }

    #[test]
    fn test_xml_sections() {
        let mut f = XmlFormatter::new(false);
        f.open_object_section("stats");
        f.dump_string("bucket", "b");
        f.dump_int("num_objects", 3);
        f.close_section();
        assert_eq!(
            render(&mut f),
            "<stats><bucket>b</bucket><num_objects>3</num_objects></stats>"
        );
    }

    #[test]
    fn test_xml_escaping() {
        let mut f = XmlFormatter::new(false);
        f.open_object_section("t");
        f.dump_string("v", "a<b&c");
        f.close_section();
        assert_eq!(render(&mut f), "<t><v>a&lt;b&amp;c</v></t>");
    }

    #[test]
    fn test_incremental_flush() {
        let mut f = JsonFormatter::new(false);
        f.open_array_section("entries");
        f.dump_string("e", "one");
        let first = render(&mut f);
        f.dump_string("e", "two");
        f.close_section();
        let second = render(&mut f);
        assert_eq!(format!("{}{}", first, second), r#"["one","two"]"#);
    }

    #[test]
    fn test_for_format() {
        assert!(for_format("json", false).is_some());
        assert!(for_format("xml", true).is_some());
        assert!(for_format("yaml", false).is_none());
    }
}
