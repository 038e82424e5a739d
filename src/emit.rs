//! Indented XML text output.

use std::borrow::Cow;
use std::fmt::Display;

use nalgebra::Vector3;

/// Line-oriented XML buffer with four-space indentation.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    output: String,
    indent: usize,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self {
            output: String::with_capacity(4096),
            indent: 0,
        }
    }

    pub(crate) fn write_line(&mut self, line: &str) {
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    /// Write an opening tag and indent.
    pub(crate) fn open(&mut self, tag: &str) {
        self.write_line(tag);
        self.indent += 1;
    }

    /// Dedent and write a closing tag.
    pub(crate) fn close(&mut self, tag: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.write_line(tag);
    }

    /// `<tag>text</tag>` on one line.
    pub(crate) fn leaf(&mut self, tag: &str, text: impl Display) {
        let name = tag.split_whitespace().next().unwrap_or(tag);
        self.write_line(&format!("<{tag}>{text}</{name}>"));
    }

    pub(crate) fn finish(self) -> String {
        self.output
    }
}

/// Escape text for use inside an attribute or element.
pub(crate) fn esc(s: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(s)
}

/// Space-separated vector components.
pub(crate) fn vec3(v: &Vector3<f64>) -> String {
    format!("{} {} {}", v.x, v.y, v.z)
}

/// Space-separated list of displayable values.
pub(crate) fn join<T: Display>(values: impl IntoIterator<Item = T>) -> String {
    let mut out = String::new();
    for (i, v) in values.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&v.to_string());
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_and_leaf() {
        let mut e = Emitter::new();
        e.open("<a>");
        e.leaf(r#"float_array id="x""#, join([1.0, 2.5]));
        e.close("</a>");
        assert_eq!(
            e.finish(),
            "<a>\n    <float_array id=\"x\">1 2.5</float_array>\n</a>\n"
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(esc("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
