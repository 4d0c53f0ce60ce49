//! Single-pass selective JSON scanner.
//!
//! Extracts the `id`, `method` and `params` members of a JSON-RPC envelope
//! without building a DOM for the rest of the document. Unknown members are
//! skipped with an iterative bracket tracker, so memory use does not depend on
//! how deeply nested the skipped values are: one bit per nesting level records
//! whether the open container is an object or an array.
//!
//! The scanner only borrows from the input buffer. Recognized members are
//! returned as raw byte spans and decoded by the caller.
//!
//! # Failure classes
//!
//! - Body above the ceiling: `RequestTooLarge`, checked before any byte is
//!   looked at.
//! - Broken structure (truncated input, unterminated string, bad escape,
//!   mismatched brackets, trailing garbage, empty body): `ParseError`.
//! - Well-formed but not an envelope (scalar, empty batch, batch above the
//!   ceiling): `InvalidRequest`.

use crate::error::GatewayError;

/// Size ceilings applied by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub max_body_size: usize,
    pub max_batch_size: usize,
}

/// Raw spans of the recognized members of one object.
///
/// Spans include the JSON delimiters (quotes for strings, brackets for
/// containers). Duplicate members keep the last occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScannedObject<'a> {
    pub id: Option<&'a [u8]>,
    pub method: Option<&'a [u8]>,
    pub params: Option<&'a [u8]>,
}

/// One element of a batch array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannedItem<'a> {
    Object(ScannedObject<'a>),
    /// The element was valid JSON but not an object.
    NotAnObject,
}

/// Scanner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scanned<'a> {
    Single(ScannedObject<'a>),
    Batch(Vec<ScannedItem<'a>>),
}

/// Scan a request body.
pub fn scan<'a>(buf: &'a [u8], limits: &ScanLimits) -> Result<Scanned<'a>, GatewayError> {
    // O(1): never look at the bytes of an oversized body.
    if buf.len() > limits.max_body_size {
        return Err(GatewayError::RequestTooLarge {
            size: buf.len(),
            limit: limits.max_body_size,
        });
    }

    let mut cursor = Cursor::new(buf);
    cursor.skip_ws();
    let scanned = match cursor.peek() {
        None => return Err(parse_error("empty request body")),
        Some(b'{') => Scanned::Single(cursor.object()?),
        Some(b'[') => Scanned::Batch(cursor.batch(limits.max_batch_size)?),
        Some(_) => {
            cursor.value()?;
            cursor.finish()?;
            return Err(GatewayError::invalid_request(
                "top-level value must be an object or an array",
            ));
        }
    };
    cursor.finish()?;

    if let Scanned::Batch(items) = &scanned {
        if items.is_empty() {
            return Err(GatewayError::invalid_request("empty batch"));
        }
    }
    Ok(scanned)
}

fn parse_error(details: impl Into<String>) -> GatewayError {
    GatewayError::ParseError {
        details: details.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Member {
    Id,
    Method,
    Params,
}

/// Classify an object key span (quotes included).
fn member_of(key: &[u8]) -> Option<Member> {
    let inner = &key[1..key.len() - 1];
    let matches = |name: &[u8]| -> bool {
        if inner.contains(&b'\\') {
            serde_json::from_slice::<String>(key)
                .map(|decoded| decoded.as_bytes() == name)
                .unwrap_or(false)
        } else {
            inner == name
        }
    };
    if matches(b"method") {
        Some(Member::Method)
    } else if matches(b"params") {
        Some(Member::Params)
    } else if matches(b"id") {
        Some(Member::Id)
    } else {
        None
    }
}

/// Nesting record for skipped containers: one bit per level, set for objects.
struct NestingStack {
    words: Vec<u64>,
    depth: usize,
}

impl NestingStack {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            depth: 0,
        }
    }

    fn push(&mut self, is_object: bool) {
        let (word, bit) = (self.depth / 64, self.depth % 64);
        if word == self.words.len() {
            self.words.push(0);
        }
        if is_object {
            self.words[word] |= 1 << bit;
        } else {
            self.words[word] &= !(1 << bit);
        }
        self.depth += 1;
    }

    fn pop(&mut self) -> Option<bool> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        let (word, bit) = (self.depth / 64, self.depth % 64);
        Some(self.words[word] & (1 << bit) != 0)
    }

    fn is_empty(&self) -> bool {
        self.depth == 0
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    #[inline]
    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), GatewayError> {
        self.skip_ws();
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(parse_error(format!(
                "expected '{}' at offset {}, found '{}'",
                byte as char, self.pos, b as char
            ))),
            None => Err(parse_error(format!(
                "expected '{}', found end of input",
                byte as char
            ))),
        }
    }

    /// Require that only whitespace remains.
    fn finish(&mut self) -> Result<(), GatewayError> {
        self.skip_ws();
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(parse_error(format!("trailing characters at offset {}", self.pos)))
        }
    }

    /// Consume a string starting at the opening quote. Returns the span with
    /// both quotes.
    fn string(&mut self) -> Result<&'a [u8], GatewayError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                None => return Err(parse_error("unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(&self.buf[start..self.pos]);
                }
                Some(b'\\') => match self.buf.get(self.pos + 1) {
                    Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => {
                        self.pos += 2;
                    }
                    Some(b'u') => {
                        let hex = self.buf.get(self.pos + 2..self.pos + 6);
                        match hex {
                            Some(digits) if digits.iter().all(u8::is_ascii_hexdigit) => {
                                self.pos += 6;
                            }
                            _ => return Err(parse_error("invalid unicode escape")),
                        }
                    }
                    Some(_) => return Err(parse_error("invalid escape sequence")),
                    None => return Err(parse_error("unterminated string")),
                },
                Some(c) if c < 0x20 => {
                    return Err(parse_error("control character in string"));
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Consume a number or `true`/`false`/`null`.
    fn literal(&mut self) -> Result<(), GatewayError> {
        let start = self.pos;
        let valid = match self.peek() {
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(b'a'..=b'z') => {
                while let Some(b'a'..=b'z') = self.peek() {
                    self.pos += 1;
                }
                matches!(&self.buf[start..self.pos], b"true" | b"false" | b"null")
            }
            _ => return Err(parse_error(format!("unexpected character at offset {start}"))),
        };
        // A literal must not run into trailing word characters (`01`, `1.5x`, `nullx`).
        let runs_on = matches!(
            self.peek(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'+' | b'-' | b'.')
        );
        if valid && !runs_on {
            Ok(())
        } else {
            Err(parse_error(format!("invalid literal at offset {start}")))
        }
    }

    /// Consume `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
    /// Returns false as soon as the grammar is violated.
    fn number(&mut self) -> bool {
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => {
                self.digits();
            }
            _ => return false,
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            if self.digits() == 0 {
                return false;
            }
        }
        if let Some(b'e' | b'E') = self.peek() {
            self.pos += 1;
            if let Some(b'+' | b'-') = self.peek() {
                self.pos += 1;
            }
            if self.digits() == 0 {
                return false;
            }
        }
        true
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while let Some(b'0'..=b'9') = self.peek() {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Skip a container starting at `{` or `[` without materializing it.
    fn skip_container(&mut self) -> Result<(), GatewayError> {
        let mut nesting = NestingStack::new();
        loop {
            self.skip_ws();
            let Some(byte) = self.peek() else {
                return Err(parse_error("unexpected end of input"));
            };
            match byte {
                b'{' | b'[' => {
                    nesting.push(byte == b'{');
                    self.pos += 1;
                }
                b'}' | b']' => {
                    match nesting.pop() {
                        Some(is_object) if is_object == (byte == b'}') => {}
                        _ => {
                            return Err(parse_error(format!(
                                "mismatched '{}' at offset {}",
                                byte as char, self.pos
                            )));
                        }
                    }
                    self.pos += 1;
                    if nesting.is_empty() {
                        return Ok(());
                    }
                }
                b'"' => {
                    self.string()?;
                }
                b',' | b':' => self.pos += 1,
                _ => self.literal()?,
            }
        }
    }

    /// Consume any JSON value and return its span.
    fn value(&mut self) -> Result<&'a [u8], GatewayError> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            None => return Err(parse_error("unexpected end of input")),
            Some(b'"') => {
                self.string()?;
            }
            Some(b'{' | b'[') => self.skip_container()?,
            Some(_) => self.literal()?,
        }
        Ok(&self.buf[start..self.pos])
    }

    /// Scan an object at the cursor, keeping spans of the envelope members.
    fn object(&mut self) -> Result<ScannedObject<'a>, GatewayError> {
        self.expect(b'{')?;
        let mut scanned = ScannedObject::default();

        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(scanned);
        }

        loop {
            self.skip_ws();
            if self.peek() != Some(b'"') {
                return Err(parse_error(format!("expected object key at offset {}", self.pos)));
            }
            let key = self.string()?;
            self.expect(b':')?;
            let value = self.value()?;

            match member_of(key) {
                Some(Member::Id) => scanned.id = Some(value),
                Some(Member::Method) => scanned.method = Some(value),
                Some(Member::Params) => scanned.params = Some(value),
                None => {}
            }

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(scanned);
                }
                _ => return Err(parse_error(format!("expected ',' or '}}' at offset {}", self.pos))),
            }
        }
    }

    /// Scan an array of envelopes.
    fn batch(&mut self, max_batch_size: usize) -> Result<Vec<ScannedItem<'a>>, GatewayError> {
        self.expect(b'[')?;
        let mut items = Vec::new();

        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(items);
        }

        loop {
            self.skip_ws();
            let item = if self.peek() == Some(b'{') {
                ScannedItem::Object(self.object()?)
            } else {
                self.value()?;
                ScannedItem::NotAnObject
            };
            items.push(item);

            if items.len() > max_batch_size {
                return Err(GatewayError::invalid_request(format!(
                    "batch exceeds the maximum of {max_batch_size} calls per request"
                )));
            }

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(parse_error(format!("expected ',' or ']' at offset {}", self.pos))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: ScanLimits = ScanLimits {
        max_body_size: 1024 * 1024,
        max_batch_size: 16,
    };

    fn single(input: &str) -> ScannedObject<'_> {
        match scan(input.as_bytes(), &LIMITS) {
            Ok(Scanned::Single(obj)) => obj,
            other => panic!("expected single object, got {other:?}"),
        }
    }

    fn text(span: Option<&[u8]>) -> &str {
        std::str::from_utf8(span.expect("span present")).unwrap()
    }

    #[test]
    fn test_extracts_members_in_any_order() {
        let a = single(r#"{"id":1,"method":"echo","params":[1,2]}"#);
        let b = single(r#"{"params":[1,2],"method":"echo","id":1}"#);
        assert_eq!(a, b);
        assert_eq!(text(a.method), r#""echo""#);
        assert_eq!(text(a.params), "[1,2]");
        assert_eq!(text(a.id), "1");
    }

    #[test]
    fn test_skips_unknown_members_of_any_shape() {
        let obj = single(
            r#"{
                "before": {"a": [1, {"b": [[], {}]}], "c": "}]"},
                "method": "echo",
                "between": [true, false, null, -1.5e3, "x\"y"],
                "params": ["p"],
                "after": {"deep": [[[[{"x": "\\"}]]]]}
            }"#,
        );
        assert_eq!(text(obj.method), r#""echo""#);
        assert_eq!(text(obj.params), r#"["p"]"#);
        assert!(obj.id.is_none());
    }

    #[test]
    fn test_escaped_member_name_is_recognized() {
        let obj = single(r#"{"\u006dethod":"echo"}"#);
        assert_eq!(text(obj.method), r#""echo""#);
    }

    #[test]
    fn test_deep_nesting_is_skipped_iteratively() {
        let depth = 100_000;
        let garbage = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let input = format!(r#"{{"garbage":{garbage},"method":"m"}}"#);
        let obj = single(&input);
        assert_eq!(text(obj.method), r#""m""#);
    }

    #[test]
    fn test_size_checked_before_structure() {
        let limits = ScanLimits {
            max_body_size: 8,
            max_batch_size: 16,
        };
        // Garbage that would also be a parse error.
        let result = scan(b"{{{{{{{{{{{{", &limits);
        assert!(matches!(
            result,
            Err(GatewayError::RequestTooLarge { size: 12, limit: 8 })
        ));
    }

    #[test]
    fn test_malformed_inputs_are_parse_errors() {
        let cases = [
            "",
            "   ",
            r#"{"method":"echo""#,
            r#"{"method":"echo}"#,
            r#"{"method":"echo","params":[1,2}"#,
            r#"{"method":"echo"} garbage"#,
            r#"{"method":"ec\qho"}"#,
            r#"{"method":"echo","x":tru}"#,
            r#"{"method" "echo"}"#,
            r#"[{"method":"echo"},"#,
        ];
        for case in cases {
            let result = scan(case.as_bytes(), &LIMITS);
            assert!(
                matches!(result, Err(GatewayError::ParseError { .. })),
                "{case:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_numbers_follow_json_grammar() {
        let rejected = [
            "-inf", "-nan", "-infinity", "-.5", "01", "-01", "1.", "1.e5", "1e", "1e+", ".5", "+1",
            "0x10", "1.5x", "--1", "Infinity", "NaN", "nullx",
        ];
        for number in rejected {
            for input in [
                format!(r#"{{"x":{number},"method":"m"}}"#),
                format!(r#"{{"method":"m","x":[{number}]}}"#),
                format!("[{number}]"),
            ] {
                let result = scan(input.as_bytes(), &LIMITS);
                assert!(
                    matches!(result, Err(GatewayError::ParseError { .. })),
                    "{input:?} gave {result:?}"
                );
            }
        }

        for number in ["0", "-0", "7", "-12", "0.5", "-0.25", "1e5", "1E+5", "2.5e-3", "10"] {
            let input = format!(r#"{{"x":{number},"method":"m","y":[{number},{number}]}}"#);
            let obj = single(&input);
            assert_eq!(text(obj.method), r#""m""#);
        }
    }

    #[test]
    fn test_non_envelopes_are_invalid_requests() {
        for case in ["[]", "  [ ]  ", "5", r#""text""#, "null"] {
            let result = scan(case.as_bytes(), &LIMITS);
            assert!(
                matches!(result, Err(GatewayError::InvalidRequest { .. })),
                "{case:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_batch_items_keep_position() {
        let scanned = scan(
            br#"[{"method":"a","id":1}, 7, {"method":"b","id":1}]"#,
            &LIMITS,
        )
        .unwrap();
        let Scanned::Batch(items) = scanned else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], ScannedItem::Object(o) if o.method == Some(br#""a""#.as_slice())));
        assert_eq!(items[1], ScannedItem::NotAnObject);
        assert!(matches!(items[2], ScannedItem::Object(o) if o.method == Some(br#""b""#.as_slice())));
    }

    #[test]
    fn test_batch_ceiling() {
        let body = format!("[{}]", vec![r#"{"method":"m"}"#; 17].join(","));
        let result = scan(body.as_bytes(), &LIMITS);
        assert!(matches!(result, Err(GatewayError::InvalidRequest { .. })));
    }

    #[test]
    fn test_empty_object_scans_with_no_members() {
        assert_eq!(single("{}"), ScannedObject::default());
    }

    #[test]
    fn test_nesting_stack_tracks_kinds_across_words() {
        let mut stack = NestingStack::new();
        for level in 0..200 {
            stack.push(level % 3 == 0);
        }
        for level in (0..200).rev() {
            assert_eq!(stack.pop(), Some(level % 3 == 0));
        }
        assert!(stack.is_empty());
        assert_eq!(stack.pop(), None);
    }
}
