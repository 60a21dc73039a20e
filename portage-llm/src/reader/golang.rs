//! Go-structured response reader
//!
//! Decodes the `{filename: content}` shape with a mandatory `main.go`,
//! strips any `func main` declaration from the root file (the test harness
//! supplies its own `main`), and installs the go build command sequence.

use super::{parse_file_map, ResponseParseError, ResponseReader};
use portage_core::DeploymentPackage;
use tracing::debug;

const LAMBDA_IMPORT: &str = "\"github.com/aws/aws-lambda-go/lambda\"";

/// Reader for responses that must contain a Go program
#[derive(Debug, Default)]
pub struct GoReader;

impl ResponseReader for GoReader {
    fn decode(
        &self,
        raw: &str,
        original: &DeploymentPackage,
    ) -> Result<DeploymentPackage, ResponseParseError> {
        if raw.is_empty() {
            return Err(ResponseParseError::Empty);
        }

        let mut files = parse_file_map(raw)?;
        debug!("found {} files", files.len());

        let root_file = files
            .remove("main.go")
            .ok_or(ResponseParseError::MissingMain("main.go"))?;
        if root_file.is_empty() {
            return Err(ResponseParseError::EmptyRootFile);
        }

        let mut package = DeploymentPackage::new("go");
        package.root_file = strip_main_function(&root_file);
        package.build_cmd = vec!["go mod tidy".to_string(), "go build -o fn .".to_string()];
        if !files.contains_key("go.mod") {
            package
                .build_cmd
                .insert(0, "go mod init example.com".to_string());
        }
        package.build_files = files;
        package.test_files = original.test_files.clone();
        package.env = original.env.clone();
        Ok(package)
    }
}

/// Removes every top-level `func main() { … }` declaration.
///
/// A surface regex cannot do this: main bodies contain nested braces, and
/// string literals or comments may themselves contain braces. The scan
/// below tracks brace depth while skipping comments, interpreted strings,
/// raw strings, and rune literals, which is exactly the set of lexical
/// contexts a brace may legally hide in.
///
/// If a removed body referenced `lambda` and at most one `lambda.` usage
/// remains, the aws-lambda-go import is dropped with it.
pub fn strip_main_function(content: &str) -> String {
    let mut content = content.to_string();
    let mut removed = String::new();

    while let Some((start, end)) = find_main_span(&content) {
        removed.push_str(&content[start..end]);
        let mut rest = String::with_capacity(content.len() - (end - start));
        rest.push_str(&content[..start]);
        rest.push_str(&content[end..]);
        content = rest;
    }

    if removed.contains("lambda") && content.matches("lambda.").count() <= 1 {
        content = content.replacen(LAMBDA_IMPORT, "", 1);
    }
    content
}

/// Lexical cursor that yields code bytes, skipping comments and literals
struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    /// Consumes one code byte, or skips a whole comment/literal and
    /// returns `None`
    fn next_code_byte(&mut self) -> Option<u8> {
        let byte = self.bytes[self.pos];
        match byte {
            b'/' if self.peek(1) == Some(b'/') => {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                None
            }
            b'/' if self.peek(1) == Some(b'*') => {
                self.pos += 2;
                while self.pos + 1 < self.bytes.len()
                    && !(self.bytes[self.pos] == b'*' && self.bytes[self.pos + 1] == b'/')
                {
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(self.bytes.len());
                None
            }
            b'"' => {
                self.pos += 1;
                while self.pos < self.bytes.len() {
                    match self.bytes[self.pos] {
                        b'\\' => self.pos += 2,
                        b'"' | b'\n' => {
                            self.pos += 1;
                            break;
                        }
                        _ => self.pos += 1,
                    }
                }
                None
            }
            b'`' => {
                self.pos += 1;
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'`' {
                    self.pos += 1;
                }
                self.pos = (self.pos + 1).min(self.bytes.len());
                None
            }
            b'\'' => {
                self.pos += 1;
                while self.pos < self.bytes.len() {
                    match self.bytes[self.pos] {
                        b'\\' => self.pos += 2,
                        b'\'' => {
                            self.pos += 1;
                            break;
                        }
                        _ => self.pos += 1,
                    }
                }
                None
            }
            _ => {
                self.pos += 1;
                Some(byte)
            }
        }
    }
}

fn is_ident_byte(byte: u8) -> bool {
    byte == b'_' || byte.is_ascii_alphanumeric()
}

fn is_keyword_at(bytes: &[u8], at: usize, keyword: &[u8]) -> bool {
    bytes[at..].starts_with(keyword)
        && (at == 0 || !is_ident_byte(bytes[at - 1]))
        && bytes
            .get(at + keyword.len())
            .map_or(true, |next| !is_ident_byte(*next))
}

/// Byte span `[start, end)` of the first top-level `func main` declaration
fn find_main_span(content: &str) -> Option<(usize, usize)> {
    let bytes = content.as_bytes();
    let mut scanner = Scanner::new(bytes, 0);
    let mut depth: i64 = 0;

    while scanner.pos < bytes.len() {
        let at = scanner.pos;
        let Some(byte) = scanner.next_code_byte() else {
            continue;
        };
        match byte {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b'f' if depth == 0 && is_keyword_at(bytes, at, b"func") => {
                if let Some(end) = main_decl_end(bytes, at) {
                    return Some((at, end));
                }
            }
            _ => {}
        }
    }
    None
}

/// End of a `func main() { … }` declaration starting at `start`, or `None`
/// when the declaration at `start` is not a parameterless `main`
fn main_decl_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + 4;
    let skip_ws = |bytes: &[u8], mut pos: usize| {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    };

    pos = skip_ws(bytes, pos);
    let ident_start = pos;
    while pos < bytes.len() && is_ident_byte(bytes[pos]) {
        pos += 1;
    }
    if &bytes[ident_start..pos] != b"main" {
        return None;
    }

    pos = skip_ws(bytes, pos);
    if bytes.get(pos) != Some(&b'(') {
        return None;
    }
    pos = skip_ws(bytes, pos + 1);
    if bytes.get(pos) != Some(&b')') {
        return None;
    }
    pos = skip_ws(bytes, pos + 1);
    if bytes.get(pos) != Some(&b'{') {
        return None;
    }

    let mut scanner = Scanner::new(bytes, pos);
    let mut depth: i64 = 0;
    while scanner.pos < bytes.len() {
        if let Some(byte) = scanner.next_code_byte() {
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(scanner.pos);
                    }
                }
                _ => {}
            }
        }
    }
    None
}
