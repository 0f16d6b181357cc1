//! Content sniffing for corpus eligibility.
//!
//! [`classify`] looks at the first [`SNIFF_BYTES`] of a file: magic numbers
//! and NUL bytes mark binaries, decodable text is split into code and prose
//! by name. It never fails; unreadable and empty files are
//! [`FileCategory::Other`].

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::models::FileCategory;

pub const SNIFF_BYTES: usize = 8192;

/// Share of control characters above which decodable text is still binary.
const MAX_CONTROL_RATIO: f64 = 0.10;

const MAGIC_SIGNATURES: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xff\xd8\xff",
    b"GIF87a",
    b"GIF89a",
    b"BM",
    b"\x00\x00\x01\x00", // ico
    b"%PDF-",
    b"PK\x03\x04",
    b"PK\x05\x06",
    b"\x1f\x8b",
    b"BZh",
    b"\xfd7zXZ\x00",
    b"7z\xbc\xaf\x27\x1c",
    b"\x28\xb5\x2f\xfd", // zstd
    b"\x7fELF",
    b"\xfe\xed\xfa\xce",
    b"\xfe\xed\xfa\xcf",
    b"\xcf\xfa\xed\xfe",
    b"\xce\xfa\xed\xfe",
    b"\xca\xfe\xba\xbe", // java class / fat mach-o
    b"MZ",
    b"\x00asm",
    b"SQLite format 3\x00",
    b"wOFF",
    b"wOF2",
    b"\x00\x01\x00\x00\x00", // ttf
    b"OTTO",
    b"OggS",
    b"ID3",
    b"fLaC",
    b"Rar!\x1a\x07",
];

const SHORT_ASCII_SIGNATURES: &[&[u8]] = &[b"BM", b"MZ", b"ID3", b"BZh", b"OTTO", b"wOFF", b"wOF2"];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "pyi", "js", "mjs", "cjs", "jsx", "ts", "tsx", "go", "java", "kt", "kts", "scala",
    "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "cs", "fs", "swift", "m", "mm", "rb", "php", "pl",
    "pm", "lua", "r", "jl", "dart", "ex", "exs", "erl", "hrl", "clj", "cljs", "hs", "ml", "mli",
    "elm", "zig", "nim", "v", "sv", "vhd", "sql", "sh", "bash", "zsh", "fish", "ps1", "bat",
    "cmd", "json", "jsonc", "yaml", "yml", "toml", "ini", "cfg", "conf", "xml", "xsd", "html",
    "htm", "css", "scss", "sass", "less", "vue", "svelte", "svg", "proto", "graphql", "gql",
    "tf", "hcl", "gradle", "cmake", "mk", "nix", "dockerfile", "ipynb",
];

const CODE_FILE_NAMES: &[&str] = &[
    "Dockerfile",
    "Makefile",
    "makefile",
    "GNUmakefile",
    "Justfile",
    "Rakefile",
    "Gemfile",
    "Vagrantfile",
    "Jenkinsfile",
    "BUILD",
    "WORKSPACE",
    "CMakeLists.txt",
];

/// Classify the file at `path` by its content.
pub fn classify(path: &Path) -> FileCategory {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return FileCategory::Other,
    };
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    if file
        .by_ref()
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut head)
        .is_err()
    {
        return FileCategory::Other;
    }
    classify_bytes(&head, path)
}

/// Classify a file from its leading bytes; `path` is only used to tell
/// code from prose once the content is known to be text.
pub fn classify_bytes(head: &[u8], path: &Path) -> FileCategory {
    if head.is_empty() {
        return FileCategory::Other;
    }
    if MAGIC_SIGNATURES.iter().any(|sig| head.starts_with(sig)) && !is_plain_text_lookalike(head)
    {
        return FileCategory::Binary;
    }
    if is_mp4_family(head) || head.contains(&0) {
        return FileCategory::Binary;
    }

    let Some(text) = decode_window(head) else {
        return FileCategory::Binary;
    };

    let total = text.chars().count().max(1);
    let controls = text
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c' | '\x1b'))
        .count();
    if controls as f64 / total as f64 > MAX_CONTROL_RATIO {
        return FileCategory::Binary;
    }

    if looks_like_code(path, text) {
        FileCategory::Code
    } else {
        FileCategory::Text
    }
}

/// Decode the sniff window as UTF-8. A multi-byte character cut off by
/// the end of the window is still text.
fn decode_window(head: &[u8]) -> Option<&str> {
    match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

/// Short ASCII signatures ("BM", "MZ", "ID3", …) also start ordinary
/// words. Only trust them when the window does not decode as text.
fn is_plain_text_lookalike(head: &[u8]) -> bool {
    SHORT_ASCII_SIGNATURES.iter().any(|sig| head.starts_with(sig))
        && !head.contains(&0)
        && decode_window(head).is_some()
}

fn is_mp4_family(head: &[u8]) -> bool {
    head.len() >= 12 && &head[4..8] == b"ftyp"
}

fn looks_like_code(path: &Path, text: &str) -> bool {
    if text.starts_with("#!") {
        return true;
    }
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if CODE_FILE_NAMES.contains(&file_name) || file_name.starts_with("Dockerfile.") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_source_file_is_code() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "a.py", b"def main():\n    print('hi')\n");
        assert_eq!(classify(&path), FileCategory::Code);
    }

    #[test]
    fn test_markdown_is_text() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "README.md", "# Título\n\nSome prose.\n".as_bytes());
        assert_eq!(classify(&path), FileCategory::Text);
    }

    #[test]
    fn test_png_is_binary_even_with_text_extension() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(b"IHDR some chunk data");
        let path = write(&tmp, "not-really.txt", &bytes);
        assert_eq!(classify(&path), FileCategory::Binary);
    }

    #[test]
    fn test_nul_bytes_are_binary() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "data.bin", b"abc\0def\0ghi");
        assert_eq!(classify(&path), FileCategory::Binary);
    }

    #[test]
    fn test_empty_and_missing_are_other() {
        let tmp = TempDir::new().unwrap();
        let empty = write(&tmp, "empty.rs", b"");
        assert_eq!(classify(&empty), FileCategory::Other);
        assert_eq!(classify(&tmp.path().join("missing")), FileCategory::Other);
    }

    #[test]
    fn test_directory_is_other() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(classify(tmp.path()), FileCategory::Other);
    }

    #[test]
    fn test_shebang_and_special_names() {
        let tmp = TempDir::new().unwrap();
        let script = write(&tmp, "run", b"#!/bin/sh\necho hi\n");
        assert_eq!(classify(&script), FileCategory::Code);
        let docker = write(&tmp, "Dockerfile", b"FROM alpine\n");
        assert_eq!(classify(&docker), FileCategory::Code);
    }

    #[test]
    fn test_words_matching_short_signatures_stay_text() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "notes.txt", b"MZ is the prefix we discussed.\n");
        assert_eq!(classify(&path), FileCategory::Text);
        let path = write(&tmp, "README.md", "BM25 scoring – ranks by term rarity.\n".as_bytes());
        assert_eq!(classify(&path), FileCategory::Text);
        let path = write(&tmp, "menu.txt", "MZ café\n".as_bytes());
        assert_eq!(classify(&path), FileCategory::Text);
    }

    #[test]
    fn test_short_signature_with_binary_payload_is_binary() {
        let head = b"BM\x36\x00\x0c\x00\x00\x00\x00\x00\x36\x00\x00\x00\x28";
        assert_eq!(
            classify_bytes(head, Path::new("image.bmp")),
            FileCategory::Binary
        );
    }

    #[test]
    fn test_truncated_multibyte_at_window_edge() {
        let mut head = vec![b'a'; SNIFF_BYTES - 1];
        head.push(0xc3); // first byte of a two-byte sequence
        assert_eq!(
            classify_bytes(&head, Path::new("x.txt")),
            FileCategory::Text
        );
    }

    #[test]
    fn test_invalid_utf8_is_binary() {
        let head = [0x66, 0x6f, 0xff, 0xfe, 0x6f, 0x20, 0x62];
        assert_eq!(
            classify_bytes(&head, Path::new("x.txt")),
            FileCategory::Binary
        );
    }
}
