//! POSIX shell double-quoting.

use std::path::Path;

/// Characters that keep a special meaning inside double quotes.
const ESCAPED: [char; 4] = ['"', '\\', '$', '`'];

/// Wraps `value` in double quotes so a POSIX shell reads it back literally.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ESCAPED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Reverses [`quote`]. Returns `None` if `quoted` isn't a single double-quoted word.
pub fn unquote(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next) if ESCAPED.contains(&next) => out.push(next),
                // A backslash before anything else stays literal, as in the shell
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                // Trailing backslash escaped the closing quote
                None => return None,
            },
            '"' => return None,
            _ => out.push(ch),
        }
    }
    Some(out)
}

/// Quotes a path argument. Relative paths starting with `-` get a `./` prefix so commands
/// can't mistake them for options.
pub(super) fn quote_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    if text.starts_with('-') {
        quote(&format!("./{}", text))
    } else {
        quote(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("/tmp/file"), "\"/tmp/file\"");
        assert_eq!(quote(""), "\"\"");
    }

    #[test]
    fn test_quote_escapes_specials() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("$HOME"), "\"\\$HOME\"");
        assert_eq!(quote("`id`"), "\"\\`id\\`\"");
        assert_eq!(quote("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(quote("with space"), "\"with space\"");
    }

    #[test]
    fn test_round_trip() {
        let samples = [
            "",
            "plain",
            "with space",
            "quote\"inside",
            "$dollar and ${brace}",
            "`tick`",
            "back\\slash\\",
            "\\$ mixed \\\" stuff",
            "newline\nand\ttab",
            "ünïcødé ✓",
            "'single'",
        ];
        for sample in samples {
            assert_eq!(unquote(&quote(sample)).as_deref(), Some(sample), "sample {:?}", sample);
        }
    }

    #[test]
    fn test_unquote_rejects_malformed() {
        assert_eq!(unquote("plain"), None);
        assert_eq!(unquote("\"open"), None);
        assert_eq!(unquote("\"a\"b\""), None);
        assert_eq!(unquote("\"ends\\\""), None);
        assert_eq!(unquote("\""), None);
    }

    #[test]
    fn test_unquote_keeps_literal_backslash() {
        assert_eq!(unquote("\"a\\nb\"").as_deref(), Some("a\\nb"));
    }

    #[test]
    fn test_quote_path_guards_options() {
        assert_eq!(quote_path(Path::new("-rf")), "\"./-rf\"");
        assert_eq!(quote_path(Path::new("/abs/-x")), "\"/abs/-x\"");
    }

    #[test]
    fn test_quote_is_read_back_by_shell() {
        let value = "a \"b\" $c `d` \\e";
        let output = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("printf %s {}", quote(value)))
            .output()
            .unwrap();
        assert_eq!(String::from_utf8(output.stdout).unwrap(), value);
    }
}
