//! MicroPython snippets submitted through the raw REPL.
//!
//! Builders return indented text; [`dedent`] turns it into a single raw
//! submission with `\r` line separators.

/// Suffix of the temporary file an upload is written to.
pub const TEMP_SUFFIX: &str = ".inprogress.tmp";

/// Block size used when reading a remote file.
pub const READ_BLOCK: usize = 64;

/// Strips the common indent and joins lines with `\r`.
///
/// The indent is the column of the first word character on the first
/// line that has one. Up to that many leading whitespace characters are
/// removed from every line; trailing whitespace is trimmed.
pub fn dedent(text: &str) -> String {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let lines: Vec<&str> = text.split("\r\n").flat_map(|l| l.split(['\r', '\n'])).collect();
    let indent = lines
        .iter()
        .find_map(|l| l.chars().position(is_word))
        .unwrap_or(0);

    lines
        .iter()
        .map(|line| {
            let skip = line
                .char_indices()
                .take(indent)
                .take_while(|(_, c)| c.is_whitespace())
                .last()
                .map_or(0, |(i, c)| i + c.len_utf8());
            line[skip..].trim_end()
        })
        .collect::<Vec<_>>()
        .join("\r")
}

/// Quotes `s` as a single-quoted Python string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if u32::from(c) < 0x20 || c == '\x7f' => {
                out.push_str(&format!("\\x{:02x}", u32::from(c)));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Temporary upload path for `path`.
pub fn temp_path(path: &str) -> String {
    format!("{path}{TEMP_SUFFIX}")
}

/// Parent folder of `path`, empty for a bare file name.
pub fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Opens the temp file for `path` and binds the chunk writers `wb` / `wh`
/// and the closer `c`.
pub fn open_upload(path: &str) -> String {
    let folder = quote(parent(path));
    let temp = quote(&temp_path(path));
    format!(
        r"
        import os
        import binascii
        h=binascii.unhexlify
        try: os.mkdir({folder})
        except: pass
        f=open({temp},'wb')
        wb=f.write
        wh=lambda d: f.write(h(d))
        c=lambda: f.close()
        "
    )
}

/// Closes the temp file and renames it over `path`.
pub fn finish_upload(path: &str) -> String {
    let target = quote(path);
    let temp = quote(&temp_path(path));
    format!(
        r"
        c()
        try: os.remove({target})
        except: pass
        os.rename({temp},{target})
        "
    )
}

/// Prints the hex encoding of `path`, read in [`READ_BLOCK`] blocks.
pub fn read_file(path: &str) -> String {
    let path = quote(path);
    format!(
        r"
        import binascii
        with open({path},'rb') as f:
            while True:
                b=f.read({READ_BLOCK})
                if not b:
                    break
                print(binascii.hexlify(b).decode(),end='')
        "
    )
}

/// Recursively removes everything under `path` except entries named in `keep`.
///
/// Directories are removed only once empty, so a kept entry protects its
/// ancestors.
pub fn remove_dir(path: &str, keep: &[&str]) -> String {
    let path = quote(path);
    let keep: Vec<String> = keep.iter().map(|k| quote(k)).collect();
    let keep = keep.join(",");
    format!(
        r"
        import os
        def rd(dn, kfn):
            for fi in os.ilistdir(dn):
                fn, ft = fi[0:2]
                if fn in kfn:
                    continue
                fp = dn.rstrip('/') + '/' + fn
                if ft == 0x8000:
                    os.remove(fp)
                else:
                    rd(fp, kfn)
                    try:
                        os.rmdir(fp)
                    except OSError:
                        pass
        rd({path}, [{keep}])
        "
    )
}

/// Prints `True` when the firmware has a `network.WLAN` class.
pub const HAS_NETWORK: &str = r"
    try:
        import network
        print(hasattr(network, 'WLAN'))
    except ImportError:
        print(False)
    ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedent_strips_first_indent() {
        let text = "\n    import os\n    if x:\n        y()\n";
        assert_eq!(dedent(text), "\rimport os\rif x:\r    y()\r");
    }

    #[test]
    fn dedent_handles_mixed_line_endings() {
        assert_eq!(dedent("  a\r\n  b\r  c\n"), "a\rb\rc\r");
    }

    #[test]
    fn dedent_keeps_shallower_text() {
        assert_eq!(dedent("    a\n  b"), "a\rb");
    }

    #[test]
    fn dedent_without_words() {
        assert_eq!(dedent("  \n \t "), "\r");
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("it's\\x"), "'it\\'s\\\\x'");
        assert_eq!(quote("a\rb"), "'a\\x0db'");
    }

    #[test]
    fn parent_folder() {
        assert_eq!(parent("main.py"), "");
        assert_eq!(parent("/lib/x.py"), "/lib");
        assert_eq!(parent("lib/sub/x.py"), "lib/sub");
    }

    #[test]
    fn upload_scripts_reference_temp_file() {
        let open = dedent(&open_upload("lib/app.py"));
        assert!(open.contains("try: os.mkdir('lib')"));
        assert!(open.contains("f=open('lib/app.py.inprogress.tmp','wb')"));

        let finish = dedent(&finish_upload("lib/app.py"));
        assert!(finish.starts_with("\rc()\r"));
        assert!(finish.contains("os.rename('lib/app.py.inprogress.tmp','lib/app.py')"));
    }

    #[test]
    fn remove_dir_lists_keep_names() {
        let script = dedent(&remove_dir("/", &["settings.json", "secrets"]));
        assert!(script.contains("rd('/', ['settings.json','secrets'])"));
        assert!(script.contains("\r    for fi in os.ilistdir(dn):"));
        assert!(dedent(&remove_dir("/data", &[])).contains("rd('/data', [])"));
    }
}
