//! Volume-aware path splitting for backends that report Windows-style paths.
//!
//! `C:\Users\me` splits into `("C:", "Users\me")`; a bare volume maps to `"."`
//! inside that volume. Non-Windows backends never split.

/// Split `path` into `(volume, path relative to the volume root)`.
///
/// When `windows_paths` is false the volume is always empty and the path is
/// returned unchanged.
pub fn split_volume(path: &str, windows_paths: bool) -> (String, String) {
    if !windows_paths {
        return (String::new(), path.to_string());
    }
    let volume = volume_name(path);
    if volume.is_empty() {
        return (String::new(), path.to_string());
    }
    let rest = &path[volume.len()..];
    let rest = rest.strip_prefix(is_separator).unwrap_or(rest);
    let rest = if rest.is_empty() { "." } else { rest };
    (volume.to_string(), rest.to_string())
}

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

/// Leading volume of a Windows path: a drive (`C:`) or a UNC share
/// (`\\host\share`). Empty when there is none.
fn volume_name(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return &path[..2];
    }
    if bytes.len() >= 5
        && is_separator(bytes[0] as char)
        && is_separator(bytes[1] as char)
        && !is_separator(bytes[2] as char)
        && bytes[2] != b'.'
    {
        // \\host\share
        let Some(host_len) = path[2..].find(is_separator) else {
            return "";
        };
        let share_start = 2 + host_len + 1;
        if share_start >= path.len() || is_separator(bytes[share_start] as char) {
            return "";
        }
        let share_len = path[share_start..]
            .find(is_separator)
            .unwrap_or(path.len() - share_start);
        return &path[..share_start + share_len];
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(p: &str) -> (String, String) {
        split_volume(p, true)
    }

    #[test]
    fn posix_paths_pass_through() {
        assert_eq!(
            split_volume("C:\\not\\split", false),
            ("".to_string(), "C:\\not\\split".to_string())
        );
        assert_eq!(
            split_volume("/home/me", false),
            ("".to_string(), "/home/me".to_string())
        );
    }

    #[test]
    fn drive_letter() {
        assert_eq!(split("C:\\a\\f.txt"), ("C:".into(), "a\\f.txt".into()));
        assert_eq!(split("d:/b/g.txt"), ("d:".into(), "b/g.txt".into()));
    }

    #[test]
    fn bare_volume_is_root() {
        assert_eq!(split("C:"), ("C:".into(), ".".into()));
        assert_eq!(split("C:\\"), ("C:".into(), ".".into()));
    }

    #[test]
    fn drive_relative_keeps_first_char() {
        assert_eq!(split("C:foo"), ("C:".into(), "foo".into()));
    }

    #[test]
    fn unc_share() {
        assert_eq!(
            split("\\\\server\\share\\dir\\x"),
            ("\\\\server\\share".into(), "dir\\x".into())
        );
        assert_eq!(split("\\\\server\\share"), ("\\\\server\\share".into(), ".".into()));
    }

    #[test]
    fn no_volume_on_windows_backend() {
        assert_eq!(split("docs\\a.txt"), ("".into(), "docs\\a.txt".into()));
        assert_eq!(split("\\\\server"), ("".into(), "\\\\server".into()));
    }
}
