//! Remote path helpers shared by the uploaders and the test harness.

/// Join two remote path fragments with exactly one `/`.
///
/// A trailing `/` on `lhs` and a leading `/` on `rhs` are dropped before
/// joining; an empty operand yields the other one unchanged.
pub fn concat_path(lhs: &str, rhs: &str) -> String {
    if rhs.is_empty() {
        return lhs.to_string();
    }
    if lhs.is_empty() {
        return rhs.to_string();
    }
    let lhs = lhs.strip_suffix('/').unwrap_or(lhs);
    let rhs = rhs.strip_prefix('/').unwrap_or(rhs);
    format!("{lhs}/{rhs}")
}

/// Folder names making up `path`, with empty and `.` segments removed.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_path() {
        assert_eq!(concat_path("a/", "/b"), "a/b");
        assert_eq!(concat_path("a", "b"), "a/b");
        assert_eq!(concat_path("base/", "/sub/"), "base/sub/");
        assert_eq!(concat_path("", "x/y"), "x/y");
        assert_eq!(concat_path("x/y", ""), "x/y");
        assert_eq!(concat_path("", ""), "");
        assert_eq!(concat_path("/", "T/sub"), "/T/sub");
        assert_eq!(concat_path("./", "T"), "./T");
        assert_eq!(concat_path("/", ""), "/");
        // Only one slash is stripped from each side.
        assert_eq!(concat_path("a//", "//b"), "a///b");
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("./T/sub/"), vec!["T", "sub"]);
        assert_eq!(segments("/"), Vec::<&str>::new());
        assert_eq!(segments(""), Vec::<&str>::new());
        assert_eq!(segments("a//b/./c"), vec!["a", "b", "c"]);
        assert_eq!(segments("alt folder/x"), vec!["alt folder", "x"]);
    }
}
