//! 挂载路径与对象键之间的换算
//!
//! 挂载路径总是以 `/` 开头（根为 `/`），对象键不带前导分隔符；
//! 目录标记对象的键以 `/` 结尾。

pub const SEPARATOR: char = '/';
pub const ROOT: &str = "/";

/// 父目录路径；根的父目录是它自己
pub fn parent_of(path: &str) -> &str {
    match path.trim_end_matches(SEPARATOR).rfind(SEPARATOR) {
        Some(0) | None => ROOT,
        Some(idx) => &path[..idx],
    }
}

/// 路径最后一个分量
pub fn name_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn join(dir: &str, name: &str) -> String {
    let mut path = child_prefix(dir);
    path.push_str(name);
    path
}

/// 子路径必须带有的前缀，包含分隔符边界（`/a` -> `/a/`）
pub fn child_prefix(dir: &str) -> String {
    if dir == ROOT {
        ROOT.to_string()
    } else {
        format!("{}{}", dir, SEPARATOR)
    }
}

/// `path` 是否位于 `dir` 之下（不含 `dir` 本身）
pub fn is_descendant(path: &str, dir: &str) -> bool {
    path != dir && path.starts_with(&child_prefix(dir))
}

pub fn file_key(path: &str) -> String {
    path.trim_start_matches(SEPARATOR).to_string()
}

pub fn dir_key(path: &str) -> String {
    format!("{}{}", path.trim_start_matches(SEPARATOR), SEPARATOR)
}

pub fn is_dir_key(key: &str) -> bool {
    key.ends_with(SEPARATOR)
}

/// 对象键 -> 挂载路径（目录标记去掉结尾分隔符）
pub fn path_from_key(key: &str) -> String {
    format!("{}{}", SEPARATOR, key.trim_end_matches(SEPARATOR))
}

/// 把 `path` 中的 `from` 前缀替换为 `to`，用于目录重命名
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    format!("{}{}", to, &path[from.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_of("/a/b/c.txt"), "/a/b");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/"), "/");
        assert_eq!(name_of("/a/b/c.txt"), "c.txt");
        assert_eq!(name_of("/a"), "a");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_descendant_respects_separator_boundary() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert!(!is_descendant("/", "/"));
    }

    #[test]
    fn test_keys() {
        assert_eq!(file_key("/a/b.txt"), "a/b.txt");
        assert_eq!(dir_key("/a/b"), "a/b/");
        assert!(is_dir_key("a/b/"));
        assert_eq!(path_from_key("a/b/"), "/a/b");
        assert_eq!(path_from_key("a/b.txt"), "/a/b.txt");
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/x/y", "/a", "/b"), "/b/x/y");
    }
}
