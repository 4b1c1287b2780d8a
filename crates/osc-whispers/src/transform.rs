// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Path prefix extraction and rewriting.

/// Path rewrite applied by a rule before forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathTransform {
    /// Forward the path unchanged.
    #[default]
    Keep,

    /// Remove the leading segment.
    TruncatePrefix,
}

impl PathTransform {
    /// Transform for a rule's truncation flag.
    pub fn from_truncate(truncate: bool) -> Self {
        if truncate {
            Self::TruncatePrefix
        } else {
            Self::Keep
        }
    }

    /// Rewrite a path.
    ///
    /// Returns `None` when truncation leaves nothing to address (`/foo`);
    /// such messages are not forwarded.
    pub fn apply<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            Self::Keep => Some(path),
            Self::TruncatePrefix => {
                let rest = truncate_prefix(path);
                if rest.is_empty() {
                    None
                } else {
                    Some(rest)
                }
            }
        }
    }

    pub fn is_truncating(&self) -> bool {
        matches!(self, Self::TruncatePrefix)
    }
}

/// First segment of a path: the text between the leading `/` and the next
/// `/`, or the remainder.
///
/// Paths that do not start with `/` have no prefix.
pub fn path_prefix(path: &str) -> &str {
    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').next().unwrap_or_default(),
        None => "",
    }
}

/// Path with its leading `/` and first segment removed, keeping the
/// remainder's own leading `/`.
///
/// `/foo/bar/baz` gives `/bar/baz`, `/foo/` gives `/`, `/foo` gives `""`.
pub fn truncate_prefix(path: &str) -> &str {
    let Some(rest) = path.strip_prefix('/') else {
        return "";
    };
    match rest.find('/') {
        Some(pos) => &rest[pos..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_prefix() {
        assert_eq!(path_prefix("/foo/bar"), "foo");
        assert_eq!(path_prefix("/foo"), "foo");
        assert_eq!(path_prefix("/foo/"), "foo");
        assert_eq!(path_prefix("/"), "");
        assert_eq!(path_prefix(""), "");
        assert_eq!(path_prefix("//foo"), "");
        assert_eq!(path_prefix("foo/bar"), "");
    }

    #[test]
    fn test_path_prefix_case_sensitive() {
        assert_eq!(path_prefix("/Foo/bar"), "Foo");
        assert_ne!(path_prefix("/Foo/bar"), "foo");
    }

    #[test]
    fn test_truncate_prefix() {
        assert_eq!(truncate_prefix("/foo/bar/baz"), "/bar/baz");
        assert_eq!(truncate_prefix("/foo/bar"), "/bar");
        assert_eq!(truncate_prefix("/foo/"), "/");
        assert_eq!(truncate_prefix("/foo"), "");
        assert_eq!(truncate_prefix("/foo//bar"), "//bar");
        assert_eq!(truncate_prefix(""), "");
    }

    #[test]
    fn test_transform_keep() {
        let transform = PathTransform::from_truncate(false);
        assert_eq!(transform, PathTransform::Keep);
        assert_eq!(transform.apply("/foo/bar/baz"), Some("/foo/bar/baz"));
        assert_eq!(transform.apply("/foo"), Some("/foo"));
    }

    #[test]
    fn test_transform_truncate() {
        let transform = PathTransform::from_truncate(true);
        assert!(transform.is_truncating());
        assert_eq!(transform.apply("/foo/bar/baz"), Some("/bar/baz"));
        assert_eq!(transform.apply("/foo/"), Some("/"));
        assert_eq!(transform.apply("/foo"), None);
    }
}
