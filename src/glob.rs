//! Wrapper around globset's Glob type coupling the pattern with its compiled
//! matcher. Matching follows minimatch conventions: `*` never crosses `/`.

use globset::{Glob as InnerGlob, GlobBuilder, GlobMatcher};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct Glob {
    inner: InnerGlob,
    matcher: GlobMatcher,
}

impl Glob {
    pub fn new(glob: &str) -> Result<Self, SyncError> {
        let inner = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|e| SyncError::InvalidGlob {
                pattern: glob.to_string(),
                message: e.to_string(),
            })?;
        let matcher = inner.compile_matcher();

        Ok(Glob { inner, matcher })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        self.inner.glob()
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for Glob {}

impl Serialize for Glob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.inner.glob())
    }
}

impl<'de> Deserialize<'de> for Glob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let glob = String::deserialize(deserializer)?;

        Glob::new(&glob).map_err(D::Error::custom)
    }
}

/// An ordered list of compiled patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobList {
    globs: Vec<Glob>,
}

impl GlobList {
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, SyncError> {
        let globs = patterns
            .iter()
            .map(|p| Glob::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GlobList { globs })
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    pub fn matches_any(&self, path: &str) -> bool {
        self.globs.iter().any(|g| g.is_match(path))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.globs.iter().map(Glob::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_does_not_cross_separator() {
        let glob = Glob::new("f/*").unwrap();
        assert!(glob.is_match("f/a.variable.yaml"));
        assert!(!glob.is_match("f/sub/a.variable.yaml"));
    }

    #[test]
    fn test_double_star_matches_nested() {
        let glob = Glob::new("f/**").unwrap();
        assert!(glob.is_match("f/a.ts"));
        assert!(glob.is_match("f/x/y/z.flow/flow.yaml"));
        assert!(!glob.is_match("u/admin/a.ts"));
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = Glob::new("f/[").unwrap_err();
        assert!(matches!(err, SyncError::InvalidGlob { .. }));
    }

    #[test]
    fn test_list_deserializes_from_yaml() {
        let globs: Vec<Glob> = serde_yaml::from_str("- f/**\n- g/*").unwrap();
        assert_eq!(globs.len(), 2);
        assert_eq!(globs[1].as_str(), "g/*");
    }
}
