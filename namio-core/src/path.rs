use crate::error::{NamioError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A filesystem path as used by every namio interface.
///
/// A path is an immutable sequence of non-empty components. The empty
/// sequence is the root directory, printed as `/`; any other path prints as
/// `/` followed by its components joined with `/`. The forward slash is the
/// delimiter and the colon is reserved for application use, so neither may
/// appear inside a component.
///
/// Two paths are equal when their component sequences are equal. The total
/// order is the lexicographic order of the canonical string forms; callers
/// that must hold locks on several paths at once acquire them in increasing
/// order to avoid deadlocking each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DfsPath {
    components: Vec<String>,
}

impl DfsPath {
    /// The root directory.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parses a path from its string form.
    ///
    /// The string must begin with a forward slash and may not contain a
    /// colon. Empty components between slashes are dropped, so `/a//b/`
    /// parses the same as `/a/b`.
    pub fn parse(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(NamioError::InvalidArgument(format!(
                "path must start with '/': {}",
                path
            )));
        }
        if path.contains(':') {
            return Err(NamioError::InvalidArgument(format!(
                "path may not contain ':': {}",
                path
            )));
        }
        let components = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
            .collect();
        Ok(Self { components })
    }

    /// Returns a new path with `component` appended.
    pub fn child(&self, component: &str) -> Result<Self> {
        if component.is_empty() || component.contains('/') || component.contains(':') {
            return Err(NamioError::InvalidArgument(format!(
                "illegal path component: {:?}",
                component
            )));
        }
        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// The last component, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.components.last().map(|c| c.as_str())
    }

    /// True when `other` is a prefix of this path.
    ///
    /// Every path is a subpath of itself, and every path is a subpath of
    /// the root.
    pub fn is_subpath(&self, other: &Self) -> bool {
        if other.components.len() > self.components.len() {
            return false;
        }
        self.components[..other.components.len()] == other.components[..]
    }

    /// The component of this path immediately below `parent`, or `None` if
    /// `parent` is not a strict prefix of this path.
    pub fn direct_child(&self, parent: &Self) -> Option<&str> {
        if self == parent || !self.is_subpath(parent) {
            return None;
        }
        Some(self.components[parent.components.len()].as_str())
    }

    /// Iterates over the components in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.as_str())
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Joins the components beneath a directory on the host filesystem.
    pub fn to_file(&self, root: &std::path::Path) -> PathBuf {
        let mut file = root.to_path_buf();
        for component in &self.components {
            file.push(component);
        }
        file
    }
}

impl fmt::Display for DfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for DfsPath {
    type Err = NamioError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Ord for DfsPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for DfsPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
