use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::GenomaError;
use crate::remote::RemoteTree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEntry<'a> {
    Directory(&'a str),
    Leaf,
    Skip,
}

/// Directory lines start with `d`; the name is the last token. Blank lines,
/// the `total N` header and the `.`/`..` entries are skipped.
pub fn classify_line(line: &str) -> ListingEntry<'_> {
    let mut tokens = line.split_whitespace();
    let Some(mode) = tokens.next() else {
        return ListingEntry::Skip;
    };
    if mode == "total" {
        return ListingEntry::Skip;
    }
    let name = line.split_whitespace().last().unwrap_or(mode);
    if mode.starts_with('d') {
        if name == "." || name == ".." {
            return ListingEntry::Skip;
        }
        return ListingEntry::Directory(name);
    }
    ListingEntry::Leaf
}

#[derive(Debug, Clone)]
pub struct WalkPolicy {
    pub ignore: HashSet<String>,
    pub max_depth: usize,
}

impl WalkPolicy {
    pub fn new<I, S>(ignore: I, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignore: ignore.into_iter().map(Into::into).collect(),
            max_depth,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub directories_listed: usize,
    pub leaves: usize,
    pub ignored_directories: usize,
    pub depth_limited: usize,
    pub revisits: usize,
}

struct Frame {
    path: String,
    entries: std::vec::IntoIter<String>,
    depth: usize,
}

pub struct DirectoryWalker {
    policy: WalkPolicy,
}

impl DirectoryWalker {
    pub fn new(policy: WalkPolicy) -> Self {
        Self { policy }
    }

    /// Walks every root in order. A listing failure or an error from
    /// `on_leaf` aborts the walk; leaves already handled stay handled.
    pub fn walk<R, F>(
        &self,
        remote: &mut R,
        roots: &[String],
        cancel: &CancellationToken,
        on_leaf: F,
    ) -> Result<WalkStats, GenomaError>
    where
        R: RemoteTree + ?Sized,
        F: FnMut(&str, &str) -> Result<(), GenomaError>,
    {
        let mut stats = WalkStats::default();
        self.walk_into(remote, roots, cancel, &mut stats, on_leaf)?;
        Ok(stats)
    }

    pub fn walk_into<R, F>(
        &self,
        remote: &mut R,
        roots: &[String],
        cancel: &CancellationToken,
        stats: &mut WalkStats,
        mut on_leaf: F,
    ) -> Result<(), GenomaError>
    where
        R: RemoteTree + ?Sized,
        F: FnMut(&str, &str) -> Result<(), GenomaError>,
    {
        let mut visited = HashSet::new();
        for root in roots {
            self.walk_root(remote, root, cancel, &mut visited, stats, &mut on_leaf)?;
        }
        Ok(())
    }

    fn walk_root<R, F>(
        &self,
        remote: &mut R,
        root: &str,
        cancel: &CancellationToken,
        visited: &mut HashSet<String>,
        stats: &mut WalkStats,
        on_leaf: &mut F,
    ) -> Result<(), GenomaError>
    where
        R: RemoteTree + ?Sized,
        F: FnMut(&str, &str) -> Result<(), GenomaError>,
    {
        let root = with_trailing_separator(root);
        if !visited.insert(root.clone()) {
            stats.revisits += 1;
            return Ok(());
        }
        cancel.check()?;
        let entries = remote.list(&root)?;
        stats.directories_listed += 1;
        let mut stack = vec![Frame {
            path: root,
            entries: entries.into_iter(),
            depth: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(line) = frame.entries.next() else {
                stack.pop();
                continue;
            };
            match classify_line(&line) {
                ListingEntry::Skip => {}
                ListingEntry::Leaf => {
                    stats.leaves += 1;
                    on_leaf(&line, &frame.path)?;
                }
                ListingEntry::Directory(name) => {
                    if self.policy.ignore.contains(name) {
                        stats.ignored_directories += 1;
                        continue;
                    }
                    let depth = frame.depth + 1;
                    let target = format!("{}{}/", frame.path, name);
                    if depth > self.policy.max_depth {
                        warn!(path = %target, "depth limit reached; not descending");
                        stats.depth_limited += 1;
                        continue;
                    }
                    if !visited.insert(target.clone()) {
                        warn!(path = %target, "directory already visited; skipping");
                        stats.revisits += 1;
                        continue;
                    }
                    cancel.check()?;
                    debug!(path = %target, "listing");
                    let entries = remote.list(&target)?;
                    stats.directories_listed += 1;
                    stack.push(Frame {
                        path: target,
                        entries: entries.into_iter(),
                        depth,
                    });
                }
            }
        }
        Ok(())
    }
}

fn with_trailing_separator(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_directory_and_file() {
        assert_eq!(
            classify_line("drwxr-sr-x  2 ftp   ftp    4096 Jan 13  2015 oryza_sativa"),
            ListingEntry::Directory("oryza_sativa")
        );
        assert_eq!(
            classify_line("-rw-r--r--  1 ftp   ftp  1234 Jan 13  2015 README"),
            ListingEntry::Leaf
        );
        assert_eq!(classify_line("total 48"), ListingEntry::Skip);
        assert_eq!(classify_line("   "), ListingEntry::Skip);
        assert_eq!(
            classify_line("drwxr-xr-x  2 ftp ftp 4096 Jan 13  2015 .."),
            ListingEntry::Skip
        );
    }

    #[test]
    fn separator_appended_once() {
        assert_eq!(with_trailing_separator("/pub"), "/pub/");
        assert_eq!(with_trailing_separator("/pub/"), "/pub/");
    }
}
