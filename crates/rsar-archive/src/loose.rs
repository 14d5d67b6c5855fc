//! Loose archives backed by a real directory
//!
//! Subdirectories are child nodes; regular files whose extension belongs to
//! a registered type are resources, named by their file stem. A regular
//! file without an extension is an indirection file: its first line names
//! another path (relative to the file's directory unless absolute) that
//! stands in for the entry. Chains of indirection files are followed up to
//! the configured hop limit.
//!
//! Nodes are built fresh on every descent and read the filesystem live;
//! nothing is cached.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::locator::{ResourceLocator, is_valid_segment};
use crate::node::ArchiveNode;
use crate::registry::{SharedRegistry, TypeDescriptor};

/// Longest first line read from an indirection file
const MAX_INDIRECTION_LINE: u64 = 4096;

/// One directory level of a loose archive
#[derive(Clone)]
pub struct LooseNode {
    directory: PathBuf,
    ignore: Vec<ResourceLocator>,
    registry: SharedRegistry,
    max_hops: usize,
}

impl LooseNode {
    /// Root node for `directory`, masking the `ignore` subtrees
    pub(crate) fn open(
        directory: &Path,
        ignore: Vec<ResourceLocator>,
        registry: SharedRegistry,
        max_hops: usize,
    ) -> ArchiveResult<Self> {
        let directory = std::path::absolute(directory)?;
        if !directory.is_dir() {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", directory.display()),
            )));
        }

        Ok(Self {
            directory,
            ignore,
            registry,
            max_hops,
        })
    }

    /// Directory this node reads from
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Ignore locators in effect at this level
    pub fn ignored(&self) -> &[ResourceLocator] {
        &self.ignore
    }

    /// Whether `name` is fully excluded at this level
    fn is_masked(&self, name: &str) -> bool {
        self.ignore
            .iter()
            .any(|l| l.len() == 1 && l.first() == Some(name))
    }

    /// Ignore locators for child `name`, with the leading segment stripped
    fn ignore_subset(&self, name: &str) -> Vec<ResourceLocator> {
        self.ignore
            .iter()
            .filter(|l| l.len() > 1 && l.first() == Some(name))
            .map(ResourceLocator::rest)
            .collect()
    }

    fn child_node(&self, directory: PathBuf, name: &str) -> Self {
        Self {
            directory,
            ignore: self.ignore_subset(name),
            registry: Arc::clone(&self.registry),
            max_hops: self.max_hops,
        }
    }

    /// Follow indirection files from `path` until a directory is reached
    ///
    /// Returns `None` when the chain ends in something other than a
    /// directory or an indirection file. Only errors on `path` itself are
    /// reported; a target that cannot be probed or read counts as absent.
    fn follow(&self, path: PathBuf) -> ArchiveResult<Option<PathBuf>> {
        let mut current = path;
        let mut visited = HashSet::new();

        for hop in 0..=self.max_hops {
            let metadata = match fs::metadata(&current) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) if hop > 0 => {
                    warn!("Ignoring indirection target {}: {e}", current.display());
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if metadata.is_dir() {
                return Ok(Some(current));
            }

            if !metadata.is_file() || current.extension().is_some() {
                return Ok(None);
            }

            let key = fs::canonicalize(&current).unwrap_or_else(|_| current.clone());
            if !visited.insert(key) {
                return Err(ArchiveError::IndirectionCycle(current));
            }

            let target = match read_indirection_target(&current) {
                Ok(Some(target)) => target,
                Ok(None) => return Ok(None),
                Err(e) if hop > 0 => {
                    warn!("Ignoring unreadable indirection file {}: {e}", current.display());
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            let target = PathBuf::from(target);
            let next = if target.is_absolute() {
                target
            } else {
                current
                    .parent()
                    .map_or_else(|| target.clone(), |parent| parent.join(&target))
            };

            debug!(
                "Indirection {} -> {}",
                current.display(),
                next.display()
            );
            current = next;
        }

        Err(ArchiveError::IndirectionTooDeep(current))
    }
}

/// First line of an indirection file, trimmed
fn read_indirection_target(path: &Path) -> ArchiveResult<Option<String>> {
    let file = File::open(path)?;
    let mut line = Vec::new();
    BufReader::new(file.take(MAX_INDIRECTION_LINE)).read_until(b'\n', &mut line)?;

    let Ok(line) = String::from_utf8(line) else {
        warn!("Ignoring non-text indirection file {}", path.display());
        return Ok(None);
    };

    let target = line.trim();
    if target.is_empty() {
        return Ok(None);
    }

    Ok(Some(target.to_string()))
}

/// Whether `name` addresses an entry inside this directory
fn is_entry_name(name: &str) -> bool {
    is_valid_segment(name) && !name.contains(std::path::is_separator)
}

fn entry_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str();
    if name.is_none() {
        warn!("Skipping non UTF-8 entry {}", path.display());
    }
    name.map(str::to_string)
}

impl ArchiveNode for LooseNode {
    fn child(&self, name: &str) -> ArchiveResult<Option<Self>> {
        if !is_entry_name(name) || self.is_masked(name) {
            return Ok(None);
        }

        Ok(self
            .follow(self.directory.join(name))?
            .map(|directory| self.child_node(directory, name)))
    }

    fn children(&self) -> ArchiveResult<Vec<(String, Self)>> {
        let mut children = Vec::new();

        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            let Some(name) = entry_name(&path) else {
                continue;
            };

            if self.is_masked(&name) {
                trace!("Masked child {name} in {}", self.directory.display());
                continue;
            }

            if let Some(directory) = self.follow(path)? {
                let child = self.child_node(directory, &name);
                children.push((name, child));
            }
        }

        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }

    fn resource_bytes(
        &self,
        name: &str,
        descriptor: &TypeDescriptor,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        if !is_entry_name(name) || self.is_masked(name) {
            return Ok(None);
        }

        for extension in descriptor.extensions() {
            let path = self.directory.join(format!("{name}.{extension}"));
            if path.is_file() {
                trace!("Reading {}", path.display());
                return Ok(Some(fs::read(&path)?));
            }
        }

        Ok(None)
    }

    fn resources(&self) -> ArchiveResult<Vec<(String, Arc<TypeDescriptor>)>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let registry = self.registry.read();
        let mut resources: Vec<(String, Arc<TypeDescriptor>)> = Vec::new();

        for path in paths {
            let (Some(stem), Some(extension)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            let Some(descriptor) = registry.lookup_by_extension(extension) else {
                continue;
            };

            // `..txt` has the stem `.`, which no locator can address
            if !is_entry_name(stem) {
                continue;
            }

            if self.is_masked(stem) {
                trace!("Masked resource {stem} in {}", self.directory.display());
                continue;
            }

            // Two extensions of one type under the same stem yield one resource
            if resources
                .iter()
                .any(|(n, d)| n == stem && d.key() == descriptor.key())
            {
                continue;
            }

            resources.push((stem.to_string(), descriptor));
        }

        Ok(resources)
    }
}

impl std::fmt::Debug for LooseNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LooseNode")
            .field("directory", &self.directory)
            .field("ignore", &self.ignore)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{ResourceFormat, TypeKey, TypeRegistry};
    use parking_lot::RwLock;

    struct Text;

    fn registry() -> SharedRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                TypeDescriptor::new::<Text, _, _>(
                    "Text",
                    ResourceFormat::Plain,
                    |_: &Text| Ok(Vec::new()),
                    |_: &[u8]| Ok(Text),
                )
                .with_extensions(["txt"]),
            )
            .unwrap();
        Arc::new(RwLock::new(registry))
    }

    fn open(dir: &Path, ignore: &[&str]) -> LooseNode {
        LooseNode::open(
            dir,
            ignore.iter().map(|s| ResourceLocator::parse(s)).collect(),
            registry(),
            8,
        )
        .unwrap()
    }

    fn names<T>(entries: Vec<(String, T)>) -> Vec<String> {
        let mut names: Vec<_> = entries.into_iter().map(|(n, _)| n).collect();
        names.sort();
        names
    }

    #[test]
    fn test_lists_recognized_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.unknown"), b"b").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let node = open(dir.path(), &[]);
        assert_eq!(names(node.resources().unwrap()), ["a"]);
        assert_eq!(names(node.children().unwrap()), ["sub"]);
    }

    #[test]
    fn test_same_name_for_child_and_resource() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), b"file").unwrap();
        fs::create_dir(dir.path().join("x")).unwrap();

        let node = open(dir.path(), &[]);
        assert_eq!(names(node.resources().unwrap()), ["x"]);
        assert_eq!(names(node.children().unwrap()), ["x"]);
    }

    #[test]
    fn test_reads_bytes_by_type_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), b"hello").unwrap();

        let node = open(dir.path(), &[]);
        let registry = node.registry.read();
        let text = registry.lookup(TypeKey::of::<Text>()).unwrap();
        assert_eq!(
            node.resource_bytes("hello", &text).unwrap(),
            Some(b"hello".to_vec())
        );
        assert_eq!(node.resource_bytes("missing", &text).unwrap(), None);
    }

    #[test]
    fn test_masking_is_relative_per_level() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), b"x").unwrap();
        fs::write(dir.path().join("y.txt"), b"y").unwrap();
        fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        fs::write(dir.path().join("sub/x.txt"), b"sx").unwrap();
        fs::write(dir.path().join("sub/z.txt"), b"sz").unwrap();

        let node = open(dir.path(), &["x", "sub/z", "sub/deep"]);
        assert_eq!(names(node.resources().unwrap()), ["y"]);

        let sub = node.child("sub").unwrap().unwrap();
        assert_eq!(sub.ignored().len(), 2);
        assert_eq!(names(sub.resources().unwrap()), ["x"]);
        assert!(sub.children().unwrap().is_empty());
        assert!(sub.child("deep").unwrap().is_none());
    }

    #[test]
    fn test_indirection_file_resolves_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("elsewhere");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner.txt"), b"i").unwrap();
        fs::create_dir(dir.path().join("root")).unwrap();
        fs::write(dir.path().join("root/link"), b"  ../elsewhere  \nignored").unwrap();

        let node = open(&dir.path().join("root"), &[]);
        assert_eq!(names(node.children().unwrap()), ["link"]);

        let link = node.child("link").unwrap().unwrap();
        assert_eq!(names(link.resources().unwrap()), ["inner"]);
    }

    #[test]
    fn test_chained_indirection_with_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        fs::create_dir(&target).unwrap();
        fs::write(dir.path().join("second"), target.display().to_string()).unwrap();
        fs::write(dir.path().join("first"), "second").unwrap();

        let node = open(dir.path(), &[]);
        let child = node.child("first").unwrap().unwrap();
        assert_eq!(child.directory(), target.as_path());
    }

    #[test]
    fn test_dangling_indirection_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README"), "This is not a path").unwrap();

        let node = open(dir.path(), &[]);
        assert!(node.children().unwrap().is_empty());
        assert!(node.child("README").unwrap().is_none());
    }

    #[test]
    fn test_indirection_cycle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ping"), "pong").unwrap();
        fs::write(dir.path().join("pong"), "ping").unwrap();

        let node = open(dir.path(), &[]);
        assert!(matches!(
            node.child("ping"),
            Err(ArchiveError::IndirectionCycle(_))
        ));
    }

    #[test]
    fn test_unprobeable_indirection_target_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("README"), "x".repeat(300)).unwrap();
        fs::write(dir.path().join("LICENSE"), "a.txt/x").unwrap();
        fs::write(dir.path().join("NOTES"), "before\0after").unwrap();

        let node = open(dir.path(), &[]);
        assert!(node.children().unwrap().is_empty());
        assert_eq!(names(node.resources().unwrap()), ["a"]);
        for name in ["README", "LICENSE", "NOTES"] {
            assert!(node.child(name).unwrap().is_none(), "{name}");
        }
    }

    #[test]
    fn test_relative_names_stay_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("secret.txt"), b"outside").unwrap();
        fs::create_dir_all(dir.path().join("archive/sub")).unwrap();
        fs::write(dir.path().join("archive/..txt"), b"dot stem").unwrap();

        let node = open(&dir.path().join("archive"), &[]);
        let registry = node.registry.read();
        let text = registry.lookup(TypeKey::of::<Text>()).unwrap();

        assert!(node.child("..").unwrap().is_none());
        assert!(node.child(".").unwrap().is_none());
        let sub = node.child("sub").unwrap().unwrap();
        assert_eq!(sub.resource_bytes("..", &text).unwrap(), None);
        assert!(sub.child("..").unwrap().is_none());
        assert_eq!(node.resource_bytes(".", &text).unwrap(), None);
        assert!(node.resources().unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = LooseNode::open(&dir.path().join("missing"), Vec::new(), registry(), 8);
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }
}
