//! Archive node capability set and the traversal algorithms shared by every
//! backing store.
//!
//! A node is one directory-equivalent level of an archive: named child
//! nodes plus named resources. Child names and resource names live in
//! separate namespaces, so `images` can be both a subdirectory and an
//! `images.png` resource at the same level.
//!
//! Backing stores implement the four primitive accessors of
//! [`ArchiveNode`]; locator descent ([`ArchiveNode::resolve`]) and listing
//! ([`ArchiveNode::find`]) are written once against those primitives.

use std::sync::Arc;

use crate::error::ArchiveResult;
use crate::locator::ResourceLocator;
use crate::registry::{TypeDescriptor, TypeKey};

/// What a listing operation enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    /// Resources of one registered payload type
    Resources(TypeKey),
    /// Resources of every registered payload type
    AllResources,
    /// Child archives (subdirectories), never resources
    Directories,
}

impl Query {
    /// Query for resources of payload type `T`
    pub fn resources_of<T: std::any::Any>() -> Self {
        Self::Resources(TypeKey::of::<T>())
    }

    fn matches(&self, descriptor: &TypeDescriptor) -> bool {
        match self {
            Self::Resources(key) => descriptor.key() == *key,
            Self::AllResources => true,
            Self::Directories => false,
        }
    }
}

/// Capability set of one archive level
pub trait ArchiveNode: Sized {
    /// Child node called `name`, if present
    fn child(&self, name: &str) -> ArchiveResult<Option<Self>>;

    /// Every child node with its name
    fn children(&self) -> ArchiveResult<Vec<(String, Self)>>;

    /// Stored bytes of resource `name` of the given type, if present
    ///
    /// The bytes are the codec's encoding, already decompressed.
    fn resource_bytes(
        &self,
        name: &str,
        descriptor: &TypeDescriptor,
    ) -> ArchiveResult<Option<Vec<u8>>>;

    /// Every direct resource with its name and type
    fn resources(&self) -> ArchiveResult<Vec<(String, Arc<TypeDescriptor>)>>;

    /// Follow `locator` down the tree and fetch the resource at its end
    ///
    /// An empty locator names the node itself, which is never a resource.
    fn resolve(
        &self,
        locator: &[String],
        descriptor: &TypeDescriptor,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        match locator {
            [] => Ok(None),
            [name] => self.resource_bytes(name, descriptor),
            [head, rest @ ..] => match self.child(head)? {
                Some(child) => child.resolve(rest, descriptor),
                None => Ok(None),
            },
        }
    }

    /// List what `query` selects below `locator`
    ///
    /// Results are relative to `locator`; the caller re-attaches it. With
    /// `recursive` every descendant level contributes, each result prefixed
    /// with the child names leading to it.
    fn find(
        &self,
        locator: &[String],
        query: &Query,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        if let [head, rest @ ..] = locator {
            return match self.child(head)? {
                Some(child) => child.find(rest, query, recursive),
                None => Ok(Vec::new()),
            };
        }

        let mut found = Vec::new();

        if matches!(query, Query::Directories) {
            if recursive {
                for (name, child) in self.children()? {
                    let prefix = ResourceLocator::single(&name);
                    found.extend(
                        child
                            .find(&[], query, true)?
                            .into_iter()
                            .map(|l| l.prepend(&prefix)),
                    );
                    found.push(prefix);
                }
            } else {
                found.extend(
                    self.children()?
                        .into_iter()
                        .map(|(name, _)| ResourceLocator::single(&name)),
                );
            }
            return Ok(found);
        }

        found.extend(
            self.resources()?
                .into_iter()
                .filter(|(_, descriptor)| query.matches(descriptor))
                .map(|(name, _)| ResourceLocator::single(&name)),
        );

        if recursive {
            for (name, child) in self.children()? {
                let prefix = ResourceLocator::single(&name);
                found.extend(
                    child
                        .find(&[], query, true)?
                        .into_iter()
                        .map(|l| l.prepend(&prefix)),
                );
            }
        }

        Ok(found)
    }
}
