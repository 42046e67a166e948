//! Uniform directory tree exposed by every package format
//!
//! The tree is an arena of nodes owned by the package that built it. Client
//! code addresses nodes through [`ItemHandle`]s, which carry the
//! [`PackageId`] of the opened package instance they came from; every tree
//! operation rejects handles from another instance.
//!
//! Node 0 is always the root folder. Parent links are arena indices, so the
//! only ownership is folder to children.

mod matcher;
mod search;

pub use matcher::matches;

use crate::package::PackageId;
use crate::{PackageError, Result};
use std::cmp::Ordering;
use std::fmt;

/// Item id meaning "no id".
pub const ID_INVALID: u32 = 0xFFFF_FFFF;

/// Handle to one node of a [`DirectoryTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemHandle {
    owner: PackageId,
    index: usize,
}

impl ItemHandle {
    /// Package instance the item belongs to.
    pub const fn owner(self) -> PackageId {
        self.owner
    }
}

/// Kind of a directory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// Folder with children
    Folder,
    /// File with data
    File,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Folder => f.write_str("folder"),
            Self::File => f.write_str("file"),
        }
    }
}

/// Search and lookup flags.
///
/// Combine with `|`. Without `MODE_STRING` or `MODE_SUBSTRING` patterns
/// are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FindType(u32);

impl FindType {
    /// Match files
    pub const FILES: Self = Self(0x01);
    /// Match folders
    pub const FOLDERS: Self = Self(0x02);
    /// Match files and folders
    pub const ALL: Self = Self(0x03);
    /// Do not descend into subfolders
    pub const NO_RECURSE: Self = Self(0x04);
    /// Compare names case-sensitively
    pub const CASE_SENSITIVE: Self = Self(0x08);
    /// Whole-name comparison
    pub const MODE_STRING: Self = Self(0x10);
    /// Substring search
    pub const MODE_SUBSTRING: Self = Self(0x20);

    /// Raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn accepts(self, kind: ItemKind) -> bool {
        match kind {
            ItemKind::File => self.contains(Self::FILES),
            ItemKind::Folder => self.contains(Self::FOLDERS),
        }
    }
}

impl Default for FindType {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::ops::BitOr for FindType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Field used to order folder children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortField {
    /// Case-insensitive name
    #[default]
    Name,
    /// File size (child count for folders), then name
    Size,
}

/// Direction of a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

#[derive(Debug, Clone)]
enum NodeData {
    Folder { children: Vec<usize> },
    File { size: u64 },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    id: u32,
    raw_data: Option<Vec<u8>>,
    parent: Option<usize>,
    data: NodeData,
}

impl Node {
    const fn kind(&self) -> ItemKind {
        match self.data {
            NodeData::Folder { .. } => ItemKind::Folder,
            NodeData::File { .. } => ItemKind::File,
        }
    }

    fn sort_size(&self) -> u64 {
        match &self.data {
            NodeData::Folder { children } => children.len() as u64,
            NodeData::File { size } => *size,
        }
    }
}

/// Arena-backed directory tree of one opened package.
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    owner: PackageId,
    nodes: Vec<Node>,
}

impl DirectoryTree {
    /// Create a tree holding only a root folder.
    pub(crate) fn new(owner: PackageId, root_name: impl Into<String>, root_id: u32) -> Self {
        Self {
            owner,
            nodes: vec![Node {
                name: root_name.into(),
                id: root_id,
                raw_data: None,
                parent: None,
                data: NodeData::Folder {
                    children: Vec::new(),
                },
            }],
        }
    }

    fn push(&mut self, parent: ItemHandle, node: Node) -> Result<ItemHandle> {
        let parent_index = self.folder_index(parent)?;
        let index = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent_index),
            ..node
        });
        if let NodeData::Folder { children } = &mut self.nodes[parent_index].data {
            children.push(index);
        }
        Ok(self.handle(index))
    }

    /// Append a folder to `parent`.
    pub(crate) fn add_folder(
        &mut self,
        parent: ItemHandle,
        name: impl Into<String>,
        id: u32,
    ) -> Result<ItemHandle> {
        self.push(
            parent,
            Node {
                name: name.into(),
                id,
                raw_data: None,
                parent: None,
                data: NodeData::Folder {
                    children: Vec::new(),
                },
            },
        )
    }

    /// Append a file of `size` bytes to `parent`.
    pub(crate) fn add_file(
        &mut self,
        parent: ItemHandle,
        name: impl Into<String>,
        id: u32,
        size: u64,
    ) -> Result<ItemHandle> {
        self.push(
            parent,
            Node {
                name: name.into(),
                id,
                raw_data: None,
                parent: None,
                data: NodeData::File { size },
            },
        )
    }

    /// Attach format-specific bytes to an item.
    pub fn set_raw_data(&mut self, item: ItemHandle, data: Vec<u8>) -> Result<()> {
        let index = self.index(item)?;
        self.nodes[index].raw_data = Some(data);
        Ok(())
    }

    const fn handle(&self, index: usize) -> ItemHandle {
        ItemHandle {
            owner: self.owner,
            index,
        }
    }

    fn index(&self, item: ItemHandle) -> Result<usize> {
        if item.owner != self.owner {
            return Err(PackageError::Ownership(format!(
                "item of package {} used with package {}",
                item.owner, self.owner
            )));
        }
        if item.index >= self.nodes.len() {
            return Err(PackageError::Ownership(format!(
                "item {} is not part of package {}",
                item.index, self.owner
            )));
        }
        Ok(item.index)
    }

    fn folder_index(&self, item: ItemHandle) -> Result<usize> {
        let index = self.index(item)?;
        match self.nodes[index].data {
            NodeData::Folder { .. } => Ok(index),
            NodeData::File { .. } => Err(PackageError::NotAFolder(self.nodes[index].name.clone())),
        }
    }

    fn child_indices(&self, index: usize) -> &[usize] {
        match &self.nodes[index].data {
            NodeData::Folder { children } => children,
            NodeData::File { .. } => &[],
        }
    }

    /// Package instance that owns this tree.
    pub const fn owner(&self) -> PackageId {
        self.owner
    }

    /// Root folder.
    pub const fn root(&self) -> ItemHandle {
        self.handle(0)
    }

    /// Number of items including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has only its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Item name.
    pub fn name(&self, item: ItemHandle) -> Result<&str> {
        Ok(&self.nodes[self.index(item)?].name)
    }

    /// Format-specific item id ([`ID_INVALID`] when absent).
    pub fn id(&self, item: ItemHandle) -> Result<u32> {
        Ok(self.nodes[self.index(item)?].id)
    }

    /// File or folder.
    pub fn kind(&self, item: ItemHandle) -> Result<ItemKind> {
        Ok(self.nodes[self.index(item)?].kind())
    }

    /// Format-specific bytes attached to the item.
    pub fn raw_data(&self, item: ItemHandle) -> Result<Option<&[u8]>> {
        Ok(self.nodes[self.index(item)?].raw_data.as_deref())
    }

    /// Declared size of a file, or the child count of a folder.
    pub fn size(&self, item: ItemHandle) -> Result<u64> {
        Ok(self.nodes[self.index(item)?].sort_size())
    }

    /// Parent folder; `None` for the root.
    pub fn parent(&self, item: ItemHandle) -> Result<Option<ItemHandle>> {
        let index = self.index(item)?;
        Ok(self.nodes[index].parent.map(|p| self.handle(p)))
    }

    /// Children of a folder in their current order.
    pub fn children(&self, folder: ItemHandle) -> Result<Vec<ItemHandle>> {
        let index = self.folder_index(folder)?;
        Ok(self
            .child_indices(index)
            .iter()
            .map(|&c| self.handle(c))
            .collect())
    }

    /// Path of `item` relative to the root, `/` separated.
    ///
    /// The root itself has an empty path.
    pub fn path(&self, item: ItemHandle) -> Result<String> {
        let mut index = self.index(item)?;
        let mut parts = Vec::new();
        while let Some(parent) = self.nodes[index].parent {
            parts.push(self.nodes[index].name.as_str());
            index = parent;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Number of folders below `folder`.
    pub fn folder_count(&self, folder: ItemHandle, recurse: bool) -> Result<usize> {
        self.count(folder, recurse, ItemKind::Folder)
    }

    /// Number of files below `folder`.
    pub fn file_count(&self, folder: ItemHandle, recurse: bool) -> Result<usize> {
        self.count(folder, recurse, ItemKind::File)
    }

    fn count(&self, folder: ItemHandle, recurse: bool, kind: ItemKind) -> Result<usize> {
        let index = self.folder_index(folder)?;
        let mut total = 0;
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            for &child in self.child_indices(current) {
                if self.nodes[child].kind() == kind {
                    total += 1;
                }
                if recurse && self.nodes[child].kind() == ItemKind::Folder {
                    stack.push(child);
                }
            }
        }
        Ok(total)
    }

    /// Sum of the declared sizes of every file below `folder`.
    pub fn total_size(&self, folder: ItemHandle) -> Result<u64> {
        let mut total = 0;
        for file in self.iter_files(folder)? {
            total += self.size(file)?;
        }
        Ok(total)
    }

    /// Depth-first iterator over every file below `folder`, in child order.
    pub fn iter_files(&self, folder: ItemHandle) -> Result<Files<'_>> {
        let index = self.folder_index(folder)?;
        let mut stack = self.child_indices(index).to_vec();
        stack.reverse();
        Ok(Files { tree: self, stack })
    }

    /// Sort the children of `folder`.
    ///
    /// Folders always come before files. Within a kind, `Size` ties fall
    /// back to the case-insensitive name; `Descending` reverses that order
    /// but never moves files ahead of folders.
    pub fn sort(
        &mut self,
        folder: ItemHandle,
        field: SortField,
        order: SortOrder,
        recurse: bool,
    ) -> Result<()> {
        let index = self.folder_index(folder)?;
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            let mut children = match &mut self.nodes[current].data {
                NodeData::Folder { children } => std::mem::take(children),
                NodeData::File { .. } => continue,
            };
            children.sort_by(|&a, &b| self.compare(a, b, field, order));
            if recurse {
                stack.extend(
                    children
                        .iter()
                        .copied()
                        .filter(|&c| self.nodes[c].kind() == ItemKind::Folder),
                );
            }
            if let NodeData::Folder { children: slot } = &mut self.nodes[current].data {
                *slot = children;
            }
        }
        Ok(())
    }

    fn compare(&self, a: usize, b: usize, field: SortField, order: SortOrder) -> Ordering {
        let (a, b) = (&self.nodes[a], &self.nodes[b]);
        match (a.kind(), b.kind()) {
            (ItemKind::Folder, ItemKind::File) => return Ordering::Less,
            (ItemKind::File, ItemKind::Folder) => return Ordering::Greater,
            _ => {}
        }

        let by_name = || a.name.to_lowercase().cmp(&b.name.to_lowercase());
        let result = match field {
            SortField::Name => by_name(),
            SortField::Size => a.sort_size().cmp(&b.sort_size()).then_with(by_name),
        };
        match order {
            SortOrder::Ascending => result,
            SortOrder::Descending => result.reverse(),
        }
    }
}

/// Iterator returned by [`DirectoryTree::iter_files`].
#[derive(Debug)]
pub struct Files<'a> {
    tree: &'a DirectoryTree,
    stack: Vec<usize>,
}

impl Iterator for Files<'_> {
    type Item = ItemHandle;

    fn next(&mut self) -> Option<ItemHandle> {
        while let Some(index) = self.stack.pop() {
            match &self.tree.nodes[index].data {
                NodeData::File { .. } => return Some(self.tree.handle(index)),
                NodeData::Folder { children } => self.stack.extend(children.iter().rev()),
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// root/{maps/{c1a0.bsp, c1a1.bsp}, sound/{ambience/{wind.wav}}, readme.txt}
    pub(crate) fn sample_tree() -> DirectoryTree {
        let mut tree = DirectoryTree::new(PackageId::next(), "root", 0);
        let root = tree.root();
        let maps = tree.add_folder(root, "maps", 1).expect("maps");
        tree.add_file(maps, "c1a0.bsp", 2, 4000).expect("file");
        tree.add_file(maps, "c1a1.bsp", 3, 1000).expect("file");
        let sound = tree.add_folder(root, "sound", 4).expect("sound");
        let ambience = tree.add_folder(sound, "ambience", 5).expect("ambience");
        tree.add_file(ambience, "wind.wav", 6, 300).expect("file");
        tree.add_file(root, "readme.txt", 7, 12).expect("file");
        tree
    }

    fn names(tree: &DirectoryTree, folder: ItemHandle) -> Vec<String> {
        tree.children(folder)
            .expect("children")
            .into_iter()
            .map(|c| tree.name(c).expect("name").to_string())
            .collect()
    }

    #[test]
    fn test_parent_child_consistency() {
        let tree = sample_tree();
        let root = tree.root();
        assert_eq!(tree.parent(root).expect("parent"), None);

        for index in 1..tree.len() {
            let item = tree.handle(index);
            let parent = tree.parent(item).expect("parent").expect("non-root");
            let siblings = tree.children(parent).expect("children");
            assert_eq!(siblings.iter().filter(|&&c| c == item).count(), 1);
        }
    }

    #[test]
    fn test_raw_data_attached() {
        let mut tree = sample_tree();
        let item = tree
            .get_relative_item(tree.root(), "readme.txt", FindType::FILES)
            .expect("lookup")
            .expect("readme");
        assert_eq!(tree.raw_data(item).expect("raw"), None);

        tree.set_raw_data(item, vec![1, 2, 3]).expect("set");
        assert_eq!(tree.raw_data(item).expect("raw"), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_path_round_trip() {
        let tree = sample_tree();
        let root = tree.root();
        assert_eq!(tree.path(root).expect("path"), "");

        for index in 1..tree.len() {
            let item = tree.handle(index);
            let path = tree.path(item).expect("path");
            let found = tree
                .get_relative_item(root, &path, FindType::ALL)
                .expect("lookup");
            assert_eq!(found, Some(item), "path {path}");
        }
    }

    #[test]
    fn test_sort_folders_first() {
        let mut tree = DirectoryTree::new(PackageId::next(), "root", 0);
        let root = tree.root();
        tree.add_folder(root, "B", 1).expect("folder");
        tree.add_file(root, "A", 2, 0).expect("file");
        tree.add_folder(root, "A", 3).expect("folder");

        tree.sort(root, SortField::Name, SortOrder::Ascending, false)
            .expect("sort");
        let kinds: Vec<_> = tree
            .children(root)
            .expect("children")
            .into_iter()
            .map(|c| (tree.kind(c).expect("kind"), tree.name(c).expect("name").to_string()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ItemKind::Folder, "A".to_string()),
                (ItemKind::Folder, "B".to_string()),
                (ItemKind::File, "A".to_string()),
            ]
        );

        tree.sort(root, SortField::Name, SortOrder::Descending, false)
            .expect("sort");
        assert_eq!(names(&tree, root), vec!["B", "A", "A"]);
        let last = *tree.children(root).expect("children").last().expect("last");
        assert_eq!(tree.kind(last).expect("kind"), ItemKind::File);
    }

    #[test]
    fn test_sort_by_size_recursive() {
        let mut tree = sample_tree();
        let root = tree.root();
        let maps = tree
            .get_item(root, "maps", FindType::FOLDERS)
            .expect("lookup")
            .expect("maps");

        tree.sort(root, SortField::Size, SortOrder::Ascending, true)
            .expect("sort");
        assert_eq!(names(&tree, maps), vec!["c1a1.bsp", "c1a0.bsp"]);
        // sound has one child, maps has two.
        assert_eq!(names(&tree, root), vec!["sound", "maps", "readme.txt"]);
    }

    #[test]
    fn test_counts_and_sizes() {
        let tree = sample_tree();
        let root = tree.root();
        assert_eq!(tree.file_count(root, true).expect("count"), 4);
        assert_eq!(tree.file_count(root, false).expect("count"), 1);
        assert_eq!(tree.folder_count(root, true).expect("count"), 3);
        assert_eq!(tree.total_size(root).expect("size"), 5312);

        let files: Vec<String> = tree
            .iter_files(root)
            .expect("iter")
            .map(|f| tree.path(f).expect("path"))
            .collect();
        assert_eq!(
            files,
            vec![
                "maps/c1a0.bsp",
                "maps/c1a1.bsp",
                "sound/ambience/wind.wav",
                "readme.txt"
            ]
        );
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let a = sample_tree();
        let b = sample_tree();
        let err = b.name(a.root()).expect_err("foreign handle");
        assert_eq!(err.kind(), crate::ErrorKind::Ownership);
    }

    #[test]
    fn test_folder_operation_on_file() {
        let tree = sample_tree();
        let readme = tree
            .get_item(tree.root(), "readme.txt", FindType::FILES)
            .expect("lookup")
            .expect("file");
        assert!(matches!(
            tree.children(readme),
            Err(PackageError::NotAFolder(_))
        ));
    }
}
