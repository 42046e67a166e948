//! Lookup and resumable search over a [`DirectoryTree`]

use super::matcher::{matches, names_equal};
use super::{DirectoryTree, FindType, ItemHandle, ItemKind};
use crate::{PackageError, Result};

impl DirectoryTree {
    /// Direct child of `folder` named `name` whose kind is accepted by `find`.
    pub fn get_item(
        &self,
        folder: ItemHandle,
        name: &str,
        find: FindType,
    ) -> Result<Option<ItemHandle>> {
        let index = self.folder_index(folder)?;
        Ok(self.child(index, name, find).map(|c| self.handle(c)))
    }

    fn child(&self, folder: usize, name: &str, find: FindType) -> Option<usize> {
        self.child_indices(folder).iter().copied().find(|&c| {
            let node = &self.nodes[c];
            find.accepts(node.kind()) && names_equal(&node.name, name, find)
        })
    }

    /// Resolve a `/` or `\` separated path relative to `folder`.
    ///
    /// `.` stays put and `..` moves to the parent (failing above the root).
    /// Intermediate tokens must name folders. The last token may resolve to
    /// a folder only when `find` contains `FOLDERS`, and to a file only when
    /// it contains `FILES`. A path with no name tokens resolves to the folder
    /// it ends in.
    pub fn get_relative_item(
        &self,
        folder: ItemHandle,
        path: &str,
        find: FindType,
    ) -> Result<Option<ItemHandle>> {
        let mut current = self.folder_index(folder)?;
        let tokens: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|t| !t.is_empty())
            .collect();

        for (position, token) in tokens.iter().enumerate() {
            match *token {
                "." => {}
                ".." => match self.nodes[current].parent {
                    Some(parent) => current = parent,
                    None => return Ok(None),
                },
                name if position + 1 == tokens.len() => {
                    return Ok(self.child(current, name, find).map(|c| self.handle(c)));
                }
                name => {
                    let folders = FindType(find.bits() & FindType::CASE_SENSITIVE.bits())
                        | FindType::FOLDERS;
                    match self.child(current, name, folders) {
                        Some(next) => current = next,
                        None => return Ok(None),
                    }
                }
            }
        }

        if find.contains(FindType::FOLDERS) {
            Ok(Some(self.handle(current)))
        } else {
            Ok(None)
        }
    }

    /// First item below `folder`, in pre-order, matching `pattern`.
    pub fn find_first(
        &self,
        folder: ItemHandle,
        pattern: &str,
        find: FindType,
    ) -> Result<Option<ItemHandle>> {
        let index = self.folder_index(folder)?;
        Ok(self.scan(index, 0, pattern, find).map(|i| self.handle(i)))
    }

    /// Next match after `previous` in the search started at `folder`.
    ///
    /// Continues inside `previous` when it is a folder and recursion is
    /// enabled, then with its following siblings, then ascends through its
    /// ancestors' remaining siblings until `folder` is exhausted.
    pub fn find_next(
        &self,
        folder: ItemHandle,
        previous: ItemHandle,
        pattern: &str,
        find: FindType,
    ) -> Result<Option<ItemHandle>> {
        let root = self.folder_index(folder)?;
        let mut current = self.index(previous)?;
        if current == root {
            return self.find_first(folder, pattern, find);
        }
        if !self.is_below(current, root) {
            return Err(PackageError::NotFound(format!(
                "{} is not inside {}",
                self.nodes[current].name, self.nodes[root].name
            )));
        }

        let recurse = !find.contains(FindType::NO_RECURSE);
        if recurse
            && self.nodes[current].kind() == ItemKind::Folder
            && let Some(found) = self.scan(current, 0, pattern, find)
        {
            return Ok(Some(self.handle(found)));
        }

        while let Some(parent) = self.nodes[current].parent {
            let position = self
                .child_indices(parent)
                .iter()
                .position(|&c| c == current)
                .map_or(0, |p| p + 1);
            if let Some(found) = self.scan(parent, position, pattern, find) {
                return Ok(Some(self.handle(found)));
            }
            if parent == root {
                break;
            }
            current = parent;
        }
        Ok(None)
    }

    fn is_below(&self, mut index: usize, ancestor: usize) -> bool {
        while let Some(parent) = self.nodes[index].parent {
            if parent == ancestor {
                return true;
            }
            index = parent;
        }
        false
    }

    /// Pre-order scan of `folder`'s children from position `start`.
    fn scan(&self, folder: usize, start: usize, pattern: &str, find: FindType) -> Option<usize> {
        let recurse = !find.contains(FindType::NO_RECURSE);
        let children = self.child_indices(folder);
        for &child in children.get(start..).unwrap_or_default() {
            let node = &self.nodes[child];
            if find.accepts(node.kind()) && matches(&node.name, pattern, find) {
                return Some(child);
            }
            if recurse
                && node.kind() == ItemKind::Folder
                && let Some(found) = self.scan(child, 0, pattern, find)
            {
                return Some(found);
            }
        }
        None
    }
}
