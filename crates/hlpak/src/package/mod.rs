//! Package state machine, format contract and extraction
//!
//! A [`Package`] wraps one [`PackageFormat`] implementation and drives it
//! through `Closed -> Opened -> Closed`:
//!
//! 1. `open_*` closes any previous state, binds a [`Mapping`] to the source
//!    and opens it with the requested mode.
//! 2. The format parses its header structures from the mapping
//!    ([`PackageFormat::map_data_structures`]). On failure the mapping is
//!    closed again and the package stays closed.
//! 3. The directory tree is built on first use and every item handle is
//!    checked against the [`PackageId`] of this open.
//! 4. `close` force-closes item streams still held by the caller, lets the
//!    format release its structures, closes the mapping and drops the tree.

mod attribute;
mod kind;
mod validation;

pub use attribute::{Attribute, AttributeValue};
pub use kind::PackageType;
pub use validation::Validation;

use crate::directory::{DirectoryTree, ItemHandle, ItemKind};
use crate::mapping::{Mapping, SharedMapping};
use crate::stream::{MappingStream, SeekFrom, Stream, StreamKind, StreamReader};
use crate::{FileMode, PackageConfig, PackageError, Result};
use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static NEXT_PACKAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one opened package instance.
///
/// Every successful open issues a new id, so handles from a previous open
/// of the same [`Package`] are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(u64);

impl PackageId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PACKAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Summary of a defragmentation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefragmentReport {
    /// Data blocks referenced by files
    pub blocks_used: u32,
    /// Data blocks not directly following their predecessor
    pub blocks_fragmented: u32,
    /// Files with at least one fragmented block
    pub files_fragmented: u32,
    /// Data blocks physically moved or swapped
    pub blocks_moved: u32,
    /// Nothing was done (nothing fragmented, or nothing used)
    pub skipped: bool,
}

/// Summary of an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractReport {
    /// Host directories created (or reused)
    pub folders: usize,
    /// Files written
    pub files_extracted: usize,
    /// Files left alone: existing, not extractable, or failed validation
    pub files_skipped: usize,
    /// Bytes written
    pub bytes: u64,
}

/// Contract every concrete archive format implements.
///
/// Item methods receive the package's tree and an item handle that has
/// already been checked to belong to this open.
pub trait PackageFormat: fmt::Debug {
    /// Format implemented.
    fn package_type(&self) -> PackageType;

    /// Parse header structures from an opened mapping.
    ///
    /// The format may keep a clone of `mapping` to create streams.
    fn map_data_structures(&mut self, mapping: &SharedMapping, config: &PackageConfig)
    -> Result<()>;

    /// Release everything acquired by `map_data_structures`.
    fn unmap_data_structures(&mut self);

    /// Build the directory tree.
    fn build_root(&self, owner: PackageId) -> Result<DirectoryTree>;

    /// Names of the package attributes, in index order.
    fn package_attribute_names(&self) -> &'static [&'static str];

    /// Package attribute at `index`; `None` for an unknown index.
    fn package_attribute(&self, index: usize) -> Result<Option<AttributeValue>>;

    /// Names of the item attributes, in index order.
    fn item_attribute_names(&self) -> &'static [&'static str];

    /// Item attribute at `index`; `None` for an unknown or inapplicable index.
    fn item_attribute(
        &self,
        tree: &DirectoryTree,
        item: ItemHandle,
        index: usize,
    ) -> Result<Option<AttributeValue>>;

    /// Declared size of a file.
    fn file_size(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<u64>;

    /// Bytes the file occupies in the archive.
    fn file_size_on_disk(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<u64>;

    /// Whether the file's data can be read back in full.
    fn file_extractable(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<bool>;

    /// Check the file against stored integrity data.
    fn file_validation(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<Validation>;

    /// Closed stream over the file's data.
    fn create_stream(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<Box<dyn Stream>>;

    /// Reorder the archive's data in place.
    fn defragment(&mut self, _force: bool) -> Result<DefragmentReport> {
        Err(PackageError::Unsupported(format!(
            "{} packages cannot be defragmented",
            self.package_type()
        )))
    }
}

type TrackedStream = Rc<RefCell<Box<dyn Stream>>>;

/// Stream over a package item, handed out by [`Package::create_stream`].
///
/// The package keeps a weak reference so closing the package closes the
/// stream too. Later operations on it then fail with a state error.
#[derive(Debug)]
pub struct ItemStream {
    owner: PackageId,
    name: String,
    inner: TrackedStream,
}

impl ItemStream {
    /// Package instance the stream was created by.
    pub const fn owner(&self) -> PackageId {
        self.owner
    }

    /// `std::io::Read` and `Seek` adapter.
    pub fn reader(&mut self) -> StreamReader<'_, Self> {
        StreamReader::new(self)
    }
}

impl Stream for ItemStream {
    fn kind(&self) -> StreamKind {
        self.inner.borrow().kind()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.inner.borrow().is_open()
    }

    fn mode(&self) -> FileMode {
        self.inner.borrow().mode()
    }

    fn open(&mut self, mode: FileMode) -> Result<()> {
        self.inner.borrow_mut().open(mode)
    }

    fn close(&mut self) {
        self.inner.borrow_mut().close();
    }

    fn size(&self) -> u64 {
        self.inner.borrow().size()
    }

    fn pointer(&self) -> u64 {
        self.inner.borrow().pointer()
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.inner.borrow_mut().seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.borrow_mut().read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.inner.borrow_mut().write(data)
    }
}

#[derive(Debug)]
struct Opened {
    id: PackageId,
    mode: FileMode,
    mapping: SharedMapping,
    tree: Option<DirectoryTree>,
    streams: Vec<Weak<RefCell<Box<dyn Stream>>>>,
}

/// One archive opened through a [`PackageFormat`].
#[derive(Debug)]
pub struct Package {
    format: Box<dyn PackageFormat>,
    config: PackageConfig,
    opened: Option<Opened>,
}

impl Package {
    /// Closed package for `format`.
    pub fn new(format: Box<dyn PackageFormat>, config: PackageConfig) -> Self {
        Self {
            format,
            config,
            opened: None,
        }
    }

    /// Closed package for a detected type.
    ///
    /// Only GCF is implemented; every other type is `Unsupported`.
    pub fn for_type(kind: PackageType, config: PackageConfig) -> Result<Self> {
        match kind {
            PackageType::Gcf => Ok(Self::new(Box::new(crate::gcf::GcfFormat::new()), config)),
            other => Err(PackageError::Unsupported(format!(
                "{other} packages are not supported"
            ))),
        }
    }

    /// Detect the type of the file at `path` and open it.
    ///
    /// The signature decides; the extension is only used when no signature
    /// matches.
    pub fn open_file_auto(
        path: impl AsRef<Path>,
        mode: FileMode,
        config: PackageConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut header = Vec::with_capacity(PackageType::SIGNATURE_LENGTH);
        File::open(path)?
            .take(PackageType::SIGNATURE_LENGTH as u64)
            .read_to_end(&mut header)?;

        let kind = PackageType::detect(&header)
            .or_else(|| PackageType::from_extension(path))
            .ok_or_else(|| {
                PackageError::InvalidFormat(format!(
                    "{} is not a recognized package",
                    path.display()
                ))
            })?;
        debug!("detected {} package at {}", kind, path.display());

        let mut package = Self::for_type(kind, config)?;
        package.open_file(path, mode)?;
        Ok(package)
    }

    /// Format of this package.
    pub fn package_type(&self) -> PackageType {
        self.format.package_type()
    }

    /// Active configuration.
    pub const fn config(&self) -> &PackageConfig {
        &self.config
    }

    /// Whether the package is open.
    pub const fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    /// Id of the current open, if any.
    pub fn id(&self) -> Option<PackageId> {
        self.opened.as_ref().map(|o| o.id)
    }

    /// Mode of the current open (`FileMode::NONE` when closed).
    pub fn mode(&self) -> FileMode {
        self.opened.as_ref().map_or(FileMode::NONE, |o| o.mode)
    }

    /// Open the archive file at `path`.
    pub fn open_file(&mut self, path: impl AsRef<Path>, mode: FileMode) -> Result<()> {
        let mapping = Mapping::file(path, self.config.enable_mmap);
        self.open_mapping(mapping, mode)
    }

    /// Open an archive held in memory.
    pub fn open_memory(&mut self, data: Vec<u8>, mode: FileMode) -> Result<()> {
        self.open_mapping(Mapping::memory(data), mode)
    }

    /// Open an archive read through `stream`; the package owns the stream.
    pub fn open_stream(&mut self, stream: Box<dyn Stream>, mode: FileMode) -> Result<()> {
        self.open_mapping(Mapping::stream(stream), mode)
    }

    /// Open an archive through an already constructed, closed mapping.
    pub fn open_mapping(&mut self, mut mapping: Mapping, mode: FileMode) -> Result<()> {
        self.close();

        mapping.open(mode, false)?;
        let mapping = mapping.into_shared();

        if let Err(e) = self.format.map_data_structures(&mapping, &self.config) {
            debug!("{} header rejected: {}", self.package_type(), e);
            self.format.unmap_data_structures();
            mapping.borrow_mut().close();
            return Err(e);
        }

        let id = PackageId::next();
        info!(
            "opened {} package {} ({}, {} bytes)",
            self.package_type(),
            id,
            mode,
            mapping.borrow().size()
        );
        self.opened = Some(Opened {
            id,
            mode,
            mapping,
            tree: None,
            streams: Vec::new(),
        });
        Ok(())
    }

    /// Close the package. Closing a closed package does nothing.
    pub fn close(&mut self) {
        let Some(opened) = self.opened.take() else {
            return;
        };

        let mut leaked = 0;
        for stream in opened.streams.iter().filter_map(Weak::upgrade) {
            if let Ok(mut stream) = stream.try_borrow_mut()
                && stream.is_open()
            {
                stream.close();
                leaked += 1;
            }
        }
        if leaked > 0 {
            debug!("closed {} item streams still open", leaked);
        }

        self.format.unmap_data_structures();
        opened.mapping.borrow_mut().close();
        info!("closed {} package {}", self.package_type(), opened.id);
    }

    fn opened(&self) -> Result<&Opened> {
        self.opened.as_ref().ok_or(PackageError::NotOpen("package"))
    }

    fn opened_with_tree(&mut self) -> Result<&mut Opened> {
        let opened = self.opened.as_mut().ok_or(PackageError::NotOpen("package"))?;
        if opened.tree.is_none() {
            let tree = self.format.build_root(opened.id)?;
            debug!("built directory tree with {} items", tree.len());
            opened.tree = Some(tree);
        }
        Ok(opened)
    }

    /// Directory tree, built on first use.
    pub fn tree(&mut self) -> Result<&DirectoryTree> {
        let opened = self.opened_with_tree()?;
        opened
            .tree
            .as_ref()
            .ok_or(PackageError::NotOpen("directory tree"))
    }

    /// Mutable directory tree, for sorting.
    pub fn tree_mut(&mut self) -> Result<&mut DirectoryTree> {
        let opened = self.opened_with_tree()?;
        opened
            .tree
            .as_mut()
            .ok_or(PackageError::NotOpen("directory tree"))
    }

    /// Root folder.
    pub fn root(&mut self) -> Result<ItemHandle> {
        Ok(self.tree()?.root())
    }

    /// Borrow the format and tree after checking that `item` is a file of
    /// this open.
    fn file_context(&mut self, item: ItemHandle) -> Result<(&dyn PackageFormat, &DirectoryTree)> {
        self.opened_with_tree()?;
        let tree = self
            .opened
            .as_ref()
            .and_then(|o| o.tree.as_ref())
            .ok_or(PackageError::NotOpen("directory tree"))?;
        if tree.kind(item)? != ItemKind::File {
            return Err(PackageError::NotAFile(tree.name(item)?.to_string()));
        }
        Ok((self.format.as_ref(), tree))
    }

    /// Names of the package attributes, in index order.
    pub fn package_attribute_names(&self) -> &'static [&'static str] {
        self.format.package_attribute_names()
    }

    /// Package attribute at `index`.
    pub fn package_attribute(&self, index: usize) -> Result<Option<Attribute>> {
        self.opened()?;
        let Some(&name) = self.format.package_attribute_names().get(index) else {
            return Ok(None);
        };
        Ok(self
            .format
            .package_attribute(index)?
            .map(|value| Attribute { name, value }))
    }

    /// Every available package attribute.
    pub fn package_attributes(&self) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::new();
        for index in 0..self.format.package_attribute_names().len() {
            if let Some(attribute) = self.package_attribute(index)? {
                attributes.push(attribute);
            }
        }
        Ok(attributes)
    }

    /// Names of the item attributes, in index order.
    pub fn item_attribute_names(&self) -> &'static [&'static str] {
        self.format.item_attribute_names()
    }

    /// Item attribute at `index`.
    pub fn item_attribute(&mut self, item: ItemHandle, index: usize) -> Result<Option<Attribute>> {
        let names = self.format.item_attribute_names();
        self.opened_with_tree()?;
        let tree = self
            .opened
            .as_ref()
            .and_then(|o| o.tree.as_ref())
            .ok_or(PackageError::NotOpen("directory tree"))?;
        tree.kind(item)?;

        let Some(&name) = names.get(index) else {
            return Ok(None);
        };
        Ok(self
            .format
            .item_attribute(tree, item, index)?
            .map(|value| Attribute { name, value }))
    }

    /// Every available attribute of `item`.
    pub fn item_attributes(&mut self, item: ItemHandle) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::new();
        for index in 0..self.format.item_attribute_names().len() {
            if let Some(attribute) = self.item_attribute(item, index)? {
                attributes.push(attribute);
            }
        }
        Ok(attributes)
    }

    /// Declared size of a file.
    pub fn file_size(&mut self, item: ItemHandle) -> Result<u64> {
        let (format, tree) = self.file_context(item)?;
        format.file_size(tree, item)
    }

    /// Bytes a file occupies in the archive.
    pub fn file_size_on_disk(&mut self, item: ItemHandle) -> Result<u64> {
        let (format, tree) = self.file_context(item)?;
        format.file_size_on_disk(tree, item)
    }

    /// Whether a file's data can be read back in full.
    pub fn file_extractable(&mut self, item: ItemHandle) -> Result<bool> {
        let (format, tree) = self.file_context(item)?;
        format.file_extractable(tree, item)
    }

    /// Validate a file against the archive's integrity data.
    pub fn file_validation(&mut self, item: ItemHandle) -> Result<Validation> {
        let (format, tree) = self.file_context(item)?;
        format.file_validation(tree, item)
    }

    /// Create a closed stream over a file.
    ///
    /// The stream stays usable until the package closes or it is passed to
    /// [`Package::release_stream`].
    pub fn create_stream(&mut self, item: ItemHandle) -> Result<ItemStream> {
        let (format, tree) = self.file_context(item)?;
        let stream = format.create_stream(tree, item)?;
        let name = tree.name(item)?.to_string();
        self.track(stream, name)
    }

    /// Create a closed stream over raw bytes `[offset, offset + size)` of
    /// the archive, windowed by `config.view_size`.
    ///
    /// The range is checked when the stream is opened.
    pub fn raw_stream(&mut self, offset: u64, size: u64) -> Result<ItemStream> {
        let opened = self.opened()?;
        let name = format!("{}@{offset:#x}", self.package_type());
        let stream = MappingStream::new(
            Rc::clone(&opened.mapping),
            offset,
            size,
            self.config.view_size,
        )
        .with_name(name.clone());
        self.track(Box::new(stream), name)
    }

    fn track(&mut self, stream: Box<dyn Stream>, name: String) -> Result<ItemStream> {
        let opened = self.opened.as_mut().ok_or(PackageError::NotOpen("package"))?;
        let inner: TrackedStream = Rc::new(RefCell::new(stream));
        opened.streams.retain(|s| s.strong_count() > 0);
        opened.streams.push(Rc::downgrade(&inner));
        Ok(ItemStream {
            owner: opened.id,
            name,
            inner,
        })
    }

    /// Close and release a stream created by this package.
    pub fn release_stream(&mut self, mut stream: ItemStream) -> Result<()> {
        let opened = self.opened.as_mut().ok_or(PackageError::NotOpen("package"))?;
        if stream.owner != opened.id {
            return Err(PackageError::Ownership(format!(
                "stream of package {} released by package {}",
                stream.owner, opened.id
            )));
        }
        stream.close();
        opened
            .streams
            .retain(|s| s.strong_count() > 0 && !Weak::ptr_eq(s, &Rc::downgrade(&stream.inner)));
        Ok(())
    }

    /// Validate every file below `folder`, depth first.
    pub fn validate_all(&mut self, folder: ItemHandle) -> Result<Vec<(ItemHandle, Validation)>> {
        let files: Vec<ItemHandle> = self.tree()?.iter_files(folder)?.collect();
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            results.push((file, self.file_validation(file)?));
        }
        Ok(results)
    }

    /// Reorder the archive's data using `config.force_defragment`.
    pub fn defragment(&mut self) -> Result<DefragmentReport> {
        self.defragment_with(self.config.force_defragment)
    }

    /// Reorder the archive's data; `force` reorders even unfragmented files.
    ///
    /// Requires a package opened for writing. Open item streams stay valid
    /// and continue from their current position.
    pub fn defragment_with(&mut self, force: bool) -> Result<DefragmentReport> {
        let opened = self.opened()?;
        if !opened.mode.write {
            return Err(PackageError::InvalidMode(
                "defragmentation requires a package opened for writing".to_string(),
            ));
        }
        self.format.defragment(force)
    }

    /// Extract `item` into the host directory `destination`.
    ///
    /// A folder becomes a directory of the same name holding its extracted
    /// children; a file is written as `destination/name`.
    pub fn extract(
        &mut self,
        item: ItemHandle,
        destination: impl AsRef<Path>,
    ) -> Result<ExtractReport> {
        self.opened_with_tree()?;
        let mut report = ExtractReport::default();
        self.extract_item(item, destination.as_ref(), &mut report)?;
        info!(
            "extracted {} files ({} bytes), skipped {}",
            report.files_extracted, report.bytes, report.files_skipped
        );
        Ok(report)
    }

    fn extract_item(
        &mut self,
        item: ItemHandle,
        destination: &Path,
        report: &mut ExtractReport,
    ) -> Result<()> {
        let tree = self.tree()?;
        let name = tree.name(item)?.to_string();
        let target = destination.join(&name);

        if tree.kind(item)? == ItemKind::Folder {
            let children = tree.children(item)?;
            fs::create_dir_all(&target)?;
            report.folders += 1;
            for child in children {
                self.extract_item(child, &target, report)?;
            }
            return Ok(());
        }

        if target.exists() && !self.config.overwrite_files {
            debug!("skipping existing {}", target.display());
            report.files_skipped += 1;
            return Ok(());
        }
        if !self.file_extractable(item)? {
            warn!("{} is not extractable", name);
            report.files_skipped += 1;
            return Ok(());
        }
        if self.config.validate_on_extract {
            let validation = self.file_validation(item)?;
            if !validation.is_ok() {
                warn!("skipping {}: validation {}", name, validation);
                report.files_skipped += 1;
                return Ok(());
            }
        }

        let (format, tree) = self.file_context(item)?;
        let mut stream = format.create_stream(tree, item)?;
        stream.open(FileMode::READ)?;
        let mut output = File::create(&target)?;
        let copied = std::io::copy(&mut StreamReader::new(stream.as_mut()), &mut output);
        stream.close();

        report.bytes += copied?;
        report.files_extracted += 1;
        Ok(())
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        self.close();
    }
}
