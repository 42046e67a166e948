//! Subcommand handlers

use crate::cli::Command;
use anyhow::{Context, Result, anyhow, bail};
use hlpak::{DirectoryTree, FindType, ItemHandle, ItemKind, Package, SortOrder, Validation};
use tracing::{debug, info};

/// Run `command` against an opened package.
pub fn run(package: &mut Package, command: &Command) -> Result<()> {
    match command {
        Command::Info => show_info(package),
        Command::List {
            folder,
            sort,
            descending,
        } => {
            let folder = resolve(package, folder)?;
            let order = if *descending {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            };
            package
                .tree_mut()?
                .sort(folder, (*sort).into(), order, true)?;
            let tree = package.tree()?;
            print_folder(tree, folder, 0)
        }
        Command::Find { pattern, .. } => find(package, pattern, command.find_type()),
        Command::Validate { path } => validate(package, path),
        Command::Extract { path, dest, .. } => {
            let item = resolve(package, path)?;
            let report = package
                .extract(item, dest)
                .with_context(|| format!("failed to extract into {}", dest.display()))?;
            println!(
                "Extracted {} files ({} bytes) into {} folders, skipped {}",
                report.files_extracted, report.bytes, report.folders, report.files_skipped
            );
            Ok(())
        }
        Command::Defragment { .. } => {
            let report = package.defragment()?;
            if report.skipped {
                println!(
                    "Nothing to do: {} of {} blocks fragmented",
                    report.blocks_fragmented, report.blocks_used
                );
            } else {
                println!(
                    "Defragmented {} files: {} of {} blocks fragmented, {} moved",
                    report.files_fragmented,
                    report.blocks_fragmented,
                    report.blocks_used,
                    report.blocks_moved
                );
            }
            Ok(())
        }
    }
}

/// Item at `path` below the root; the empty path is the root itself.
fn resolve(package: &mut Package, path: &str) -> Result<ItemHandle> {
    let root = package.root()?;
    package
        .tree()?
        .get_relative_item(root, path, FindType::ALL)?
        .ok_or_else(|| anyhow!("{path} not found in archive"))
}

fn show_info(package: &mut Package) -> Result<()> {
    println!("Type: {}", package.package_type());
    for attribute in package.package_attributes()? {
        println!("{}: {}", attribute.name, attribute.value);
    }

    let root = package.root()?;
    let tree = package.tree()?;
    println!("Folders: {}", tree.folder_count(root, true)?);
    println!("Files: {}", tree.file_count(root, true)?);
    println!("Total size: {} bytes", tree.total_size(root)?);
    Ok(())
}

fn print_folder(tree: &DirectoryTree, folder: ItemHandle, depth: usize) -> Result<()> {
    for child in tree.children(folder)? {
        let name = tree.name(child)?;
        match tree.kind(child)? {
            ItemKind::Folder => {
                println!("{:indent$}{name}/", "", indent = depth * 2);
                print_folder(tree, child, depth + 1)?;
            }
            ItemKind::File => {
                println!(
                    "{:indent$}{name}  {} bytes",
                    "",
                    tree.size(child)?,
                    indent = depth * 2
                );
            }
        }
    }
    Ok(())
}

fn find(package: &mut Package, pattern: &str, find: FindType) -> Result<()> {
    let root = package.root()?;
    let tree = package.tree()?;

    let mut found = 0usize;
    let mut current = tree.find_first(root, pattern, find)?;
    while let Some(item) = current {
        println!("{}", tree.path(item)?);
        found += 1;
        current = tree.find_next(root, item, pattern, find)?;
    }
    debug!("{} items matched {}", found, pattern);
    if found == 0 {
        bail!("no items match {pattern}");
    }
    Ok(())
}

fn validate(package: &mut Package, path: &str) -> Result<()> {
    let item = resolve(package, path)?;
    let results = match package.tree()?.kind(item)? {
        ItemKind::File => vec![(item, package.file_validation(item)?)],
        ItemKind::Folder => package.validate_all(item)?,
    };

    let mut failed = 0usize;
    for (file, validation) in &results {
        let path = package.tree()?.path(*file)?;
        if validation.is_ok() {
            debug!("{}: {}", path, validation);
        } else {
            println!("{path}: {validation}");
            failed += 1;
        }
    }

    let ok = results
        .iter()
        .filter(|(_, v)| *v == Validation::Ok)
        .count();
    info!("validated {} files", results.len());
    println!(
        "{} files: {} ok, {} assumed ok, {} failed",
        results.len(),
        ok,
        results.len() - ok - failed,
        failed
    );
    if failed > 0 {
        bail!("{failed} files failed validation");
    }
    Ok(())
}
