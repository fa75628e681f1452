//! The activation manager.
//!
//! Initial package loading at mount, activation change batches at runtime,
//! and the traversals that weave a package's node tree into the visible
//! tree and back out of it.
//!
//! Content traversals are iterative: package nodes carry parent pointers,
//! so the tree itself serves as the stack. Additions run in pre-order,
//! removals in post-order; a failed addition is undone by a removal bounded
//! at the failing node.

use std::sync::Arc;
use tracing::{error, info, warn};

use packagefs_shared::constants::names::PACKAGE_INFO_FILE;
use packagefs_shared::control::{ActivationChangeKind, ActivationChangeRequest};
use packagefs_shared::{PackageFsError, PackageFsResult};

use crate::listener::OldNodeAttributes;
use crate::node::{Node, NodeRef};
use crate::package::{Package, PackageNode};

use super::{ALL_STAT_FIELDS, Volume};

/// Load and apply the initial package set at mount time.
///
/// Strategies, in order: the activation file of the requested (oldest
/// loaded) state; the live activation file; a full directory scan. Content
/// application failures are isolated per package.
pub(crate) fn load_initial_packages(volume: &Arc<Volume>) -> PackageFsResult<()> {
    let domains = volume.domains();
    let oldest = domains.last().expect("live domain").clone();
    let live = domains.first().expect("live domain").clone();

    let mut loaded = load_from_activation_file(volume, &oldest);
    if loaded.is_err() && !Arc::ptr_eq(&oldest, &live) {
        warn!(
            state = oldest.state_name().unwrap_or_default(),
            "loading packages from old state failed; falling back to the live state"
        );
        volume.clear_package_table();
        volume.drop_old_state_domains();
        loaded = load_from_activation_file(volume, &live);
    }

    if let Err(err) = loaded {
        info!(error = %err, "activation file unavailable; scanning the packages directory");
        volume.clear_package_table();
        let names = live.list_package_files()?;
        for name in names {
            match volume.load_package(&name, &live) {
                Ok(package) => volume.add_package_to_table(&package),
                Err(err) => warn!(package = %name, error = %err, "failed to load package"),
            }
        }
    }

    // Apply every loaded package's content; one bad package does not take
    // the mount down.
    let system = volume.system_volume_if_not_self();
    let _system_guard = system.as_ref().map(|system| system.lock.write());
    let _guard = volume.lock.write();

    for package in volume.packages_snapshot() {
        if let Err(err) = add_package_content(volume, &package, false) {
            error!(
                package = package.file_name(),
                error = %err,
                "failed to apply package content; deactivating it"
            );
            volume.remove_package_from_table(&package);
        }
    }
    Ok(())
}

fn load_from_activation_file(
    volume: &Arc<Volume>,
    domain: &Arc<super::domain::PackagesDirectory>,
) -> PackageFsResult<()> {
    let names = domain.read_activation_file()?;
    info!(
        count = names.len(),
        directory = %domain.path().display(),
        "activating packages from activation file"
    );
    for name in names {
        let package = volume.load_package(&name, domain)?;
        volume.add_package_to_table(&package);
    }
    Ok(())
}

/// Apply one activation change batch.
pub(crate) fn change_activation(
    volume: &Arc<Volume>,
    request: &ActivationChangeRequest,
) -> PackageFsResult<()> {
    if request.items.is_empty() {
        return Ok(());
    }

    // Validate the request against the current state.
    {
        let _guard = volume.lock.read();
        let live = volume.live_domain();

        for item in &request.items {
            if u64::from(item.parent_device_id) != live.device_id()
                || item.parent_directory_id != live.node_id()
            {
                return Err(PackageFsError::MismatchedValues(format!(
                    "activation item \"{}\" names a foreign packages directory",
                    item.name
                )));
            }

            let active = volume.find_package(&item.name).is_some();
            match item.kind {
                ActivationChangeKind::Activate if active => {
                    return Err(PackageFsError::NameInUse(item.name.clone()));
                }
                ActivationChangeKind::Deactivate | ActivationChangeKind::Reactivate
                    if !active =>
                {
                    return Err(PackageFsError::not_found(item.name.clone()));
                }
                _ => {}
            }
        }
    }

    // Load all incoming packages without holding any lock.
    let live = volume.live_domain();
    let mut new_packages = Vec::new();
    for item in &request.items {
        if matches!(
            item.kind,
            ActivationChangeKind::Activate | ActivationChangeKind::Reactivate
        ) {
            let package = volume.load_package(&item.name, &live).map_err(|err| {
                error!(package = %item.name, error = %err, "failed to load package");
                err
            })?;
            new_packages.push(package);
        }
    }

    // Commit under the write locks, system volume first.
    let system = volume.system_volume_if_not_self();
    let _system_guard = system.as_ref().map(|system| system.lock.write());
    let _guard = volume.lock.write();

    let mut old_packages = Vec::new();
    for item in &request.items {
        if matches!(
            item.kind,
            ActivationChangeKind::Deactivate | ActivationChangeKind::Reactivate
        ) {
            let package = volume
                .find_package(&item.name)
                .ok_or_else(|| PackageFsError::not_found(item.name.clone()))?;
            old_packages.push(package);
        }
    }

    info!(
        new = new_packages.len(),
        old = old_packages.len(),
        "applying activation change"
    );

    for package in &old_packages {
        remove_package_content(volume, package, None, true);
        volume.remove_package_from_table(package);
        info!(package = package.file_name(), "package deactivated");
    }

    let mut added = 0usize;
    let mut failure = None;
    for package in &new_packages {
        volume.add_package_to_table(package);
        match add_package_content(volume, package, true) {
            Ok(()) => {
                added += 1;
                info!(package = package.file_name(), "package activated");
            }
            Err(err) => {
                volume.remove_package_from_table(package);
                failure = Some(err);
                break;
            }
        }
    }

    let Some(failure) = failure else {
        return Ok(());
    };

    // Roll the batch back: strip what was added, restore what was removed.
    for package in new_packages[..added].iter().rev() {
        remove_package_content(volume, package, None, true);
        volume.remove_package_from_table(package);
    }
    for package in old_packages.iter().rev() {
        volume.add_package_to_table(package);
        if let Err(err) = add_package_content(volume, package, true) {
            // Nothing more we can do; the volume runs degraded.
            error!(
                package = package.file_name(),
                error = %err,
                "failed to roll back deactivation"
            );
            volume.remove_package_from_table(package);
        }
    }
    Err(failure)
}

/// Weave one package's content into the visible tree. On failure,
/// everything this call added is removed again.
pub(crate) fn add_package_content(
    volume: &Arc<Volume>,
    package: &Arc<Package>,
    notify: bool,
) -> PackageFsResult<()> {
    volume.fs_root().add_package(package);

    let roots = package.root_nodes();
    for (index, root) in roots.iter().enumerate() {
        if root.name() == PACKAGE_INFO_FILE {
            continue;
        }
        if let Err(err) = add_content_root_node(volume, root, notify) {
            for prior in roots[..index].iter().rev() {
                if prior.name() != PACKAGE_INFO_FILE {
                    remove_content_root_node(volume, prior, None, notify);
                }
            }
            volume.fs_root().remove_package(package);
            return Err(err);
        }
    }
    Ok(())
}

/// Remove one package's content. `end_root` bounds the walk to the roots
/// added before a failed addition.
pub(crate) fn remove_package_content(
    volume: &Arc<Volume>,
    package: &Arc<Package>,
    end_root: Option<&Arc<PackageNode>>,
    notify: bool,
) {
    for root in package.root_nodes() {
        if let Some(end) = end_root
            && Arc::ptr_eq(&root, end)
        {
            break;
        }
        if root.name() == PACKAGE_INFO_FILE {
            continue;
        }
        remove_content_root_node(volume, &root, None, notify);
    }
    volume.fs_root().remove_package(package);
}

/// Pre-order walk of one package root, adding every package node to the
/// tree. Undoes its own partial work on failure.
fn add_content_root_node(
    volume: &Arc<Volume>,
    root: &Arc<PackageNode>,
    notify: bool,
) -> PackageFsResult<()> {
    let mut package_node = root.clone();
    let mut directory = volume.root_directory().clone();

    loop {
        let node = match add_package_node(volume, &directory, &package_node, notify) {
            Ok(node) => node,
            Err(err) => {
                remove_content_root_node(volume, root, Some(&package_node), notify);
                return Err(err);
            }
        };

        // Descend, unless the node was skipped (shine-through collision).
        if let Some(node) = node
            && package_node.is_directory()
            && let Some(first) = package_node.first_child()
        {
            directory = node;
            package_node = first;
            continue;
        }

        // Advance to the next sibling, ascending as needed.
        loop {
            let parent = package_node.parent();
            let sibling = parent
                .as_ref()
                .and_then(|parent| parent.next_child(&package_node));
            if let Some(sibling) = sibling {
                package_node = sibling;
                break;
            }
            match parent {
                None => return Ok(()),
                Some(parent) => {
                    package_node = parent;
                    directory = directory.parent().expect("visible ancestor");
                }
            }
        }
    }
}

/// Post-order walk removing a package root's nodes from the tree. When
/// `end` is given the walk stops there, stripping the contributions of
/// `end`'s ancestors on the way out.
fn remove_content_root_node(
    volume: &Arc<Volume>,
    root: &Arc<PackageNode>,
    end: Option<&Arc<PackageNode>>,
    notify: bool,
) {
    let mut package_node = root.clone();
    let mut directory = volume.root_directory().clone();

    loop {
        if let Some(end) = end
            && Arc::ptr_eq(&package_node, end)
        {
            // The failed node itself contributed nothing, but its
            // ancestors did; strip them while unwinding.
            while let Some(parent) = package_node.parent() {
                directory = directory.parent().expect("visible ancestor");
                let visible = directory.find_child(parent.name());
                remove_package_node(volume, &directory, &parent, visible, notify);
                package_node = parent;
            }
            return;
        }

        if package_node.is_directory()
            && let Some(first) = package_node.first_child()
            && let Some(child_directory) = directory
                .find_child(package_node.name())
                .filter(|node| node.is_directory())
        {
            directory = child_directory;
            package_node = first;
            continue;
        }

        loop {
            let parent = package_node.parent();
            let sibling = parent
                .as_ref()
                .and_then(|parent| parent.next_child(&package_node));

            let visible = directory.find_child(package_node.name());
            remove_package_node(volume, &directory, &package_node, visible, notify);

            if let Some(sibling) = sibling {
                package_node = sibling;
                break;
            }
            match parent {
                None => return,
                Some(parent) => {
                    package_node = parent;
                    directory = directory.parent().expect("visible ancestor");
                }
            }
        }
    }
}

/// Attach one package node under `directory`.
///
/// Returns the visible node, or `None` when a same-name non-union child
/// (a shine-through directory) shadows the path; that case is skipped
/// silently so bind mounts survive activation.
fn add_package_node(
    volume: &Arc<Volume>,
    directory: &NodeRef,
    package_node: &Arc<PackageNode>,
    notify: bool,
) -> PackageFsResult<Option<NodeRef>> {
    let existing = directory.find_child(package_node.name());
    let mut is_new_node = false;
    let mut old_package_node = None;

    let mut node = match existing {
        Some(node) => {
            if !node.is_unpacking() {
                return Ok(None);
            }
            old_package_node = node.get_package_node();
            node
        }
        None => {
            let node = create_unpacking_node(volume, package_node, directory)?;
            is_new_node = true;
            node
        }
    };

    let mut replaced_node = None;
    if !is_new_node
        && !node.is_directory()
        && old_package_node.is_some()
        && node.will_be_first_package_node(package_node)
    {
        // The incoming contributor will represent this leaf. Clients
        // holding the node open must keep seeing the old data, so the node
        // is re-identified: a clone takes over under a fresh id.
        let clone = node.clone_transfer_package_nodes(volume.allocate_node_id())?;

        volume.notify_node_removed(&node);
        volume.remove_node_and_vnode(&node);
        replaced_node = Some(node.clone());

        directory.add_child(&clone)?;
        volume.insert_node(&clone);
        node = clone;
        is_new_node = true;
    }

    if let Err(err) = node.add_package_node(package_node) {
        // Type mismatch. Take back what this call created.
        if is_new_node {
            match &replaced_node {
                Some(old) => {
                    volume.notify_node_added(&node);
                    if notify {
                        volume
                            .bridge()
                            .notify_entry_removed(directory.id(), old.name(), old.id());
                        volume.bridge().notify_entry_created(
                            directory.id(),
                            node.name(),
                            node.id(),
                        );
                    }
                }
                None => volume.remove_node(&node),
            }
        }
        return Err(err);
    }

    let became_head = node
        .get_package_node()
        .is_some_and(|head| Arc::ptr_eq(&head, package_node));

    if is_new_node {
        volume.notify_node_added(&node);
    } else if became_head {
        volume.notify_node_changed(
            &node,
            ALL_STAT_FIELDS,
            &OldNodeAttributes::of(old_package_node.as_ref()),
        );
    }

    if notify {
        if is_new_node {
            if let Some(old) = &replaced_node {
                volume
                    .bridge()
                    .notify_entry_removed(directory.id(), old.name(), old.id());
            }
            volume
                .bridge()
                .notify_entry_created(directory.id(), node.name(), node.id());
        } else if became_head {
            // Directories keep their identity; only their stat changes.
            volume
                .bridge()
                .notify_stat_changed(node.id(), ALL_STAT_FIELDS);
        }
    }

    Ok(Some(node))
}

/// Detach one package node from the visible node `node` (if any).
fn remove_package_node(
    volume: &Arc<Volume>,
    directory: &NodeRef,
    package_node: &Arc<PackageNode>,
    node: Option<NodeRef>,
    notify: bool,
) {
    let Some(node) = node else { return };
    if !node.is_unpacking() {
        return;
    }

    let head = node.get_package_node();
    let is_head = head
        .as_ref()
        .is_some_and(|head| Arc::ptr_eq(head, package_node));

    let mut node_removed = false;
    let mut replacement = None;

    if node.is_only_package_node(package_node) {
        // Last contributor: the node goes away entirely. Indices must see
        // the node while it still resolves, so notify before removing.
        volume.notify_node_removed(&node);
        node.prepare_for_removal();
        volume.remove_node_and_vnode(&node);
        node_removed = true;
    } else if is_head {
        if package_node.is_directory() {
            node.remove_package_node(package_node);
            volume.notify_node_changed(
                &node,
                ALL_STAT_FIELDS,
                &OldNodeAttributes::of(head.as_ref()),
            );
        } else {
            // Head of a leaf: re-identify via the clone protocol.
            match node.clone_transfer_package_nodes(volume.allocate_node_id()) {
                Ok(clone) => {
                    clone.remove_package_node(package_node);

                    volume.notify_node_removed(&node);
                    volume.remove_node_and_vnode(&node);

                    if directory.add_child(&clone).is_ok() {
                        volume.insert_node(&clone);
                        volume.notify_node_added(&clone);
                        replacement = Some(clone);
                    }
                }
                Err(_) => {
                    volume.notify_node_removed(&node);
                    node.prepare_for_removal();
                    volume.remove_node_and_vnode(&node);
                    node_removed = true;
                }
            }
        }
    } else {
        // A non-head contributor leaves; nothing visible changes.
        node.remove_package_node(package_node);
    }

    if !notify {
        return;
    }

    if node_removed {
        volume
            .bridge()
            .notify_entry_removed(directory.id(), node.name(), node.id());
    } else if is_head {
        if package_node.is_directory() {
            volume
                .bridge()
                .notify_stat_changed(node.id(), ALL_STAT_FIELDS);
        } else if let Some(replacement) = &replacement {
            volume
                .bridge()
                .notify_entry_removed(directory.id(), node.name(), node.id());
            volume.bridge().notify_entry_created(
                directory.id(),
                replacement.name(),
                replacement.id(),
            );
        }
    }
}

/// Create the visible node for a package node's path.
fn create_unpacking_node(
    volume: &Arc<Volume>,
    package_node: &Arc<PackageNode>,
    parent: &NodeRef,
) -> PackageFsResult<NodeRef> {
    let id = volume.allocate_node_id();
    let mode = package_node.mode() & libc::S_IFMT as u32;
    let node = if mode == libc::S_IFDIR as u32 {
        Node::new_union_directory(id, package_node.name())
    } else if mode == libc::S_IFREG as u32 || mode == libc::S_IFLNK as u32 {
        Node::new_unpacking_leaf(id, package_node.name())
    } else {
        return Err(PackageFsError::Unsupported("special file in package"));
    };

    parent.add_child(&node)?;
    volume.insert_node(&node);
    Ok(node)
}
