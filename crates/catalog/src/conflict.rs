//! Duplicate and name-conflict resolution.
//!
//! Runs over the full resolved set once, before anything is scheduled, and
//! guarantees that the resources left to download have unique target paths
//! and unique download URLs.
//!
//! **Resolution strategy:**
//! 1. Resources sharing a download URL have identical content. Sorted by
//!    target path, the first becomes the *base* and the others hardlinks.
//! 2. Resources in the same course with the same name and a known size are
//!    assumed to be mirrors of each other. Sorted by download URL, the first
//!    becomes the base and the others hardlinks. An unknown size never
//!    matches anything.
//! 3. Whatever still shares a target path is a genuine name collision
//!    between different content. Sorted by download URL, every member gets a
//!    zero-based ordinal inserted before its extension. Ordinals that would
//!    land on a path somebody else already owns are skipped.
//!
//! Corrupted resources skip the first two passes: there is nothing to
//! deduplicate about a failed download, but it still owns its (empty) file.

use crate::Resource;
use crate::resource::with_ordinal;
use lectern_model::{CourseId, Size};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, error};

/// Output of [`resolve_conflicts`].
#[derive(Debug, Default)]
pub struct Resolution {
    /// Resources that own their file: bases, singletons and corrupted ones.
    pub resources: Vec<Resource>,
    /// Resources whose file is a link to a base in `resources`.
    pub hardlinks: Vec<Resource>,
}

impl Resolution {
    pub fn len(&self) -> usize {
        self.resources.len() + self.hardlinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.hardlinks.is_empty()
    }

    /// Whether no two resources share a target path or a download URL.
    ///
    /// Hardlinks that share their base's exact path (the same file listed
    /// twice) don't count as a collision.
    pub fn is_conflict_free(&self) -> bool {
        let mut paths = HashSet::new();
        let mut urls = HashSet::new();
        let owners_ok = self
            .resources
            .iter()
            .all(|r| paths.insert(r.path()) && (r.is_corrupted() || urls.insert(r.download_url.as_str())));
        let bases: BTreeMap<_, _> = self.resources.iter().map(|r| (&r.key, r.path())).collect();
        owners_ok
            && self.hardlinks.iter().all(|h| {
                let base_path = h.link_target.as_ref().and_then(|k| bases.get(k));
                base_path == Some(&h.path()) || paths.insert(h.path())
            })
    }
}

/// Deduplicate and rename `resources`, see the [module docs](self).
///
/// The result only depends on the set of resources passed in, not on their
/// order.
pub fn resolve_conflicts(resources: Vec<Resource>) -> Resolution {
    let mut all = resources;
    // Stable, input-order independent iteration for every pass.
    all.sort_by(|a, b| a.key.cmp(&b.key));
    let count = all.len();
    let mut base_of: Vec<Option<usize>> = vec![None; count];

    let active: Vec<usize> = (0..count).filter(|&i| !all[i].is_corrupted()).collect();

    // Pass 1: identical download URL.
    let mut by_url: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for &i in &active {
        by_url.entry(all[i].download_url.as_str()).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = by_url.into_values().collect();
    for group in &mut groups {
        group.sort_by(|&a, &b| all[a].path().cmp(&all[b].path()).then_with(|| all[a].key.cmp(&all[b].key)));
    }
    let mut merged_by_url = 0;
    for group in &groups {
        for &member in &group[1..] {
            link(&mut base_of, member, group[0]);
            merged_by_url += 1;
        }
    }
    let remaining: Vec<usize> = groups.iter().map(|g| g[0]).collect();

    // Pass 2: same course, name and known size.
    let mut by_identity: BTreeMap<(CourseId, &str, SizeKey), Vec<usize>> = BTreeMap::new();
    for &i in &remaining {
        if let Some(size) = SizeKey::from_size(all[i].size) {
            by_identity.entry((all[i].course(), all[i].name.as_str(), size)).or_default().push(i);
        }
    }
    let mut merged_by_identity = 0;
    for mut group in by_identity.into_values() {
        group.sort_by(|&a, &b| {
            all[a].download_url.cmp(&all[b].download_url).then_with(|| all[a].key.cmp(&all[b].key))
        });
        for &member in &group[1..] {
            link(&mut base_of, member, group[0]);
            merged_by_identity += 1;
        }
    }

    // Apply links before pass 3 so that hardlinks carry their final base's
    // metadata; base_of is already flattened to the final base.
    for i in 0..count {
        if let Some(base) = base_of[i] {
            let base = all[base].clone();
            all[i].link_to(&base);
        }
    }

    // Pass 3: remaining path collisions, including those between hardlinks
    // and unrelated resources. A hardlink sitting at its base's exact path is
    // the same file listed twice and takes no part.
    let duplicate_of_base = |i: usize| base_of[i].is_some_and(|b| all[b].path() == all[i].path());
    let duplicates: BTreeSet<usize> = (0..count).filter(|&i| duplicate_of_base(i)).collect();
    let mut by_path: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
    for i in (0..count).filter(|i| !duplicates.contains(i)) {
        by_path.entry(all[i].path()).or_default().push(i);
    }
    // Paths nobody is fighting over can't be handed out as a new name.
    let mut taken: HashSet<PathBuf> =
        by_path.iter().filter(|(_, group)| group.len() == 1).map(|(path, _)| path.clone()).collect();
    let mut renamed = 0;
    for mut group in by_path.into_values().filter(|g| g.len() > 1) {
        group.sort_by(|&a, &b| {
            all[a].download_url.cmp(&all[b].download_url).then_with(|| all[a].key.cmp(&all[b].key))
        });
        let mut ordinal = 0;
        for &i in &group {
            let original = all[i].name.clone();
            loop {
                all[i].name = with_ordinal(&original, ordinal);
                ordinal += 1;
                if taken.insert(all[i].path()) {
                    break;
                }
            }
            renamed += 1;
        }
    }
    // Exact duplicates follow their base, wherever it ended up.
    for i in duplicates {
        if let Some(base) = base_of[i] {
            all[i].name = all[base].name.clone();
        }
    }

    debug!(
        target: "conflicts",
        total = count,
        merged_by_url,
        merged_by_identity,
        renamed,
        "conflict resolution finished"
    );

    let mut resolution = Resolution::default();
    for (i, resource) in all.into_iter().enumerate() {
        match base_of[i] {
            Some(_) => resolution.hardlinks.push(resource),
            None => resolution.resources.push(resource),
        }
    }
    if !resolution.is_conflict_free() {
        error!(target: "conflicts", "conflict resolution left colliding paths or download urls; this is a bug");
    }
    resolution
}

/// Point `member` (and everything already linked to it) at `base`.
fn link(base_of: &mut [Option<usize>], member: usize, base: usize) {
    base_of[member] = Some(base);
    for entry in base_of.iter_mut() {
        if *entry == Some(member) {
            *entry = Some(base);
        }
    }
}

/// Known size descriptors, usable as a grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SizeKey {
    Bytes(u64),
    Seconds(u64),
}

impl SizeKey {
    fn from_size(size: Size) -> Option<Self> {
        match size {
            Size::Bytes(b) => Some(Self::Bytes(b)),
            Size::Seconds(s) => Some(Self::Seconds(s)),
            Size::Unknown => None,
        }
    }
}
