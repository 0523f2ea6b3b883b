//! The tree data model (§3, §4.1)
//!
//! Every scanned filesystem object becomes exactly one [`Entry`] in a
//! single monotonic arena owned by [`Model`]. Children hang off their
//! parent through a singly linked `next_sibling` chain in scanner
//! insertion order (I4); there is no `Vec<Entry>` of children anywhere,
//! which is what lets a directory with a million entries cost one
//! pointer-sized slot per child instead of a growable vector.
//!
//! Disk usage is not recomputed on read: [`Model::add_stats`] folds a
//! newly inserted entry into every ancestor's running totals once, and
//! [`Entry::blocks`]/[`Entry::size`]/[`DirData::items`] on a directory
//! are already the aggregate over its whole subtree. Hard-link
//! accounting (I2/I3) lives in [`DeviceTable`], one hard-link map per
//! device, keyed by `(inode, ancestor dir)` so the same inode can be
//! "new" to one ancestor and already-seen to another.

use crate::sink::{ExtStat, Sink, Special, Stat};
use crate::util::{saturating_add, saturating_sub};
use std::collections::HashMap;

/// Arena index. Stable for the lifetime of a scan/import; never reused
/// once assigned (refresh/delete leave holes rather than recycle them).
pub type NodeId = u32;

/// Dense device identifier handed out by [`DeviceTable`] in sighting order.
pub type DeviceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Dir,
    Link,
    File,
}

/// Extended metadata (§3), attached only when the scan/import carried it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtMeta {
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
}

impl From<ExtStat> for ExtMeta {
    fn from(e: ExtStat) -> Self {
        Self {
            mtime: e.mtime,
            uid: e.uid,
            gid: e.gid,
            mode: e.mode,
        }
    }
}

#[derive(Debug)]
pub struct DirData {
    pub first_child: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub shared_blocks: u64,
    pub shared_size: u64,
    pub items: u64,
    pub device: DeviceId,
    pub err: bool,
    pub suberr: bool,
}

#[derive(Debug)]
pub struct LinkData {
    pub inode: u64,
    pub nlink: u32,
}

#[derive(Debug, Default)]
pub struct FileData {
    pub err: bool,
    pub excluded: bool,
    pub other_fs: bool,
    pub kernfs: bool,
    pub notreg: bool,
}

#[derive(Debug)]
pub enum Data {
    Dir(DirData),
    Link(LinkData),
    File(FileData),
}

/// A node in the tree, tagged Dir/Link/File (§3).
#[derive(Debug)]
pub struct Entry {
    pub kind: Kind,
    pub counted: bool,
    pub blocks: u64,
    pub size: u64,
    pub next_sibling: Option<NodeId>,
    /// Raw bytes as returned by the OS; never validated as UTF-8 — only
    /// the browsing UI does lossy repair for display.
    pub name: Vec<u8>,
    pub ext: Option<ExtMeta>,
    pub data: Data,
}

impl Entry {
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Dir)
    }

    pub fn as_dir(&self) -> Option<&DirData> {
        match &self.data {
            Data::Dir(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirData> {
        match &mut self.data {
            Data::Dir(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&LinkData> {
        match &self.data {
            Data::Link(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileData> {
        match &self.data {
            Data::File(f) => Some(f),
            _ => None,
        }
    }

    /// Whether this entry currently carries a read error.
    pub fn has_err(&self) -> bool {
        match &self.data {
            Data::Dir(d) => d.err,
            Data::File(f) => f.err,
            Data::Link(_) => false,
        }
    }

    pub fn has_sub_err(&self) -> bool {
        matches!(&self.data, Data::Dir(d) if d.suberr)
    }
}

/// Per-device hard-link tally: how many times an inode has been counted
/// within each ancestor directory's subtree so far (I2).
pub type HardlinksMap = HashMap<(u64, NodeId), u32>;

struct DeviceEntry {
    hardlinks: HardlinksMap,
}

/// Maps real `st_dev` values to a small dense [`DeviceId`]. Devices are
/// only ever added, never removed.
#[derive(Default)]
pub struct DeviceTable {
    index: HashMap<u64, DeviceId>,
    entries: Vec<DeviceEntry>,
}

impl DeviceTable {
    pub fn get_or_create(&mut self, st_dev: u64) -> DeviceId {
        if let Some(&id) = self.index.get(&st_dev) {
            return id;
        }
        let id = self.entries.len() as DeviceId;
        self.entries.push(DeviceEntry {
            hardlinks: HashMap::new(),
        });
        self.index.insert(st_dev, id);
        id
    }
}

/// Running counters surfaced to the UI's scanning screen. Single
/// threaded, so plain fields suffice — no atomics needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub entries: u64,
    pub directories: u64,
    pub files: u64,
    pub errors: u64,
    pub total_size: u64,
    pub total_blocks: u64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The tree plus the hard-link bookkeeping that addStats/delStats need.
pub struct Model {
    arena: Vec<Entry>,
    root: Option<NodeId>,
    devices: DeviceTable,
    /// Tallies occurrences of Links whose true nlink isn't known yet —
    /// populated only by the importer when a dump omits `nlink` on a
    /// hard-linked entry.
    link_count_buffer: HashMap<(DeviceId, u64), u32>,
    pub stats: ScanStats,

    // Sink-driver state: the stack of currently open ancestor
    // directories, the name staged by the last push_name, and the id of
    // the most recently terminated element (for enter_dir to pick up).
    open_dirs: Vec<NodeId>,
    pending_name: Option<Vec<u8>>,
    last_created: Option<NodeId>,
}

impl Model {
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            root: None,
            devices: DeviceTable::default(),
            link_count_buffer: HashMap::new(),
            stats: ScanStats::new(),
            open_dirs: Vec::new(),
            pending_name: None,
            last_created: None,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn devices_mut(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    pub fn get(&self, id: NodeId) -> &Entry {
        &self.arena[id as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Entry {
        &mut self.arena[id as usize]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Children of `dir`, in current (insertion-reversed) sibling order.
    pub fn children(&self, dir: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let first = self.get(dir).as_dir().and_then(|d| d.first_child);
        ChildIter {
            model: self,
            next: first,
        }
    }

    /// Children sorted for display. Collects into a Vec rather than
    /// reordering the underlying sibling chain, so the scanner's
    /// insertion order (I4) and the hard-link bookkeeping it anchors
    /// stay untouched.
    pub fn sorted_children(
        &self,
        dir: NodeId,
        key: SortKey,
        order: SortOrder,
        dirs_first: bool,
    ) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self.children(dir).collect();
        children.sort_by(|&a, &b| {
            if dirs_first {
                let a_dir = self.get(a).is_dir();
                let b_dir = self.get(b).is_dir();
                if a_dir != b_dir {
                    return b_dir.cmp(&a_dir);
                }
            }
            let ord = self.compare_by(a, b, key);
            match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
        children
    }

    fn compare_by(&self, a: NodeId, b: NodeId, key: SortKey) -> std::cmp::Ordering {
        let ea = self.get(a);
        let eb = self.get(b);
        match key {
            SortKey::Name => crate::util::natural_compare(&ea.name_lossy(), &eb.name_lossy()),
            SortKey::Size => ea.size.cmp(&eb.size),
            SortKey::Blocks => ea.blocks.cmp(&eb.blocks),
            SortKey::Items => {
                let ia = ea.as_dir().map(|d| d.items).unwrap_or(0);
                let ib = eb.as_dir().map(|d| d.items).unwrap_or(0);
                ia.cmp(&ib)
            }
            SortKey::Mtime => {
                let ma = ea.ext.map(|e| e.mtime).unwrap_or(0);
                let mb = eb.ext.map(|e| e.mtime).unwrap_or(0);
                ma.cmp(&mb)
            }
        }
    }

    /// `create`: allocate a zeroed entry. Rust's allocator already
    /// aborts the process on allocation failure, which is the practical
    /// equivalent of routing through an explicit `oom()` hook (see
    /// DESIGN.md).
    pub fn create(&mut self, kind: Kind, name: &[u8]) -> NodeId {
        let data = match kind {
            Kind::Dir => Data::Dir(DirData {
                first_child: None,
                parent: None,
                shared_blocks: 0,
                shared_size: 0,
                items: 0,
                device: 0,
                err: false,
                suberr: false,
            }),
            Kind::Link => Data::Link(LinkData { inode: 0, nlink: 0 }),
            Kind::File => Data::File(FileData::default()),
        };
        let entry = Entry {
            kind,
            counted: false,
            blocks: 0,
            size: 0,
            next_sibling: None,
            name: name.to_vec(),
            ext: None,
            data,
        };
        let id = self.arena.len() as NodeId;
        self.arena.push(entry);
        id
    }

    /// `insert`: prepend `entry` to `parent`'s child list, then fold its
    /// contribution into every ancestor via [`Model::add_stats`].
    pub fn insert(&mut self, entry: NodeId, parent: NodeId) {
        self.link_sibling(entry, parent);
        self.add_stats(entry, parent);
    }

    /// Structural-only insert, without running addStats. Used solely for
    /// Links whose true `nlink` isn't known yet; the later call to
    /// [`Model::finalize_deferred_links`] runs addStats exactly once,
    /// with the corrected count.
    fn insert_raw(&mut self, entry: NodeId, parent: NodeId) {
        self.link_sibling(entry, parent);
    }

    fn link_sibling(&mut self, entry: NodeId, parent: NodeId) {
        let first_child = self.get(parent).as_dir().unwrap().first_child;
        self.get_mut(entry).next_sibling = first_child;
        if let Some(p) = self.get_mut(parent).as_dir_mut() {
            p.first_child = Some(entry);
        }
    }

    fn parent_of(&self, dir: NodeId) -> Option<NodeId> {
        self.get(dir).as_dir().and_then(|d| d.parent)
    }

    fn dir_device(&self, dir: NodeId) -> DeviceId {
        self.get(dir).as_dir().map(|d| d.device).unwrap_or(0)
    }

    /// `addStats`: walk ancestors of `entry` from `parent` to root,
    /// folding in size/blocks/items and (for Links) the per-directory
    /// hard-link tally that drives `shared_*` (I2/I3). Idempotent by the
    /// `counted` flag (I6).
    pub fn add_stats(&mut self, entry: NodeId, parent: NodeId) {
        if self.get(entry).counted {
            return;
        }

        let (is_link, inode, nlink, entry_size, entry_blocks, entry_mtime) = {
            let e = self.get(entry);
            let (is_link, inode, nlink) = match &e.data {
                Data::Link(l) => (true, l.inode, l.nlink),
                _ => (false, 0, 0),
            };
            (
                is_link,
                inode,
                nlink,
                e.size,
                e.blocks,
                e.ext.map(|x| x.mtime),
            )
        };
        let home_device = self.dir_device(parent);

        let mut cursor = Some(parent);
        let mut last_add_total = true;
        while let Some(p) = cursor {
            let p_device = self.dir_device(p);

            let add_total = if is_link {
                if p_device != home_device {
                    // Crossed a filesystem boundary: hard-link identity
                    // stops applying; carry forward whatever the
                    // bottom-most same-device directory decided.
                    last_add_total
                } else {
                    let dev_entry = &mut self.devices.entries[p_device as usize];
                    let key = (inode, p);
                    match dev_entry.hardlinks.get_mut(&key) {
                        None => {
                            dev_entry.hardlinks.insert(key, 1);
                            if let Some(d) = self.get_mut(p).as_dir_mut() {
                                d.shared_blocks = saturating_add(d.shared_blocks, entry_blocks);
                                d.shared_size = saturating_add(d.shared_size, entry_size);
                            }
                            last_add_total = true;
                            true
                        }
                        Some(count) => {
                            *count += 1;
                            let fully_contained = *count == nlink;
                            if fully_contained {
                                if let Some(d) = self.get_mut(p).as_dir_mut() {
                                    d.shared_blocks = saturating_sub(d.shared_blocks, entry_blocks);
                                    d.shared_size = saturating_sub(d.shared_size, entry_size);
                                }
                            }
                            last_add_total = false;
                            false
                        }
                    }
                }
            } else {
                true
            };

            if let Some(d) = self.get_mut(p).as_dir_mut() {
                d.items = saturating_add(d.items, 1);
            }
            if add_total {
                self.get_mut(p).blocks = saturating_add(self.get(p).blocks, entry_blocks);
                self.get_mut(p).size = saturating_add(self.get(p).size, entry_size);
            }
            if let Some(mtime) = entry_mtime {
                if let Some(p_ext) = self.get_mut(p).ext.as_mut() {
                    p_ext.mtime = p_ext.mtime.max(mtime);
                }
            }

            cursor = self.parent_of(p);
        }

        self.get_mut(entry).counted = true;
    }

    /// `delStats`: mirror of addStats. `shared_*` on ancestors is **not**
    /// corrected (restoring it needs a full rescan) and saturation from
    /// the original addStats may leave totals too low afterwards — both
    /// are documented limitations, not bugs to paper over (see
    /// DESIGN.md).
    pub fn del_stats(&mut self, entry: NodeId, parent: NodeId) {
        if !self.get(entry).counted {
            return;
        }

        let (is_link, inode, entry_size, entry_blocks) = {
            let e = self.get(entry);
            let (is_link, inode) = match &e.data {
                Data::Link(l) => (true, l.inode),
                _ => (false, 0),
            };
            (is_link, inode, e.size, e.blocks)
        };
        let home_device = self.dir_device(parent);

        let mut cursor = Some(parent);
        let mut last_subtract = true;
        while let Some(p) = cursor {
            let p_device = self.dir_device(p);

            let subtract = if is_link {
                if p_device != home_device {
                    last_subtract
                } else {
                    let dev_entry = &mut self.devices.entries[p_device as usize];
                    let key = (inode, p);
                    let now_zero = match dev_entry.hardlinks.get_mut(&key) {
                        None => true,
                        Some(count) => {
                            *count = count.saturating_sub(1);
                            *count == 0
                        }
                    };
                    last_subtract = now_zero;
                    now_zero
                }
            } else {
                true
            };

            if let Some(d) = self.get_mut(p).as_dir_mut() {
                d.items = saturating_sub(d.items, 1);
            }
            if subtract {
                self.get_mut(p).blocks = saturating_sub(self.get(p).blocks, entry_blocks);
                self.get_mut(p).size = saturating_sub(self.get(p).size, entry_size);
            }
            // mtime on ancestors is intentionally left as-is.

            cursor = self.parent_of(p);
        }

        self.get_mut(entry).counted = false;
    }

    /// `delStatsRec`: post-order so children are un-counted before the
    /// node itself.
    pub fn del_stats_rec(&mut self, entry: NodeId, parent: NodeId) {
        if self.get(entry).is_dir() {
            let children: Vec<NodeId> = self.children(entry).collect();
            for child in children {
                self.del_stats_rec(child, entry);
            }
        }
        self.del_stats(entry, parent);
    }

    /// `setErr`: marks this entry as erroring, then walks ancestors
    /// setting `suberr` until reaching one that already has it set
    /// (short-circuit — everything above is necessarily already marked).
    pub fn set_err(&mut self, entry: NodeId, parent: Option<NodeId>) {
        match self.get_mut(entry).data {
            Data::Dir(ref mut d) => d.err = true,
            Data::File(ref mut f) => f.err = true,
            Data::Link(_) => {}
        }
        self.propagate_suberr(parent);
    }

    /// A directory listing aborted partway through its children.
    pub fn listing_error(&mut self, dir: NodeId) {
        if let Some(d) = self.get_mut(dir).as_dir_mut() {
            d.err = true;
        }
        let parent = self.parent_of(dir);
        self.propagate_suberr(parent);
    }

    fn propagate_suberr(&mut self, start: Option<NodeId>) {
        let mut cursor = start;
        while let Some(p) = cursor {
            let d = self.get_mut(p).as_dir_mut().unwrap();
            if d.suberr {
                break;
            }
            d.suberr = true;
            cursor = self.parent_of(p);
        }
    }

    /// `linkCount.add`: tally an occurrence of a Link whose true `nlink`
    /// is not yet known.
    pub fn link_count_add(&mut self, device: DeviceId, inode: u64) {
        *self.link_count_buffer.entry((device, inode)).or_insert(0) += 1;
    }

    /// `linkCount.finalize`: depth-first walk fixing up every Link left
    /// with `nlink == 0`, writing the tallied count and running addStats
    /// against it exactly once.
    pub fn finalize_deferred_links(&mut self) {
        let Some(root) = self.root else { return };
        self.finalize_deferred_links_rec(root);
    }

    fn finalize_deferred_links_rec(&mut self, dir: NodeId) {
        let children: Vec<NodeId> = self.children(dir).collect();
        for child in children {
            let (is_dir, needs_finalize, device_key) = {
                let e = self.get(child);
                match &e.data {
                    Data::Link(l) if l.nlink == 0 => {
                        (false, true, Some((self.dir_device(dir), l.inode)))
                    }
                    Data::Dir(_) => (true, false, None),
                    _ => (false, false, None),
                }
            };
            if needs_finalize {
                let (device, inode) = device_key.unwrap();
                let tally = self
                    .link_count_buffer
                    .get(&(device, inode))
                    .copied()
                    .unwrap_or(1)
                    .max(1);
                if let Data::Link(l) = &mut self.get_mut(child).data {
                    l.nlink = tally;
                }
                self.add_stats(child, dir);
            }
            if is_dir {
                self.finalize_deferred_links_rec(child);
            }
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

struct ChildIter<'m> {
    model: &'m Model,
    next: Option<NodeId>,
}

impl<'m> Iterator for ChildIter<'m> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.model.get(current).next_sibling;
        Some(current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Size,
    Blocks,
    Items,
    Mtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Drives tree construction through the shared [`Sink`] interface, used
/// by both the scanner and the importer.
impl Sink for Model {
    fn push_name(&mut self, name: &[u8]) {
        self.pending_name = Some(name.to_vec());
    }

    fn set_stat(&mut self, stat: &Stat) {
        let name = self
            .pending_name
            .take()
            .expect("push_name before set_stat");
        let kind = if stat.is_dir {
            Kind::Dir
        } else if stat.is_hardlink_candidate() {
            Kind::Link
        } else {
            Kind::File
        };

        let id = self.create(kind, &name);
        {
            let e = self.get_mut(id);
            e.size = stat.size;
            e.blocks = stat.blocks;
            e.ext = stat.ext.map(ExtMeta::from);
            match &mut e.data {
                Data::Link(l) => {
                    l.inode = stat.ino;
                    l.nlink = stat.nlink;
                }
                Data::File(f) => f.notreg = stat.notreg,
                Data::Dir(_) => {}
            }
        }

        self.stats.entries = saturating_add(self.stats.entries, 1);
        if stat.is_dir {
            self.stats.directories = saturating_add(self.stats.directories, 1);
        } else {
            self.stats.files = saturating_add(self.stats.files, 1);
        }
        self.stats.total_size = saturating_add(self.stats.total_size, stat.size);
        self.stats.total_blocks = saturating_add(self.stats.total_blocks, stat.blocks);

        match self.open_dirs.last().copied() {
            None => {
                let dev_id = self.devices.get_or_create(stat.dev);
                if let Some(d) = self.get_mut(id).as_dir_mut() {
                    d.device = dev_id;
                    d.parent = None;
                }
                self.get_mut(id).counted = true;
                self.root = Some(id);
            }
            Some(parent) => {
                if stat.is_dir {
                    let dev_id = self.devices.get_or_create(stat.dev);
                    if let Some(d) = self.get_mut(id).as_dir_mut() {
                        d.device = dev_id;
                        d.parent = Some(parent);
                    }
                }
                if kind == Kind::Link && stat.nlink == 0 {
                    self.insert_raw(id, parent);
                    let dev_id = self.devices.get_or_create(stat.dev);
                    self.link_count_add(dev_id, stat.ino);
                } else {
                    self.insert(id, parent);
                }
            }
        }

        self.last_created = Some(id);
    }

    fn set_special(&mut self, tag: Special) {
        let name = self
            .pending_name
            .take()
            .expect("push_name before set_special");
        let id = self.create(Kind::File, &name);
        if let Data::File(f) = &mut self.get_mut(id).data {
            match tag {
                Special::ReadError => f.err = true,
                Special::OtherFs => f.other_fs = true,
                Special::Kernfs => f.kernfs = true,
                Special::Excluded => f.excluded = true,
            }
        }
        if tag == Special::ReadError {
            self.stats.errors = saturating_add(self.stats.errors, 1);
        }

        match self.open_dirs.last().copied() {
            None => {
                self.root = Some(id);
                self.get_mut(id).counted = true;
            }
            Some(parent) => {
                self.insert(id, parent);
                if tag == Special::ReadError {
                    self.set_err(id, Some(parent));
                }
            }
        }

        self.last_created = Some(id);
    }

    fn enter_dir(&mut self) {
        let id = self
            .last_created
            .expect("enter_dir without a prior element");
        self.open_dirs.push(id);
    }

    fn leave_dir(&mut self) {
        self.open_dirs.pop();
    }

    fn listing_error(&mut self) {
        if let Some(&dir) = self.open_dirs.last() {
            Model::listing_error(self, dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Stat;

    fn dir_stat(dev: u64) -> Stat {
        Stat {
            dev,
            ino: 0,
            nlink: 1,
            size: 0,
            blocks: 0,
            is_dir: true,
            notreg: false,
            ext: None,
        }
    }

    fn file_stat(dev: u64, ino: u64, nlink: u32, size: u64, blocks: u64) -> Stat {
        Stat {
            dev,
            ino,
            nlink,
            size,
            blocks,
            is_dir: false,
            notreg: false,
            ext: None,
        }
    }

    #[test]
    fn empty_directory_has_zero_aggregates() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        let root = m.root().unwrap();
        assert_eq!(m.get(root).size, 0);
        assert_eq!(m.get(root).blocks, 0);
        assert_eq!(m.get(root).as_dir().unwrap().items, 0);
    }

    #[test]
    fn single_file_is_folded_into_root() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"a.txt");
        m.set_stat(&file_stat(1, 10, 1, 4096, 8));
        m.leave_dir();

        let root = m.root().unwrap();
        assert_eq!(m.get(root).size, 4096);
        assert_eq!(m.get(root).blocks, 8);
        assert_eq!(m.get(root).as_dir().unwrap().items, 1);

        let child = m.children(root).next().unwrap();
        assert_eq!(m.get(child).name_lossy(), "a.txt");
    }

    #[test]
    fn hardlink_contained_in_one_dir_is_not_shared() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        m.enter_dir();

        m.push_name(b"a");
        m.set_stat(&file_stat(1, 99, 2, 4096, 8));
        m.push_name(b"b");
        m.set_stat(&file_stat(1, 99, 2, 4096, 8));

        m.leave_dir();

        let root = m.root().unwrap();
        assert_eq!(m.get(root).blocks, 8);
        assert_eq!(m.get(root).as_dir().unwrap().shared_blocks, 0);
    }

    #[test]
    fn hardlink_with_peer_outside_tree_is_shared() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"a");
        m.set_stat(&file_stat(1, 99, 2, 4096, 8)); // peer link never seen
        m.leave_dir();

        let root = m.root().unwrap();
        assert_eq!(m.get(root).blocks, 8);
        assert_eq!(m.get(root).as_dir().unwrap().shared_blocks, 8);
    }

    #[test]
    fn suberr_propagates_with_short_circuit() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"sub");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"bad");
        m.set_special(Special::ReadError);
        m.leave_dir();
        m.leave_dir();

        let root = m.root().unwrap();
        let sub = m.children(root).next().unwrap();
        assert!(m.get(sub).as_dir().unwrap().suberr);
        assert!(m.get(root).as_dir().unwrap().suberr);
    }

    #[test]
    fn add_stats_is_idempotent() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        let root = m.root().unwrap();
        let child = m.create(Kind::File, b"x");
        m.get_mut(child).size = 10;
        m.get_mut(child).blocks = 1;
        m.insert(child, root);
        let size_after_first = m.get(root).size;
        m.add_stats(child, root);
        assert_eq!(m.get(root).size, size_after_first);
    }

    #[test]
    fn add_stats_then_del_stats_restores_totals_for_non_link() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        let root = m.root().unwrap();
        let items_before = m.get(root).as_dir().unwrap().items;
        let size_before = m.get(root).size;

        let child = m.create(Kind::File, b"x");
        m.get_mut(child).size = 123;
        m.get_mut(child).blocks = 1;
        m.insert(child, root);
        m.del_stats(child, root);

        assert_eq!(m.get(root).as_dir().unwrap().items, items_before);
        assert_eq!(m.get(root).size, size_before);
    }

    #[test]
    fn deferred_nlink_link_is_finalized() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"a");
        m.set_stat(&file_stat(1, 42, 0, 100, 1));
        m.push_name(b"b");
        m.set_stat(&file_stat(1, 42, 0, 100, 1));
        m.leave_dir();

        m.finalize_deferred_links();

        let root = m.root().unwrap();
        assert_eq!(m.get(root).blocks, 1);
        assert_eq!(m.get(root).as_dir().unwrap().shared_blocks, 0);
        let a = m.children(root).last().unwrap();
        assert_eq!(m.get(a).as_link().unwrap().nlink, 2);
    }

    #[test]
    fn stats_fold_past_the_immediate_parent() {
        let mut m = Model::new();
        m.push_name(b"root");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"sub");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"leaf");
        m.set_stat(&dir_stat(1));
        m.enter_dir();
        m.push_name(b"f.txt");
        m.set_stat(&file_stat(1, 7, 1, 4096, 8));
        m.leave_dir();
        m.leave_dir();
        m.leave_dir();

        let root = m.root().unwrap();
        let sub = m.children(root).next().unwrap();
        let leaf = m.children(sub).next().unwrap();

        assert_eq!(m.get(leaf).blocks, 8);
        assert_eq!(m.get(sub).blocks, 8);
        assert_eq!(m.get(root).blocks, 8);
        assert_eq!(m.get(root).as_dir().unwrap().items, 1);
    }
}
