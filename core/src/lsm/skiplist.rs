//! Lock-free skiplist for a single writer and any number of readers.
//!
//! Based on Pugh's "Skip Lists: A Probabilistic Alternative to Balanced
//! Trees". The list is append-only: nodes are never unlinked or mutated once
//! published, and are freed only when the last handle drops.
//!
//! Concurrency contract:
//! - Only a [`SkipListWriter`] can insert, and it cannot be cloned, so at most
//!   one insert runs at a time.
//! - [`SkipListReader`]s are `Clone + Send + Sync` and never block.
//! - A new node's own links are written with relaxed stores while it is still
//!   unreachable. Each predecessor link is then published with a release
//!   store, bottom level first. Readers load links with acquire, so a reader
//!   that sees a node also sees its initialized links.
//! - The list height is read and written relaxed. A reader that misses a
//!   height bump starts one level lower, which only costs it a few extra
//!   steps: unpublished upper levels look the same as "no successor".

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::arena::NodeArena;
use super::comparator::{Comparator, NaturalOrder};

/// Maximum number of levels a node can span.
pub const MAX_HEIGHT: usize = 12;

/// Each extra level is kept with probability 1/BRANCHING.
const BRANCHING: u32 = 4;

/// Link value meaning "no successor".
const NIL: u32 = u32::MAX;

/// Stable handle to a node. Valid for the lifetime of the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

struct Node<K> {
    key: K,
    /// One forward link per level, `0..height`.
    next: Box<[AtomicU32]>,
}

impl<K> Node<K> {
    fn height(&self) -> usize {
        self.next.len()
    }
}

fn decode_link(raw: u32) -> Option<NodeId> {
    (raw != NIL).then_some(NodeId(raw))
}

/// State shared by the writer and all readers.
struct Inner<K, C> {
    head: [AtomicU32; MAX_HEIGHT],
    height: AtomicUsize,
    /// Nodes reachable at level 0. Bumped after the node is linked.
    linked: AtomicUsize,
    nodes: NodeArena<Node<K>>,
    cmp: C,
}

impl<K, C: Comparator<K>> Inner<K, C> {
    fn node(&self, id: NodeId) -> &Node<K> {
        match self.nodes.get(id.0) {
            Some(node) => node,
            None => unreachable!("node {} linked before it was allocated", id.0),
        }
    }

    /// Forward link slot at `level`. `None` addresses the head.
    fn link(&self, at: Option<NodeId>, level: usize) -> &AtomicU32 {
        match at {
            None => &self.head[level],
            Some(id) => &self.node(id).next[level],
        }
    }

    fn next(&self, at: Option<NodeId>, level: usize) -> Option<NodeId> {
        decode_link(self.link(at, level).load(Ordering::Acquire))
    }

    fn height(&self) -> usize {
        self.height.load(Ordering::Relaxed)
    }

    /// Descends from the top level, moving right while `advance` holds for
    /// the successor's key. Fills `prev` with the last node visited per level
    /// and returns the level 0 successor of the final position.
    fn descend(
        &self,
        advance: impl Fn(&K) -> bool,
        mut prev: Option<&mut [Option<NodeId>; MAX_HEIGHT]>,
    ) -> Option<NodeId> {
        let mut x = None;
        let mut level = self.height();
        loop {
            level -= 1;
            let mut next = self.next(x, level);
            while let Some(id) = next {
                if !advance(&self.node(id).key) {
                    break;
                }
                x = Some(id);
                next = self.next(x, level);
            }
            if let Some(prev) = prev.as_deref_mut() {
                prev[level] = x;
            }
            if level == 0 {
                return next;
            }
        }
    }

    fn lower_bound(&self, key: &K) -> Option<NodeId> {
        self.descend(|k| self.cmp.compare(k, key) == CmpOrdering::Less, None)
    }

    fn upper_bound(&self, key: &K) -> Option<NodeId> {
        self.descend(|k| self.cmp.compare(k, key) != CmpOrdering::Greater, None)
    }
}

/// Read-only handle. Cheap to clone and safe to share across threads.
pub struct SkipListReader<K, C = NaturalOrder> {
    inner: Arc<Inner<K, C>>,
}

impl<K, C> Clone for SkipListReader<K, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, C: Comparator<K>> SkipListReader<K, C> {
    /// First entry that does not compare less than `key`.
    pub fn lower_bound(&self, key: &K) -> Cursor<'_, K, C> {
        self.cursor(self.inner.lower_bound(key))
    }

    /// First entry that compares greater than `key`.
    pub fn upper_bound(&self, key: &K) -> Cursor<'_, K, C> {
        self.cursor(self.inner.upper_bound(key))
    }

    /// Entry equivalent to `key`, or the end cursor.
    pub fn find(&self, key: &K) -> Cursor<'_, K, C> {
        match self.inner.lower_bound(key) {
            Some(id) if self.inner.cmp.compare(key, &self.inner.node(id).key) == CmpOrdering::Equal => {
                self.cursor(Some(id))
            }
            _ => self.end(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        !self.find(key).is_end()
    }

    pub fn begin(&self) -> Cursor<'_, K, C> {
        self.cursor(self.inner.next(None, 0))
    }

    pub fn end(&self) -> Cursor<'_, K, C> {
        self.cursor(None)
    }

    /// Iterates every key in order.
    pub fn iter(&self) -> Cursor<'_, K, C> {
        self.begin()
    }

    /// Key stored at `id`.
    pub fn key(&self, id: NodeId) -> &K {
        &self.inner.node(id).key
    }

    /// Number of levels `id` participates in.
    pub fn node_height(&self, id: NodeId) -> usize {
        self.inner.node(id).height()
    }

    /// Number of distinct keys linked into the list. A reader that loads
    /// this before walking the list sees at least that many keys.
    pub fn len(&self) -> usize {
        self.inner.linked.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.next(None, 0).is_none()
    }

    /// Levels currently in use, between 1 and [`MAX_HEIGHT`].
    pub fn height(&self) -> usize {
        self.inner.height()
    }

    pub fn comparator(&self) -> &C {
        &self.inner.cmp
    }

    fn cursor(&self, node: Option<NodeId>) -> Cursor<'_, K, C> {
        Cursor {
            list: &self.inner,
            node,
        }
    }
}

impl<K: fmt::Debug, C: Comparator<K>> fmt::Debug for SkipListReader<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// The single insertion handle.
///
/// Dereferences to a [`SkipListReader`] so the owner can look up as well.
pub struct SkipListWriter<K, C = NaturalOrder> {
    reader: SkipListReader<K, C>,
    rng: StdRng,
}

impl<K, C: Comparator<K>> SkipListWriter<K, C> {
    pub fn new(cmp: C) -> Self {
        Self::with_rng(cmp, StdRng::from_entropy())
    }

    /// Deterministic level generation, for tests and benchmarks.
    pub fn with_seed(cmp: C, seed: u64) -> Self {
        Self::with_rng(cmp, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cmp: C, rng: StdRng) -> Self {
        let inner = Inner {
            head: std::array::from_fn(|_| AtomicU32::new(NIL)),
            height: AtomicUsize::new(1),
            linked: AtomicUsize::new(0),
            nodes: NodeArena::new(),
            cmp,
        };
        Self {
            reader: SkipListReader {
                inner: Arc::new(inner),
            },
            rng,
        }
    }

    /// A new read handle onto the same list.
    pub fn reader(&self) -> SkipListReader<K, C> {
        self.reader.clone()
    }

    /// Inserts `key` unless an equivalent key is present. Returns the node
    /// holding `key` or its existing equivalent.
    pub fn insert(&mut self, key: K) -> NodeId {
        let inner = &*self.reader.inner;

        let mut prev = [None; MAX_HEIGHT];
        let successor = inner.descend(
            |k| inner.cmp.compare(k, &key) == CmpOrdering::Less,
            Some(&mut prev),
        );
        if let Some(id) = successor {
            if inner.cmp.compare(&key, &inner.node(id).key) == CmpOrdering::Equal {
                return id;
            }
        }

        let height = random_height(&mut self.rng);
        let current = inner.height();
        if height > current {
            // Levels above `current` are empty, so their predecessor is the
            // head, which `prev` already holds.
            trace!(from = current, to = height, "skiplist height raised");
            inner.height.store(height, Ordering::Relaxed);
        }

        let node = Node {
            key,
            next: (0..height).map(|_| AtomicU32::new(NIL)).collect(),
        };
        let id = NodeId(inner.nodes.push(node));
        let links = &inner.node(id).next;

        for (level, link) in links.iter().enumerate() {
            let pred = inner.link(prev[level], level);
            // Unreachable until the release store below.
            link.store(pred.load(Ordering::Relaxed), Ordering::Relaxed);
            pred.store(id.0, Ordering::Release);
        }
        inner.linked.fetch_add(1, Ordering::Release);

        id
    }
}

/// Geometric height: each extra level with probability 1/4, capped at
/// [`MAX_HEIGHT`].
fn random_height(rng: &mut impl Rng) -> usize {
    let mut height = 1;
    while height < MAX_HEIGHT && rng.gen_range(0..BRANCHING) == 0 {
        height += 1;
    }
    height
}

impl<K, C: Comparator<K> + Default> Default for SkipListWriter<K, C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<K, C> Deref for SkipListWriter<K, C> {
    type Target = SkipListReader<K, C>;

    fn deref(&self) -> &Self::Target {
        &self.reader
    }
}

/// A position in the list, or the end.
///
/// Cursors are plain copies of a node handle: advancing one never affects
/// another. As an `Iterator` a cursor yields the key at its position and
/// then moves to the successor.
pub struct Cursor<'a, K, C> {
    list: &'a Inner<K, C>,
    node: Option<NodeId>,
}

impl<'a, K, C: Comparator<K>> Cursor<'a, K, C> {
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn key(&self) -> Option<&'a K> {
        let list = self.list;
        self.node.map(|id| &list.node(id).key)
    }

    /// Moves to the next key. No-op at the end.
    pub fn advance(&mut self) {
        if let Some(id) = self.node {
            self.node = self.list.next(Some(id), 0);
        }
    }
}

impl<K, C> Clone for Cursor<'_, K, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, C> Copy for Cursor<'_, K, C> {}

impl<K, C> PartialEq for Cursor<'_, K, C> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.list, other.list) && self.node == other.node
    }
}

impl<K, C> Eq for Cursor<'_, K, C> {}

impl<K, C> fmt::Debug for Cursor<'_, K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("node", &self.node).finish()
    }
}

impl<'a, K, C: Comparator<K>> Iterator for Cursor<'a, K, C> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.key()?;
        self.advance();
        Some(key)
    }
}
