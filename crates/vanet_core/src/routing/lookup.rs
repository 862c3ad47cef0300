//! Recyclable per-search node state for the router.
//!
//! A [`LookupTable`] is a dense array indexed by node id. Instead of clearing
//! it between searches, every slot is stamped with the generation of the
//! search that wrote it; a slot carrying any other generation reads as
//! unvisited. Tables are kept in a LIFO [`LookupTablePool`] shared by all
//! routing callers.

use std::sync::{Mutex, MutexGuard};

use crate::map::{NodeId, StreetId};

/// Per-node search state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeState {
    pub cost: f64,
    pub predecessor: Option<NodeId>,
    /// Street used to reach this node and whether it was traversed start → end.
    pub via: Option<(StreetId, bool)>,
    pub closed: bool,
}

impl NodeState {
    pub fn open(cost: f64, predecessor: Option<NodeId>, via: Option<(StreetId, bool)>) -> Self {
        Self {
            cost,
            predecessor,
            via,
            closed: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    state: NodeState,
}

const EMPTY_SLOT: Slot = Slot {
    generation: 0,
    state: NodeState {
        cost: f64::INFINITY,
        predecessor: None,
        via: None,
        closed: false,
    },
};

#[derive(Debug)]
pub struct LookupTable {
    slots: Vec<Slot>,
}

impl LookupTable {
    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            slots: vec![EMPTY_SLOT; nodes],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Grows the table to hold `nodes` entries, keeping existing slots.
    pub fn ensure_capacity(&mut self, nodes: usize) {
        if nodes > self.slots.len() {
            self.slots.resize(nodes, EMPTY_SLOT);
        }
    }

    fn reset(&mut self) {
        self.slots.fill(EMPTY_SLOT);
    }

    /// State written for `node` by the search holding `generation`.
    pub fn get(&self, node: NodeId, generation: u32) -> Option<&NodeState> {
        self.slots
            .get(node as usize)
            .filter(|slot| slot.generation == generation)
            .map(|slot| &slot.state)
    }

    pub fn set(&mut self, node: NodeId, generation: u32, state: NodeState) {
        if let Some(slot) = self.slots.get_mut(node as usize) {
            *slot = Slot { generation, state };
        }
    }

    pub fn close(&mut self, node: NodeId, generation: u32) {
        if let Some(slot) = self.slots.get_mut(node as usize) {
            if slot.generation == generation {
                slot.state.closed = true;
            }
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    free: Vec<(LookupTable, u32)>,
    /// Minimum table size handed out.
    node_capacity: usize,
    /// Bumped on [`LookupTablePool::clear`]; tables from older epochs are dropped on release.
    epoch: u64,
    created: usize,
}

/// Thread-safe LIFO pool of lookup tables.
#[derive(Debug)]
pub struct LookupTablePool {
    inner: Mutex<PoolInner>,
}

/// A table checked out of the pool, returned on drop.
pub struct PooledTable<'a> {
    pool: &'a LookupTablePool,
    table: Option<LookupTable>,
    generation: u32,
    epoch: u64,
}

impl LookupTablePool {
    pub fn new(node_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                node_capacity,
                epoch: 0,
                created: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes the most recently released table (or a new one) and bumps its generation.
    pub fn acquire(&self) -> (LookupTable, u32) {
        let (table, generation, _) = self.acquire_with_epoch();
        (table, generation)
    }

    fn acquire_with_epoch(&self) -> (LookupTable, u32, u64) {
        let mut inner = self.lock();
        let capacity = inner.node_capacity;
        let epoch = inner.epoch;
        match inner.free.pop() {
            Some((mut table, previous)) => {
                drop(inner);
                table.ensure_capacity(capacity);
                let generation = match previous.checked_add(1) {
                    Some(next) => next,
                    None => {
                        table.reset();
                        1
                    }
                };
                (table, generation, epoch)
            }
            None => {
                inner.created += 1;
                drop(inner);
                (LookupTable::with_capacity(capacity), 1, epoch)
            }
        }
    }

    /// Returns a table to the pool together with the generation it was used with.
    pub fn release(&self, table: LookupTable, generation: u32) {
        let mut inner = self.lock();
        let epoch = inner.epoch;
        Self::push(&mut inner, table, generation, epoch);
    }

    fn push(inner: &mut PoolInner, table: LookupTable, generation: u32, epoch: u64) {
        if epoch == inner.epoch {
            inner.free.push((table, generation));
        }
    }

    /// RAII variant of [`acquire`](Self::acquire).
    pub fn checkout(&self) -> PooledTable<'_> {
        let (table, generation, epoch) = self.acquire_with_epoch();
        PooledTable {
            pool: self,
            table: Some(table),
            generation,
            epoch,
        }
    }

    /// Makes sure tables handed out from now on can index `nodes` node ids.
    pub fn ensure_capacity(&self, nodes: usize) {
        let mut inner = self.lock();
        if nodes > inner.node_capacity {
            inner.node_capacity = nodes;
        }
    }

    /// Drops every pooled table. Tables currently checked out are discarded on release.
    pub fn clear(&self, node_capacity: usize) {
        let mut inner = self.lock();
        inner.free.clear();
        inner.epoch += 1;
        inner.node_capacity = node_capacity;
    }

    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    /// Number of tables allocated over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.lock().created
    }

    pub fn node_capacity(&self) -> usize {
        self.lock().node_capacity
    }
}

impl PooledTable<'_> {
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn get(&self, node: NodeId) -> Option<&NodeState> {
        self.table.as_ref()?.get(node, self.generation)
    }

    pub fn set(&mut self, node: NodeId, state: NodeState) {
        if let Some(table) = self.table.as_mut() {
            table.set(node, self.generation, state);
        }
    }

    pub fn close(&mut self, node: NodeId) {
        if let Some(table) = self.table.as_mut() {
            table.close(node, self.generation);
        }
    }
}

impl Drop for PooledTable<'_> {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            let mut inner = self.pool.lock();
            LookupTablePool::push(&mut inner, table, self.generation, self.epoch);
        }
    }
}
