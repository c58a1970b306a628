// Ready queue for kestrel
//
// A singly linked FIFO whose nodes live in a slot map. Every node also holds
// an arena reservation for its footprint, so queue capacity is bounded by the
// physical arena just like every other kernel allocation.
use alloc::vec::Vec;
use core::mem;

use crate::fault::KernelFault;
use crate::memory::{AllocError, BlockAllocator};
use crate::process::pcb::{ProcessEntry, ProcessId};

type NodeId = usize;

struct Node {
    entry: ProcessEntry,
    next: Option<NodeId>,
    location: u64,
}

/// Arena bytes charged for one queue node.
pub const NODE_FOOTPRINT: u64 = mem::size_of::<Node>() as u64;

/// Arena space set aside for a node before the entry exists.
///
/// Either push it with `push_reserved` or hand it back with `cancel`.
#[must_use]
#[derive(Debug)]
pub struct NodeReservation {
    location: u64,
}

impl NodeReservation {
    pub fn cancel(self, arena: &mut BlockAllocator) -> Result<(), KernelFault> {
        arena
            .release(self.location)
            .map_err(|_| KernelFault::ArenaCorrupted)
    }
}

#[derive(Default)]
pub struct ProcessQueue {
    nodes: Vec<Option<Node>>,
    vacant: Vec<NodeId>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl ProcessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn reserve_node(arena: &mut BlockAllocator) -> Result<NodeReservation, AllocError> {
        let location = arena.allocate(NODE_FOOTPRINT)?;
        Ok(NodeReservation { location })
    }

    /// Appends `entry` using arena space reserved earlier.
    pub fn push_reserved(&mut self, reservation: NodeReservation, entry: ProcessEntry) {
        let node = Node {
            entry,
            next: None,
            location: reservation.location,
        };
        let id = match self.vacant.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Appends `entry`; running out of arena space for the node is fatal.
    pub fn push_back(
        &mut self,
        arena: &mut BlockAllocator,
        entry: ProcessEntry,
    ) -> Result<(), KernelFault> {
        let reservation =
            Self::reserve_node(arena).map_err(|_| KernelFault::QueueNodeExhausted)?;
        self.push_reserved(reservation, entry);
        Ok(())
    }

    pub fn peek_front(&self) -> Result<&ProcessEntry, KernelFault> {
        let head = self.head.ok_or(KernelFault::QueueEmpty)?;
        Ok(&self.node(head).entry)
    }

    pub fn front_mut(&mut self) -> Result<&mut ProcessEntry, KernelFault> {
        let head = self.head.ok_or(KernelFault::QueueEmpty)?;
        Ok(&mut self.node_mut(head).entry)
    }

    pub fn back_mut(&mut self) -> Result<&mut ProcessEntry, KernelFault> {
        let tail = self.tail.ok_or(KernelFault::QueueEmpty)?;
        Ok(&mut self.node_mut(tail).entry)
    }

    /// Unlinks the head and returns its entry, releasing the node's arena space.
    pub fn pop_front(&mut self, arena: &mut BlockAllocator) -> Result<ProcessEntry, KernelFault> {
        let head = self.head.ok_or(KernelFault::QueueEmpty)?;
        let node = match self.nodes[head].take() {
            Some(node) => node,
            None => return Err(KernelFault::QueueEmpty),
        };
        self.vacant.push(head);

        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;

        arena
            .release(node.location)
            .map_err(|_| KernelFault::ArenaCorrupted)?;
        Ok(node.entry)
    }

    /// Entries from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessEntry> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let node = self.node(cursor?);
            cursor = node.next;
            Some(&node.entry)
        })
    }

    pub fn find(&self, pid: ProcessId) -> Option<&ProcessEntry> {
        self.iter().find(|entry| entry.pid == pid)
    }

    pub fn find_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessEntry> {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            if self.node(id).entry.pid == pid {
                return Some(&mut self.node_mut(id).entry);
            }
            cursor = self.node(id).next;
        }
        None
    }

    /// Whether `address` is an arena block the queue holds for a process:
    /// its node, its image or its context record.
    pub fn owns_block(&self, address: u64) -> bool {
        self.nodes.iter().flatten().any(|node| {
            node.location == address
                || node.entry.memory_location == address
                || node.entry.context_location == address
        })
    }

    fn node(&self, id: NodeId) -> &Node {
        match &self.nodes[id] {
            Some(node) => node,
            None => unreachable!("dangling queue node {}", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.nodes[id] {
            Some(node) => node,
            None => unreachable!("dangling queue node {}", id),
        }
    }
}
