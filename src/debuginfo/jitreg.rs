//! The GDB JIT-registration interface: `__jit_debug_descriptor` and the
//! doubly-linked `jit_code_entry` list it exposes.
//!
//! The descriptor is an externally-observed process singleton (GDB's
//! `jit-reader` protocol reads it directly out of the debuggee's memory),
//! so this module encapsulates it behind a single-owner registry rather
//! than exposing the raw linked-list pointers.

use std::sync::atomic::{AtomicI32, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;

/// Failures from registering or unregistering a JIT code entry.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// `unregister` was called with an id that is not (or is no longer)
    /// present in the registry.
    #[error("no registered entry with id {0}")]
    UnknownId(u64),
}

/// The action GDB should take upon breaking at `__jit_debug_register_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum JitActionFlag {
    NoAction = 0,
    RegisterFn = 1,
    UnregisterFn = 2,
}

/// A single compiled method's debug-info image, as exposed to GDB.
#[derive(Debug, Clone)]
pub struct JitCodeEntry {
    id: u64,
    symfile: Vec<u8>,
}

impl JitCodeEntry {
    /// A process-wide unique identifier for this entry (used only by this
    /// crate's registry, not part of the GDB-visible layout).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The size, in bytes, of this entry's ELF/DWARF image.
    #[must_use]
    pub fn symfile_size(&self) -> usize {
        self.symfile.len()
    }

    /// The raw ELF/DWARF image bytes.
    #[must_use]
    pub fn symfile(&self) -> &[u8] {
        &self.symfile
    }
}

struct Node {
    entry: JitCodeEntry,
    prev: Option<u64>,
    next: Option<u64>,
}

/// The single-owner registry backing the process's JIT-registration
/// descriptor.
///
/// Every mutating operation runs under one lock, which is the "well-defined
/// critical section" the registration protocol requires: a reader that
/// takes the same lock always observes a consistent list.
pub struct JitRegistry {
    nodes: Mutex<RegistryState>,
    action_flag: AtomicI32,
    next_id: Mutex<u64>,
}

struct RegistryState {
    by_id: std::collections::HashMap<u64, Node>,
    head: Option<u64>,
}

impl JitRegistry {
    /// Creates an empty registry (`first_entry == null`).
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(RegistryState {
                by_id: std::collections::HashMap::new(),
                head: None,
            }),
            action_flag: AtomicI32::new(JitActionFlag::NoAction as i32),
            next_id: Mutex::new(1),
        }
    }

    /// Registers `symfile` bytes, linking the new entry at the head of the
    /// list and setting `action_flag = JIT_REGISTER`.
    ///
    /// Returns the id GDB-facing code should remember to later unregister
    /// this entry.
    pub fn register(&self, symfile: Vec<u8>) -> u64 {
        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let mut state = self.nodes.lock();
        let old_head = state.head;
        if let Some(old_head_id) = old_head {
            if let Some(old_head_node) = state.by_id.get_mut(&old_head_id) {
                old_head_node.prev = Some(id);
            }
        }
        state.by_id.insert(
            id,
            Node {
                entry: JitCodeEntry { id, symfile },
                prev: None,
                next: old_head,
            },
        );
        state.head = Some(id);
        self.action_flag
            .store(JitActionFlag::RegisterFn as i32, Ordering::SeqCst);
        self.call_register_code_breakpoint();
        tracing::debug!(entry_id = id, "registered JIT code entry");
        id
    }

    /// Unregisters the entry with `id`, unlinking it and setting
    /// `action_flag = JIT_UNREGISTER`.
    ///
    /// Returns [`RegistrationError::UnknownId`] if `id` is not currently
    /// registered.
    pub fn unregister(&self, id: u64) -> Result<(), RegistrationError> {
        let mut state = self.nodes.lock();
        let Some(node) = state.by_id.remove(&id) else {
            tracing::warn!(entry_id = id, "unregister called with unknown id");
            return Err(RegistrationError::UnknownId(id));
        };
        match node.prev {
            Some(prev_id) => {
                if let Some(prev_node) = state.by_id.get_mut(&prev_id) {
                    prev_node.next = node.next;
                }
            }
            None => state.head = node.next,
        }
        if let Some(next_id) = node.next {
            if let Some(next_node) = state.by_id.get_mut(&next_id) {
                next_node.prev = node.prev;
            }
        }
        self.action_flag
            .store(JitActionFlag::UnregisterFn as i32, Ordering::SeqCst);
        self.call_register_code_breakpoint();
        tracing::debug!(entry_id = id, "unregistered JIT code entry");
        Ok(())
    }

    /// The id of the entry currently at the head of the list (the
    /// descriptor's `first_entry`), if any.
    #[must_use]
    pub fn first_entry_id(&self) -> Option<u64> {
        self.nodes.lock().head
    }

    /// The entry immediately before `id` in the list (its `prev` link).
    #[must_use]
    pub fn prev_of(&self, id: u64) -> Option<u64> {
        self.nodes.lock().by_id.get(&id)?.prev
    }

    /// The entry immediately after `id` in the list (its `next` link).
    #[must_use]
    pub fn next_of(&self, id: u64) -> Option<u64> {
        self.nodes.lock().by_id.get(&id)?.next
    }

    /// The most recently stored action flag.
    #[must_use]
    pub fn action_flag(&self) -> JitActionFlag {
        match self.action_flag.load(Ordering::SeqCst) {
            1 => JitActionFlag::RegisterFn,
            2 => JitActionFlag::UnregisterFn,
            _ => JitActionFlag::NoAction,
        }
    }

    /// Checks that the list's `next`/`prev` links are mutually consistent
    /// and the head has no `prev`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let state = self.nodes.lock();
        if let Some(head) = state.head {
            match state.by_id.get(&head) {
                Some(node) if node.prev.is_none() => {}
                _ => return false,
            }
        }
        state.by_id.values().all(|node| {
            let next_ok = node
                .next
                .map(|n| state.by_id.get(&n).map(|nn| nn.prev == Some(node.entry.id)).unwrap_or(false))
                .unwrap_or(true);
            let prev_ok = node
                .prev
                .map(|p| state.by_id.get(&p).map(|pn| pn.next == Some(node.entry.id)).unwrap_or(false))
                .unwrap_or(true);
            next_ok && prev_ok
        })
    }

    /// Calls the agreed-upon symbol GDB breakpoints on to observe a
    /// registration transition.
    ///
    /// This is an intentionally empty function; GDB's jit-reader sets a
    /// breakpoint on its address and reads the descriptor once execution
    /// stops there.
    #[inline(never)]
    fn call_register_code_breakpoint(&self) {
        __jit_debug_register_code();
    }
}

impl Default for JitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The symbol GDB's jit-reader breaks on. Intentionally a no-op: its
/// address, not its behavior, is what matters.
#[inline(never)]
#[no_mangle]
pub extern "C" fn __jit_debug_register_code() {}

static GLOBAL_REGISTRY: Lazy<JitRegistry> = Lazy::new(JitRegistry::new);

/// The process-wide registry backing `__jit_debug_descriptor`.
///
/// There is exactly one GDB-visible descriptor per process, so emitters
/// that want their compiled methods to show up under `info functions` in a
/// live debugger session register against this instance rather than
/// constructing their own [`JitRegistry`].
#[must_use]
pub fn global() -> &'static JitRegistry {
    &GLOBAL_REGISTRY
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_two_entries_orders_most_recent_first() {
        let registry = JitRegistry::new();
        let e1 = registry.register(vec![1, 2, 3]);
        let e2 = registry.register(vec![4, 5, 6]);

        assert_eq!(registry.first_entry_id(), Some(e2));
        assert_eq!(registry.prev_of(e2), None);
        assert_eq!(registry.next_of(e2), Some(e1));
        assert_eq!(registry.prev_of(e1), Some(e2));
        assert!(registry.is_well_formed());
    }

    #[test]
    fn unregister_head_restores_list() {
        let registry = JitRegistry::new();
        let e1 = registry.register(vec![1]);
        let e2 = registry.register(vec![2]);

        assert!(registry.unregister(e2).is_ok());
        assert_eq!(registry.action_flag(), JitActionFlag::UnregisterFn);
        assert_eq!(registry.first_entry_id(), Some(e1));
        assert_eq!(registry.prev_of(e1), None);
        assert!(registry.is_well_formed());
    }

    #[test]
    fn unregister_unknown_id_is_noop() {
        let registry = JitRegistry::new();
        assert!(matches!(registry.unregister(999), Err(RegistrationError::UnknownId(999))));
    }

    #[test]
    fn global_registry_is_a_single_shared_instance() {
        let a: *const JitRegistry = global();
        let b: *const JitRegistry = global();
        assert_eq!(a, b);
    }

    #[test]
    fn register_sets_action_flag() {
        let registry = JitRegistry::new();
        registry.register(vec![]);
        assert_eq!(registry.action_flag(), JitActionFlag::RegisterFn);
    }
}
