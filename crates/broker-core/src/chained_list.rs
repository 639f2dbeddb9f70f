//! Shared-cursor state queue.
//!
//! Each lifecycle state owns one `ChainedList` of order ids. Its defining
//! feature is a single traversal cursor shared by every caller of
//! [`ChainedList::get_next`]: concurrent sweepers cooperatively partition the
//! queue instead of each seeing a snapshot. Traversal is weakly consistent;
//! ids added behind the cursor are only seen on the next pass.
//!
//! Nodes live in an arena of recycled slots and are addressed by index, with
//! an id-to-slot map making membership checks and unlinking O(1).

use std::collections::HashMap;
use std::sync::Mutex;

/// One arena slot: an order id plus its neighbors' slot indices.
#[derive(Debug)]
struct Node {
	id: String,
	prev: Option<usize>,
	next: Option<usize>,
}

/// Position of the shared traversal cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
	/// Before the first node; the next `get_next` yields the head.
	AtHead,
	/// The node at this slot is yielded next.
	At(usize),
	/// Ran past the tail; yields nothing until a reset or an append.
	OffEnd,
}

#[derive(Debug)]
struct Inner {
	slots: Vec<Option<Node>>,
	free: Vec<usize>,
	index: HashMap<String, usize>,
	head: Option<usize>,
	tail: Option<usize>,
	cursor: Cursor,
}

impl Inner {
	fn alloc(&mut self, node: Node) -> usize {
		match self.free.pop() {
			Some(slot) => {
				self.slots[slot] = Some(node);
				slot
			},
			None => {
				self.slots.push(Some(node));
				self.slots.len() - 1
			},
		}
	}
}

/// A doubly linked queue of order ids with one shared sweep cursor.
pub struct ChainedList {
	inner: Mutex<Inner>,
}

impl ChainedList {
	/// Creates an empty list with the cursor at the head.
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				slots: Vec::new(),
				free: Vec::new(),
				index: HashMap::new(),
				head: None,
				tail: None,
				cursor: Cursor::AtHead,
			}),
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
		// A poisoned queue mutex means a panic mid-update; the closures
		// touching Inner cannot panic, so recover the guard.
		match self.inner.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	/// Appends an id at the tail. Returns false if the id is already present.
	///
	/// If the cursor has run off the end it is fixed to the new node, so a
	/// sweeper that exhausted the queue picks up the late arrival without a
	/// reset.
	pub fn add_item(&self, id: &str) -> bool {
		let mut inner = self.lock();
		if inner.index.contains_key(id) {
			return false;
		}

		let old_tail = inner.tail;
		let slot = inner.alloc(Node {
			id: id.to_string(),
			prev: old_tail,
			next: None,
		});

		match old_tail {
			Some(tail_slot) => {
				if let Some(node) = inner.slots[tail_slot].as_mut() {
					node.next = Some(slot);
				}
			},
			None => inner.head = Some(slot),
		}
		inner.tail = Some(slot);
		inner.index.insert(id.to_string(), slot);

		if inner.cursor == Cursor::OffEnd {
			inner.cursor = Cursor::At(slot);
		}

		true
	}

	/// Unlinks an id in O(1). Returns false if the id is not present.
	///
	/// If the removed node is the one the cursor would yield next, the
	/// cursor moves to its former next neighbor.
	pub fn remove_item(&self, id: &str) -> bool {
		let mut inner = self.lock();
		let Some(slot) = inner.index.remove(id) else {
			return false;
		};

		let Some(node) = inner.slots[slot].take() else {
			return false;
		};

		match node.prev {
			Some(prev_slot) => {
				if let Some(prev) = inner.slots[prev_slot].as_mut() {
					prev.next = node.next;
				}
			},
			None => inner.head = node.next,
		}
		match node.next {
			Some(next_slot) => {
				if let Some(next) = inner.slots[next_slot].as_mut() {
					next.prev = node.prev;
				}
			},
			None => inner.tail = node.prev,
		}

		if inner.cursor == Cursor::At(slot) {
			inner.cursor = match node.next {
				Some(next_slot) => Cursor::At(next_slot),
				None => Cursor::OffEnd,
			};
		}

		inner.free.push(slot);
		true
	}

	/// Yields the id under the shared cursor and advances it.
	///
	/// Returns None once the cursor passes the tail; call
	/// [`ChainedList::reset_pointer`] to start a new pass.
	pub fn get_next(&self) -> Option<String> {
		let mut inner = self.lock();
		let current = match inner.cursor {
			Cursor::AtHead => inner.head?,
			Cursor::At(slot) => slot,
			Cursor::OffEnd => return None,
		};

		let (id, next) = {
			let node = inner.slots[current].as_ref()?;
			(node.id.clone(), node.next)
		};
		inner.cursor = match next {
			Some(next_slot) => Cursor::At(next_slot),
			None => Cursor::OffEnd,
		};
		Some(id)
	}

	/// Moves the shared cursor back to the head of the list.
	pub fn reset_pointer(&self) {
		self.lock().cursor = Cursor::AtHead;
	}

	/// Returns true if the id is currently in the list.
	pub fn contains(&self, id: &str) -> bool {
		self.lock().index.contains_key(id)
	}

	/// Number of ids in the list.
	pub fn len(&self) -> usize {
		self.lock().index.len()
	}

	/// Returns true if the list holds no ids.
	pub fn is_empty(&self) -> bool {
		self.lock().index.is_empty()
	}
}

impl Default for ChainedList {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn drain(list: &ChainedList) -> Vec<String> {
		let mut out = Vec::new();
		while let Some(id) = list.get_next() {
			out.push(id);
		}
		out
	}

	#[test]
	fn traversal_yields_insertion_order() {
		let list = ChainedList::new();
		assert!(list.is_empty());
		for id in ["a", "b", "c"] {
			assert!(list.add_item(id));
		}
		assert_eq!(list.len(), 3);
		assert_eq!(drain(&list), vec!["a", "b", "c"]);
		// Exhausted until reset
		assert_eq!(list.get_next(), None);
		list.reset_pointer();
		assert_eq!(drain(&list), vec!["a", "b", "c"]);
	}

	#[test]
	fn add_is_idempotent_by_id() {
		let list = ChainedList::new();
		assert!(list.add_item("a"));
		assert!(!list.add_item("a"));
		assert_eq!(list.len(), 1);
	}

	#[test]
	fn remove_head_middle_and_tail() {
		let list = ChainedList::new();
		for id in ["a", "b", "c", "d", "e"] {
			list.add_item(id);
		}
		assert!(list.remove_item("a"));
		assert!(list.remove_item("c"));
		assert!(list.remove_item("e"));
		assert!(!list.remove_item("e"));
		assert_eq!(drain(&list), vec!["b", "d"]);
		assert!(!list.contains("c"));
	}

	#[test]
	fn removing_node_under_cursor_moves_cursor_to_next() {
		let list = ChainedList::new();
		for id in ["a", "b", "c"] {
			list.add_item(id);
		}
		assert_eq!(list.get_next().as_deref(), Some("a"));
		// Cursor now points at "b"; removing it must skip to "c"
		assert!(list.remove_item("b"));
		assert_eq!(list.get_next().as_deref(), Some("c"));
		assert_eq!(list.get_next(), None);
	}

	#[test]
	fn removing_tail_under_cursor_runs_off_end() {
		let list = ChainedList::new();
		list.add_item("a");
		list.add_item("b");
		assert_eq!(list.get_next().as_deref(), Some("a"));
		assert!(list.remove_item("b"));
		assert_eq!(list.get_next(), None);
	}

	#[test]
	fn add_after_cursor_ran_off_end_is_visible() {
		let list = ChainedList::new();
		list.add_item("a");
		assert_eq!(list.get_next().as_deref(), Some("a"));
		assert_eq!(list.get_next(), None);
		// The cursor ran off the end; a late arrival re-arms it
		list.add_item("b");
		assert_eq!(list.get_next().as_deref(), Some("b"));
		assert_eq!(list.get_next(), None);
	}

	#[test]
	fn get_next_on_empty_list_then_add() {
		let list = ChainedList::new();
		assert_eq!(list.get_next(), None);
		list.add_item("a");
		assert_eq!(list.get_next().as_deref(), Some("a"));
	}

	#[test]
	fn slots_are_recycled() {
		let list = ChainedList::new();
		for round in 0..3 {
			for i in 0..10 {
				list.add_item(&format!("{}-{}", round, i));
			}
			for i in 0..10 {
				list.remove_item(&format!("{}-{}", round, i));
			}
		}
		assert!(list.is_empty());
		assert!(list.lock().slots.len() <= 10);
	}
}
