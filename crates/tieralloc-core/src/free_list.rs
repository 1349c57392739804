//! Intrusive free lists.
//!
//! A free block stores the link to the next free block in its own first word;
//! no side table is kept. While a block is handed out the same bytes belong to
//! the caller, so a region is either live data or a link, never both.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use crate::size_class::ALIGN;

/// Overlay for the leading bytes of a block.
#[repr(C)]
pub(crate) union FreeBlock {
    /// Valid while the block sits on a free list.
    link: Option<NonNull<FreeBlock>>,
    /// Valid while the block is owned by a caller.
    #[allow(dead_code)]
    client_data: [u8; ALIGN],
}

const _: () = assert!(std::mem::size_of::<FreeBlock>() <= ALIGN);
const _: () = assert!(std::mem::align_of::<FreeBlock>() <= ALIGN);

/// Singly linked stack of same-size free blocks.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<NonNull<FreeBlock>>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Pushes a block onto the list, overwriting its first word.
    ///
    /// # Safety
    ///
    /// `block` must be at least [`ALIGN`] bytes, `ALIGN`-aligned, not on any
    /// free list, and not used by anyone else until popped.
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        let node = block.cast::<FreeBlock>();
        // SAFETY: caller guarantees the block is writable, aligned and large
        // enough for the link overlay.
        unsafe { node.as_ptr().write(FreeBlock { link: self.head }) };
        self.head = Some(node);
        self.len += 1;
    }

    /// Pops the head block. Its first word is garbage from the caller's view.
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.head?;
        // SAFETY: every node on the list was written by `push`, so `link` is
        // the active field.
        self.head = unsafe { (*node.as_ptr()).link };
        self.len -= 1;
        Some(node.cast())
    }

    /// Splits `count` contiguous blocks of `block_size` bytes starting at
    /// `start` and pushes them so that `start` ends up at the head.
    ///
    /// # Safety
    ///
    /// `[start, start + count * block_size)` must be uncommitted memory owned
    /// by the caller, with `start` and `block_size` multiples of [`ALIGN`].
    pub(crate) unsafe fn thread(&mut self, start: NonNull<u8>, block_size: usize, count: usize) {
        for i in (0..count).rev() {
            // SAFETY: offset stays inside the caller-provided range.
            let block = unsafe { NonNull::new_unchecked(start.as_ptr().add(i * block_size)) };
            // SAFETY: distinct, aligned, in-range blocks per the contract.
            unsafe { self.push(block) };
        }
    }

    pub(crate) fn iter(&self) -> FreeListIter<'_> {
        FreeListIter {
            next: self.head,
            _list: self,
        }
    }
}

pub(crate) struct FreeListIter<'a> {
    next: Option<NonNull<FreeBlock>>,
    _list: &'a FreeList,
}

impl Iterator for FreeListIter<'_> {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        // SAFETY: the borrowed list cannot be mutated while iterating, and
        // every node holds an initialized link.
        self.next = unsafe { (*node.as_ptr()).link };
        Some(node.cast())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Slab([u8; 64]);

    fn slab_ptr(slab: &mut Slab) -> NonNull<u8> {
        NonNull::new(slab.0.as_mut_ptr()).unwrap()
    }

    #[test]
    fn test_push_pop_is_lifo() {
        let mut slab = Slab([0; 64]);
        let base = slab_ptr(&mut slab);
        let a = base;
        let b = unsafe { NonNull::new_unchecked(base.as_ptr().add(16)) };

        let mut list = FreeList::new();
        assert!(list.is_empty());
        unsafe {
            list.push(a);
            list.push(b);
        }
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop(), Some(b));
        assert_eq!(list.pop(), Some(a));
        assert_eq!(list.pop(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_thread_keeps_address_order() {
        let mut slab = Slab([0; 64]);
        let base = slab_ptr(&mut slab);
        let mut list = FreeList::new();
        unsafe { list.thread(base, 16, 4) };

        let addrs: Vec<usize> = list.iter().map(|p| p.as_ptr() as usize).collect();
        let start = base.as_ptr() as usize;
        assert_eq!(addrs, vec![start, start + 16, start + 32, start + 48]);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_thread_onto_non_empty_list_appends_old_blocks() {
        let mut slab = Slab([0; 64]);
        let base = slab_ptr(&mut slab);
        let tail = unsafe { NonNull::new_unchecked(base.as_ptr().add(48)) };
        let mut list = FreeList::new();
        unsafe {
            list.push(tail);
            list.thread(base, 8, 2);
        }
        let addrs: Vec<NonNull<u8>> = list.iter().collect();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0], base);
        assert_eq!(addrs[2], tail);
    }
}
