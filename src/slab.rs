//! Fixed-capacity, cache-aligned, lock-free object pool.
//!
//! The pool carves one contiguous backing region into slots of
//! `⌈size_of::<T>() / 64⌉ · 64` bytes, so distinct slots never share a
//! cache line. Unused slots thread through a lock-free LIFO free list;
//! [`SlabPool::allocate`] pops in O(1) and the returned [`SlabBox`] pushes
//! its slot back when it goes out of scope, running the payload's
//! destructor in place. Ownership of the handle is what rules out
//! double-free.
//!
//! The backing region can be requested on huge pages; when the kernel
//! refuses, the pool falls back transparently to a cache-line-aligned heap
//! allocation. Failure of the heap allocation itself is fatal.
//!
//! The free-list head carries a version tag like the MPMC queue's links.
//! Plain allocate/deallocate traffic cannot ABA (a popped slot is only
//! relinked by its own handle), so the tag costs nothing on the fast path
//! and closes the window for mixed workloads.

use crossbeam_utils::CachePadded;
use std::alloc::{self, Layout, handle_alloc_error};
#[cfg(target_os = "linux")]
use std::io;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::event::CACHE_LINE_SIZE;

const NIL: u32 = u32::MAX;

#[cfg(target_os = "linux")]
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

#[inline(always)]
fn pack(index: u32, tag: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline(always)]
fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

enum Backing {
    HugePages { len: usize },
    Heap { layout: Layout },
}

/// Lock-free slab of cache-aligned `T` slots.
pub struct SlabPool<T> {
    base: NonNull<u8>,
    backing: Backing,
    slot_size: usize,
    capacity: usize,
    links: Box<[AtomicU32]>,
    free: CachePadded<AtomicU64>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for SlabPool<T> {}
unsafe impl<T: Send> Sync for SlabPool<T> {}

impl<T> SlabPool<T> {
    /// Builds a pool of `slots` slots on the heap.
    pub fn with_capacity(slots: usize) -> Self {
        Self::new(slots, false)
    }

    /// Builds a pool of `slots` slots, asking for huge-page backing first
    /// and falling back to the heap if the mapping is refused.
    pub fn with_capacity_huge(slots: usize) -> Self {
        Self::new(slots, true)
    }

    fn new(slots: usize, try_huge: bool) -> Self {
        assert!(slots > 0, "slab pool needs at least one slot");
        assert!(slots < NIL as usize, "slab pool exceeds the index space");

        // Slots are rounded up to whole cache lines; a stricter payload
        // alignment widens the unit so every slot stays aligned.
        let unit = align_of::<T>().max(CACHE_LINE_SIZE);
        let slot_size = size_of::<T>().max(1).div_ceil(unit) * unit;
        let bytes = slots * slot_size;

        let (base, backing) = match try_huge {
            true => match Self::map_huge(bytes) {
                Some((base, len)) => (base, Backing::HugePages { len }),
                None => Self::alloc_heap(bytes, unit),
            },
            false => Self::alloc_heap(bytes, unit),
        };

        let links: Vec<AtomicU32> = (0..slots)
            .map(|i| AtomicU32::new(if i + 1 < slots { (i + 1) as u32 } else { NIL }))
            .collect();

        Self {
            base,
            backing,
            slot_size,
            capacity: slots,
            links: links.into_boxed_slice(),
            free: CachePadded::new(AtomicU64::new(pack(0, 0))),
            _marker: PhantomData,
        }
    }

    #[cfg(target_os = "linux")]
    fn map_huge(bytes: usize) -> Option<(NonNull<u8>, usize)> {
        let len = bytes.div_ceil(HUGE_PAGE_SIZE) * HUGE_PAGE_SIZE;
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            tracing::warn!(
                error = %io::Error::last_os_error(),
                "huge-page mapping refused, slab pool falls back to the heap"
            );
            return None;
        }
        Some((NonNull::new(addr as *mut u8)?, len))
    }

    #[cfg(not(target_os = "linux"))]
    fn map_huge(_bytes: usize) -> Option<(NonNull<u8>, usize)> {
        tracing::debug!("huge pages unavailable on this platform, slab pool uses the heap");
        None
    }

    fn alloc_heap(bytes: usize, align: usize) -> (NonNull<u8>, Backing) {
        let layout = Layout::from_size_align(bytes, align).expect("slab layout");
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        (base, Backing::Heap { layout })
    }

    /// Takes a slot, moves `value` into it and returns the owning handle,
    /// or `None` when every slot is in use.
    pub fn allocate(&self, value: T) -> Option<SlabBox<'_, T>> {
        let index = self.pop_free()?;
        let ptr = self.slot_ptr(index);
        unsafe {
            ptr.as_ptr().write(value);
        }
        Some(SlabBox {
            pool: self,
            ptr,
            index,
        })
    }

    /// Returns a slot to the pool, dropping its payload.
    ///
    /// Spelled-out form of dropping the handle.
    pub fn deallocate(&self, handle: SlabBox<'_, T>) {
        drop(handle);
    }

    /// Free slots, counted by walking the free list. Approximate while
    /// other threads allocate or release.
    pub fn available(&self) -> usize {
        let (mut index, _) = unpack(self.free.load(Ordering::Acquire));
        let mut count = 0;
        while index != NIL && count < self.capacity {
            count += 1;
            index = self.links[index as usize].load(Ordering::Relaxed);
        }
        count
    }

    /// Total slot count.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the backing region landed on huge pages.
    #[inline(always)]
    pub fn using_huge_pages(&self) -> bool {
        matches!(self.backing, Backing::HugePages { .. })
    }

    /// Bytes per slot after cache-line rounding.
    #[inline(always)]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline(always)]
    fn slot_ptr(&self, index: u32) -> NonNull<T> {
        unsafe { self.base.add(index as usize * self.slot_size).cast::<T>() }
    }

    fn pop_free(&self) -> Option<u32> {
        loop {
            let word = self.free.load(Ordering::Acquire);
            let (index, tag) = unpack(word);
            if index == NIL {
                return None;
            }

            let next = self.links[index as usize].load(Ordering::Relaxed);
            if self
                .free
                .compare_exchange_weak(
                    word,
                    pack(next, tag.wrapping_add(1)),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Some(index);
            }
        }
    }

    fn push_free(&self, index: u32) {
        loop {
            let word = self.free.load(Ordering::Acquire);
            let (head, tag) = unpack(word);
            self.links[index as usize].store(head, Ordering::Relaxed);

            if self
                .free
                .compare_exchange_weak(
                    word,
                    pack(index, tag.wrapping_add(1)),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        }
    }
}

impl<T> Drop for SlabPool<T> {
    fn drop(&mut self) {
        match self.backing {
            #[cfg(target_os = "linux")]
            Backing::HugePages { len } => unsafe {
                libc::munmap(self.base.as_ptr().cast(), len);
            },
            #[cfg(not(target_os = "linux"))]
            Backing::HugePages { .. } => unreachable!("huge pages are never mapped off Linux"),
            Backing::Heap { layout } => unsafe {
                alloc::dealloc(self.base.as_ptr(), layout);
            },
        }
    }
}

/// Exclusive handle to one pool slot.
///
/// Dropping the handle destroys the payload and releases the slot.
pub struct SlabBox<'a, T> {
    pool: &'a SlabPool<T>,
    ptr: NonNull<T>,
    index: u32,
}

unsafe impl<T: Send> Send for SlabBox<'_, T> {}

impl<T> SlabBox<'_, T> {
    /// Index of the slot backing this handle.
    pub fn slot_index(&self) -> usize {
        self.index as usize
    }
}

impl<T> Deref for SlabBox<'_, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for SlabBox<'_, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for SlabBox<'_, T> {
    fn drop(&mut self) {
        unsafe {
            self.ptr.as_ptr().drop_in_place();
        }
        self.pool.push_free(self.index);
    }
}
