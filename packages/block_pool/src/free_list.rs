use crate::{Error, Result, SlotIndex, Tracking};

/// Single-owner free list of block indexes, used by the blocking pool behind its mutex.
///
/// Think of this as a stack of the most recently freed blocks, with the stack links stored in
/// a side table indexed by block. The table has one extra entry at the end, the sentinel, whose
/// index marks the end of the list and which links to itself.
#[derive(Debug)]
pub(crate) struct FreeList<I: SlotIndex> {
    /// Index of the first free block, or the sentinel if every block is allocated.
    head: I,

    /// `links[i]` is the index of the free block after `i`. Only meaningful for free blocks
    /// and the sentinel.
    links: Box<[I]>,

    /// `allocated[i]` is `true` while block `i` is held by a caller. Only maintained when
    /// tracking is enabled, in which case it has one entry per block; otherwise it is empty.
    allocated: Box<[bool]>,

    /// Number of blocks currently held by callers.
    allocated_count: usize,
}

impl<I: SlotIndex> FreeList<I> {
    /// Creates a free list in which every block is free, in ascending index order.
    ///
    /// # Panics
    ///
    /// Panics if the index type cannot represent `block_count`, which is the sentinel value.
    #[must_use]
    pub(crate) fn new(block_count: usize, tracking: Tracking) -> Self {
        assert!(
            block_count <= I::MAX,
            "index type {} cannot address {block_count} blocks plus the end of list marker",
            std::any::type_name::<I>()
        );

        // Block i links to block i + 1, the last block links to the sentinel
        // and the sentinel links to itself.
        let links = (0..block_count)
            .map(|index| I::from_usize(index.wrapping_add(1)))
            .chain(std::iter::once(I::from_usize(block_count)))
            .collect();

        let allocated = if tracking.is_enabled() {
            vec![false; block_count].into_boxed_slice()
        } else {
            Box::default()
        };

        Self {
            // Block 0, which is also the sentinel if there are no blocks.
            head: I::from_usize(0),
            links,
            allocated,
            allocated_count: 0,
        }
    }

    #[must_use]
    fn sentinel(&self) -> usize {
        // There is always at least the sentinel entry.
        self.links.len().wrapping_sub(1)
    }

    #[must_use]
    pub(crate) fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    #[must_use]
    fn link(&self, index: usize) -> usize {
        self.links
            .get(index)
            .expect("free list links only ever point to blocks or the sentinel")
            .to_usize()
    }

    fn set_link(&mut self, index: usize, next: usize) {
        *self
            .links
            .get_mut(index)
            .expect("free list links only ever point to blocks or the sentinel") =
            I::from_usize(next);
    }

    /// Takes the first free block off the list, returning its index,
    /// or `None` if every block is allocated.
    ///
    /// # Panics
    ///
    /// Panics if tracking is enabled and the block at the head of the list is marked as
    /// allocated, which means the free list is corrupted.
    pub(crate) fn pop(&mut self) -> Option<usize> {
        let index = self.head.to_usize();

        if index == self.sentinel() {
            return None;
        }

        self.head = I::from_usize(self.link(index));

        if let Some(allocated) = self.allocated.get_mut(index) {
            assert!(
                !*allocated,
                "block {index} is on the free list but already allocated - the free list is corrupted"
            );

            *allocated = true;
        }

        // Cannot overflow because at most block_count blocks can be allocated.
        self.allocated_count = self.allocated_count.wrapping_add(1);

        Some(index)
    }

    /// Puts the block with the given index at the head of the list.
    ///
    /// The caller guarantees that `index` is a valid block index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DoubleFree`] if tracking is enabled and the block is not allocated.
    /// The list is not modified in that case.
    pub(crate) fn push(&mut self, index: usize) -> Result<()> {
        debug_assert!(index < self.sentinel());

        if let Some(allocated) = self.allocated.get_mut(index) {
            if !*allocated {
                return Err(Error::DoubleFree { index });
            }

            *allocated = false;
        }

        let head = self.head.to_usize();
        self.set_link(index, head);
        self.head = I::from_usize(index);

        // Without tracking, a double free is undetectable and we cannot guard against
        // this going below zero, so we saturate instead of wrapping.
        self.allocated_count = self.allocated_count.saturating_sub(1);

        Ok(())
    }

    /// Verifies that the free list and the allocation state agree with each other.
    ///
    /// # Panics
    ///
    /// Panics if any block is lost, duplicated or unreachable, or if the list is cyclic.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        let sentinel = self.sentinel();
        let mut on_list = vec![false; sentinel];
        let mut free_count: usize = 0;
        let mut index = self.head.to_usize();

        while index != sentinel {
            let seen = on_list
                .get_mut(index)
                .unwrap_or_else(|| panic!("free list points to out of bounds block {index}"));

            assert!(!*seen, "free list is cyclic, block {index} seen twice");
            *seen = true;

            free_count = free_count.wrapping_add(1);
            index = self.link(index);
        }

        assert_eq!(
            self.link(sentinel),
            sentinel,
            "sentinel must link to itself"
        );

        assert_eq!(
            free_count.wrapping_add(self.allocated_count),
            sentinel,
            "free blocks {free_count} plus allocated blocks {} do not add up to {sentinel} blocks",
            self.allocated_count
        );

        for (index, allocated) in self.allocated.iter().enumerate() {
            let free = on_list.get(index).copied().unwrap_or_default();

            assert_ne!(
                *allocated, free,
                "block {index} allocation flag disagrees with free list membership"
            );
        }
    }
}
