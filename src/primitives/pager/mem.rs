use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::trace;

use super::{AtomicOperation, PageAccess, PageRef, PageStore, PagerStats};
use crate::types::page::{seal_page, verify_page, PAGE_HDR_LEN};
use crate::types::{PageId, Result, SombraError};

/// In-memory page store.
///
/// Page 0 is never handed out so that `PageId(0)` can act as a null link in
/// page layouts. Committed pages carry a sealed header and are verified on
/// every read.
pub struct MemPager {
    page_size: u32,
    salt: u64,
    writer: Mutex<()>,
    state: RwLock<MemState>,
    counters: MemCounters,
}

struct MemState {
    pages: Vec<Option<Arc<[u8]>>>,
    free: Vec<PageId>,
}

#[derive(Default)]
struct MemCounters {
    pages_read: AtomicU64,
    pages_written: AtomicU64,
    pages_allocated: AtomicU64,
    pages_freed: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl MemPager {
    /// Creates an empty store.
    pub fn new(page_size: u32) -> Result<Self> {
        if (page_size as usize) < PAGE_HDR_LEN * 4 {
            return Err(SombraError::Invalid("page size too small"));
        }
        Ok(Self {
            page_size,
            salt: 0x5EED_0000_0000_0000 ^ u64::from(page_size),
            writer: Mutex::new(()),
            state: RwLock::new(MemState {
                pages: vec![None],
                free: Vec::new(),
            }),
            counters: MemCounters::default(),
        })
    }

    /// Starts an atomic operation with a concrete type.
    pub fn begin(&self) -> MemAtomicOperation<'_> {
        let writer = self.writer.lock();
        let (next_page, free) = {
            let state = self.state.read();
            (state.pages.len() as u64, state.free.clone())
        };
        MemAtomicOperation {
            pager: self,
            _writer: writer,
            dirty: BTreeMap::new(),
            freed: Vec::new(),
            free,
            next_page,
            allocated: 0,
            committed: false,
        }
    }

    fn committed_page(&self, id: PageId) -> Result<Arc<[u8]>> {
        let state = self.state.read();
        let data = state
            .pages
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(SombraError::Invalid("page not allocated"))?;
        drop(state);
        verify_page(id, self.salt, &data)?;
        self.counters.pages_read.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(data)
    }
}

impl PageAccess for MemPager {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page(&self, id: PageId) -> Result<PageRef> {
        Ok(PageRef::new(id, self.committed_page(id)?))
    }
}

impl PageStore for MemPager {
    fn read_view(&self) -> &dyn PageAccess {
        self
    }

    fn begin_atomic(&self) -> Result<Box<dyn AtomicOperation + '_>> {
        Ok(Box::new(self.begin()))
    }

    fn stats(&self) -> PagerStats {
        let c = &self.counters;
        PagerStats {
            pages_read: c.pages_read.load(AtomicOrdering::Relaxed),
            pages_written: c.pages_written.load(AtomicOrdering::Relaxed),
            pages_allocated: c.pages_allocated.load(AtomicOrdering::Relaxed),
            pages_freed: c.pages_freed.load(AtomicOrdering::Relaxed),
            commits: c.commits.load(AtomicOrdering::Relaxed),
            rollbacks: c.rollbacks.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Copy-on-write atomic operation over a [`MemPager`].
///
/// Holds the store's writer lock for its whole lifetime.
pub struct MemAtomicOperation<'a> {
    pager: &'a MemPager,
    _writer: MutexGuard<'a, ()>,
    dirty: BTreeMap<PageId, Vec<u8>>,
    freed: Vec<PageId>,
    free: Vec<PageId>,
    next_page: u64,
    allocated: u64,
    committed: bool,
}

impl MemAtomicOperation<'_> {
    fn ensure_live(&self, id: PageId) -> Result<()> {
        if self.freed.contains(&id) {
            return Err(SombraError::Invalid("page freed in this operation"));
        }
        Ok(())
    }

    /// Publishes the operation; see [`AtomicOperation::commit`].
    pub fn commit_now(mut self) -> Result<()> {
        let mut sealed = Vec::with_capacity(self.dirty.len());
        for (id, mut buf) in std::mem::take(&mut self.dirty) {
            seal_page(id, self.pager.salt, &mut buf)?;
            sealed.push((id, Arc::<[u8]>::from(buf)));
        }
        let mut state = self.pager.state.write();
        if state.pages.len() < self.next_page as usize {
            state.pages.resize(self.next_page as usize, None);
        }
        let written = sealed.len() as u64;
        for (id, data) in sealed {
            state.pages[id.0 as usize] = Some(data);
        }
        for id in &self.freed {
            if let Some(slot) = state.pages.get_mut(id.0 as usize) {
                *slot = None;
            }
        }
        state.free = std::mem::take(&mut self.free);
        state.free.extend(self.freed.iter().copied());
        drop(state);

        let c = &self.pager.counters;
        c.pages_written.fetch_add(written, AtomicOrdering::Relaxed);
        c.pages_allocated
            .fetch_add(self.allocated, AtomicOrdering::Relaxed);
        c.pages_freed
            .fetch_add(self.freed.len() as u64, AtomicOrdering::Relaxed);
        c.commits.fetch_add(1, AtomicOrdering::Relaxed);
        trace!(
            target: "sombra_pager::commit",
            pages_written = written,
            pages_freed = self.freed.len(),
            "atomic operation committed"
        );
        self.committed = true;
        Ok(())
    }
}

impl PageAccess for MemAtomicOperation<'_> {
    fn page_size(&self) -> u32 {
        self.pager.page_size
    }

    fn page(&self, id: PageId) -> Result<PageRef> {
        self.ensure_live(id)?;
        if let Some(buf) = self.dirty.get(&id) {
            return Ok(PageRef::new(id, Arc::from(buf.as_slice())));
        }
        self.pager.page(id)
    }
}

impl AtomicOperation for MemAtomicOperation<'_> {
    fn pages(&self) -> &dyn PageAccess {
        self
    }

    fn page_mut(&mut self, id: PageId) -> Result<&mut [u8]> {
        self.ensure_live(id)?;
        if !self.dirty.contains_key(&id) {
            let data = self.pager.committed_page(id)?;
            self.dirty.insert(id, data.to_vec());
        }
        self.dirty
            .get_mut(&id)
            .map(Vec::as_mut_slice)
            .ok_or(SombraError::Invalid("page not allocated"))
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = PageId(self.next_page);
                self.next_page += 1;
                id
            }
        };
        self.dirty.insert(id, vec![0u8; self.pager.page_size as usize]);
        self.allocated += 1;
        Ok(id)
    }

    fn free_page(&mut self, id: PageId) -> Result<()> {
        if id.0 == 0 || id.0 >= self.next_page {
            return Err(SombraError::Invalid("page not allocated"));
        }
        self.ensure_live(id)?;
        self.dirty.remove(&id);
        self.freed.push(id);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        (*self).commit_now()
    }
}

impl Drop for MemAtomicOperation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.pager
                .counters
                .rollbacks
                .fetch_add(1, AtomicOrdering::Relaxed);
            trace!(
                target: "sombra_pager::rollback",
                pages_discarded = self.dirty.len(),
                "atomic operation rolled back"
            );
        }
    }
}
