//! Sweep Phase
//!
//! Frees committed records the marker did not reach. A record is left
//! alone when the open transaction already touched its handle (the
//! working descriptor differs from the committed one) or while it is
//! being written.

use tracing::debug;

use super::mark::OidSet;
use crate::alloc::Reservations;
use crate::cache::Record;
use crate::catalog::Reclaimer;
use crate::error::Result;
use crate::layout::RECORD_HEADER_SIZE;
use crate::store::Store;

impl Store {
    /// Free unmarked records; returns how many were freed
    pub(crate) fn sweep(&mut self, marked: &OidSet) -> Result<usize> {
        self.gc.done = true;
        let mut res = Reservations::new();
        let mut freed = 0;

        for oid in self.geometry.first_user_id()..self.committed_index_size {
            let committed = self.committed_pos(oid)?;
            if !committed.is_record() || marked.contains(oid) || self.in_flight == Some(oid) {
                continue;
            }
            if self.get_pos(oid)? != committed {
                continue;
            }
            let header = self.record_header_at(committed.offset())?;
            if header.type_oid == 0 {
                continue;
            }
            freed += 1;

            let info = self.catalog.read().get(header.type_oid);
            match info {
                Some(info) if info.hook.is_some() => {
                    let payload = self.pool.read_bytes(
                        committed.offset() + RECORD_HEADER_SIZE as u64,
                        header.payload_len(),
                    )?;
                    let record = Record {
                        oid,
                        type_oid: header.type_oid,
                        payload: payload.into(),
                    };
                    if let Some(hook) = info.hook.clone() {
                        let mut reclaimer = Reclaimer::new(self, &mut res);
                        hook.deallocate(&record, &info.plan, &mut reclaimer)?;
                    }
                }
                _ => {
                    self.free_id(oid)?;
                    self.cache.remove(oid);
                    self.clone_bitmap(committed.offset(), header.size as u64, &mut res)?;
                }
            }
        }

        self.allocated_delta = 0;
        self.gc.active = false;
        debug!(freed, "Swept unreachable records");
        Ok(freed)
    }
}
