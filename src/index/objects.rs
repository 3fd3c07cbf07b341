//! Records
//!
//! Variable-size objects: an 8-byte header followed by the payload. A
//! record first written in this transaction is updated in place when the
//! new size fits its quanta; a record inherited from the committed
//! generation always moves, leaving the committed bytes untouched.

use bytes::Bytes;

use crate::alloc::Reservations;
use crate::error::{AtlasError, Result};
use crate::layout::{align_quantum, Oid, Position, RecordHeader, RECORD_HEADER_SIZE};
use crate::store::Store;

impl Store {
    /// Store a new record and return its handle
    pub(crate) fn insert_record(&mut self, type_oid: Oid, payload: &[u8]) -> Result<Oid> {
        let oid = self.allocate_id()?;
        self.write_record(oid, None, type_oid, payload)?;
        Ok(oid)
    }

    /// Replace the contents of an existing record
    pub(crate) fn update_record(&mut self, oid: Oid, type_oid: Oid, payload: &[u8]) -> Result<()> {
        let pos = self.record_pos(oid)?;
        self.write_record(oid, Some(pos), type_oid, payload)
    }

    fn write_record(
        &mut self,
        oid: Oid,
        current: Option<Position>,
        type_oid: Oid,
        payload: &[u8],
    ) -> Result<()> {
        let header = RecordHeader::new(payload.len(), type_oid);
        let size = header.size as u64;
        let mut res = Reservations::new();

        self.in_flight = Some(oid);
        let placed = self.place_record(oid, current, size, &mut res);
        self.in_flight = None;
        let offset = placed?;

        let mut buf = vec![0u8; header.size as usize];
        header.encode(&mut buf);
        buf[RECORD_HEADER_SIZE..].copy_from_slice(payload);
        self.pool.write_bytes(offset, &buf)?;
        self.modified = true;
        Ok(())
    }

    /// Find space for `size` bytes of `oid` and point its slot at it
    fn place_record(
        &mut self,
        oid: Oid,
        current: Option<Position>,
        size: u64,
        res: &mut Reservations,
    ) -> Result<u64> {
        let Some(pos) = current else {
            let offset = self.allocate(size, 0, res)?;
            self.set_pos(oid, Position::object(offset).with_modified())?;
            return Ok(offset);
        };

        let old_size = self.record_header_at(pos.offset())?.size as u64;
        if !pos.is_modified() {
            self.clone_bitmap(pos.offset(), old_size, res)?;
            let offset = self.allocate(size, 0, res)?;
            self.set_pos(oid, Position::object(offset).with_modified())?;
            return Ok(offset);
        }

        let (new_quanta, old_quanta) = (align_quantum(size), align_quantum(old_size));
        if new_quanta > old_quanta {
            let offset = self.allocate(size, 0, res)?;
            self.clone_bitmap(pos.offset(), old_size, res)?;
            self.free(pos.offset(), old_size, res)?;
            self.set_pos(oid, Position::object(offset).with_modified())?;
            Ok(offset)
        } else {
            if new_quanta < old_quanta {
                self.free(pos.offset() + new_quanta, old_quanta - new_quanta, res)?;
            }
            Ok(pos.offset())
        }
    }

    /// Header and payload of a record
    pub(crate) fn read_record(&self, oid: Oid) -> Result<(RecordHeader, Bytes)> {
        let pos = self.record_pos(oid)?;
        let header = self.record_header_at(pos.offset())?;
        let payload = self.pool.read_bytes(
            pos.offset() + RECORD_HEADER_SIZE as u64,
            header.payload_len(),
        )?;
        Ok((header, Bytes::from(payload)))
    }

    /// Release a record's handle and space
    pub(crate) fn deallocate_object(&mut self, oid: Oid, res: &mut Reservations) -> Result<()> {
        let pos = self.record_pos(oid)?;
        let size = self.record_header_at(pos.offset())?.size as u64;
        self.free_id(oid)?;
        if pos.is_modified() {
            self.free(pos.offset(), size, res)
        } else {
            self.clone_bitmap(pos.offset(), size, res)
        }
    }

    /// Working descriptor of `oid`, which must be a live record
    pub(crate) fn record_pos(&self, oid: Oid) -> Result<Position> {
        let pos = self.get_pos(oid)?;
        if !pos.is_record() {
            return Err(AtlasError::Consistency(format!(
                "object {} is not a record",
                oid
            )));
        }
        Ok(pos)
    }

    /// Decode the record header stored at `offset`
    pub(crate) fn record_header_at(&self, offset: u64) -> Result<RecordHeader> {
        let raw = self.pool.read_bytes(offset, RECORD_HEADER_SIZE)?;
        let header = RecordHeader::decode(&raw);
        if (header.size as usize) < RECORD_HEADER_SIZE {
            return Err(AtlasError::Corruption(format!(
                "record at offset {} has size {}",
                offset, header.size
            )));
        }
        Ok(header)
    }
}
