//! The slotted heap page format.
//!
//! A page is exactly [`PAGE_SIZE`] bytes laid out as
//!
//! ```text
//! +-----------------+------------+------------+-----+-----------+---------+
//! | occupancy bits  |  slot 0    |  slot 1    | ... | slot N-1  | padding |
//! +-----------------+------------+------------+-----+-----------+---------+
//! ```
//!
//! where `N = floor(PAGE_SIZE * 8 / (tuple_size * 8 + 1))` so that every slot costs its tuple
//! bytes plus one header bit. The header is `ceil(N / 8)` bytes; slot `i` is in use when bit
//! `i % 8` (least significant first) of header byte `i / 8` is set. Unused slots and the tail
//! padding are zero.

use std::sync::Arc;

use crate::{
    error::{DbError, Result},
    PageId, RecordId, TransactionId, Tuple, TupleDesc, PAGE_SIZE,
};

/// Number of tuple slots a page holds for tuples of `tuple_size` bytes
pub fn slots_per_page(tuple_size: usize) -> usize {
    (PAGE_SIZE * 8) / (tuple_size * 8 + 1)
}

/// Length in bytes of the occupancy bitmap for `num_slots` slots
pub fn header_size(num_slots: usize) -> usize {
    num_slots.div_ceil(8)
}

#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
}

impl HeapPage {
    /// Decode a page read from disk
    pub fn from_bytes(pid: PageId, desc: Arc<TupleDesc>, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(DbError::Corrupt {
                detail: format!("page {pid} is {} bytes, expected {PAGE_SIZE}", bytes.len()),
            });
        }
        let tuple_size = desc.size();
        let num_slots = slots_per_page(tuple_size);
        if num_slots == 0 {
            return Err(DbError::SchemaMismatch {
                detail: format!("tuples of {tuple_size} bytes do not fit in a page"),
            });
        }
        let header_len = header_size(num_slots);
        let header = bytes[..header_len].to_vec();

        let mut slots = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if !bit_is_set(&header, slot) {
                slots.push(None);
                continue;
            }
            let start = header_len + slot * tuple_size;
            let mut tuple = Tuple::from_bytes(Arc::clone(&desc), &bytes[start..start + tuple_size])?;
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            slots.push(Some(tuple));
        }

        Ok(Self {
            pid,
            desc,
            header,
            slots,
            dirtied_by: None,
        })
    }

    /// A page with every slot empty
    pub fn empty(pid: PageId, desc: Arc<TupleDesc>) -> Result<Self> {
        Self::from_bytes(pid, desc, &Self::create_empty_page_data())
    }

    /// The canonical bytes of a freshly allocated page
    pub fn create_empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    /// Encode this page into exactly [`PAGE_SIZE`] bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; PAGE_SIZE];
        let header_len = self.header.len();
        let tuple_size = self.desc.size();
        bytes[..header_len].copy_from_slice(&self.header);
        for (slot, tuple) in self.slots.iter().enumerate() {
            if let Some(tuple) = tuple {
                let start = header_len + slot * tuple_size;
                tuple.write_to(&mut bytes[start..start + tuple_size]);
            }
        }
        bytes
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.slots.len())
            .filter(|&slot| !bit_is_set(&self.header, slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.slots.len() && bit_is_set(&self.header, slot)
    }

    /// Set or clear the dirty flag, recording which transaction dirtied the page
    pub fn mark_dirty(&mut self, dirty: bool, tid: Option<TransactionId>) {
        self.dirtied_by = if dirty { tid } else { None };
    }

    /// The transaction that dirtied this page, if it is dirty
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    /// Place `tuple` in the lowest-numbered empty slot and stamp it with its new record id
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if **tuple.desc() != *self.desc {
            return Err(DbError::SchemaMismatch {
                detail: format!("tuple ({}) does not match page ({})", tuple.desc(), self.desc),
            });
        }
        let slot = (0..self.slots.len())
            .find(|&slot| !bit_is_set(&self.header, slot))
            .ok_or(DbError::PageFull { pid: self.pid })?;
        let rid = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(rid));
        self.slots[slot] = Some(tuple);
        set_bit(&mut self.header, slot, true);
        Ok(rid)
    }

    /// Free the slot `tuple` is stored in
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(DbError::MissingRecordId)?;
        if rid.page_id != self.pid {
            return Err(DbError::illegal_state(format!(
                "tuple {rid} does not live on page {}",
                self.pid
            )));
        }
        if !self.is_slot_used(rid.slot) {
            return Err(DbError::SlotNotUsed { rid });
        }
        self.slots[rid.slot] = None;
        set_bit(&mut self.header, rid.slot, false);
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Stored tuples in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }
}

fn bit_is_set(header: &[u8], slot: usize) -> bool {
    (header[slot / 8] >> (slot % 8)) & 1 == 1
}

fn set_bit(header: &mut [u8], slot: usize, value: bool) {
    let mask = 1u8 << (slot % 8);
    if value {
        header[slot / 8] |= mask;
    } else {
        header[slot / 8] &= !mask;
    }
}
