//! In-memory `MessageIndex` test double, used by the sync engine's
//! integration tests so they don't need a live SQLite file per scenario.

use std::collections::VecDeque;

use crate::types::MessageFlags;

use super::{
    ExtColumn, ExtValue, IndexError, IndexHeader, IndexMessage, IndexResult, MessageIndex,
    SyncRecord, UpdateMode,
};

#[derive(Debug, Default)]
pub struct InMemoryIndex {
    header: IndexHeader,
    messages: Vec<IndexMessage>,
    md5: std::collections::HashMap<u32, [u8; 16]>,
    pending: VecDeque<SyncRecord>,
    in_transaction: bool,
    corrupted: bool,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, record: SyncRecord) {
        self.pending.push_back(record);
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    fn find_mut(&mut self, seq: u32) -> Option<&mut IndexMessage> {
        self.messages.iter_mut().find(|m| m.seq == seq)
    }

    fn renumber(&mut self) {
        for (i, m) in self.messages.iter_mut().enumerate() {
            m.seq = (i + 1) as u32;
        }
    }
}

impl MessageIndex for InMemoryIndex {
    fn header(&mut self) -> IndexResult<IndexHeader> {
        Ok(self.header)
    }

    fn update_header(&mut self, header: IndexHeader) -> IndexResult<()> {
        self.header = header;
        Ok(())
    }

    fn view_messages_count(&mut self) -> IndexResult<u32> {
        Ok(self.messages.len() as u32)
    }

    fn lookup(&mut self, seq: u32) -> IndexResult<Option<IndexMessage>> {
        Ok(self.messages.iter().find(|m| m.seq == seq).cloned())
    }

    fn lookup_uid(&mut self, seq: u32) -> IndexResult<Option<u32>> {
        Ok(self.messages.iter().find(|m| m.seq == seq).map(|m| m.uid))
    }

    fn lookup_uid_range(&mut self, uid1: u32, uid2: u32) -> IndexResult<Vec<IndexMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.uid >= uid1 && m.uid <= uid2)
            .cloned()
            .collect())
    }

    fn lookup_ext(&mut self, seq: u32, ext: ExtColumn) -> IndexResult<Option<ExtValue>> {
        match ext {
            ExtColumn::Md5Hdr => Ok(self.md5.get(&seq).copied().map(ExtValue::Md5)),
            ExtColumn::FromOffset => Ok(self
                .messages
                .iter()
                .find(|m| m.seq == seq)
                .map(|m| ExtValue::FromOffset(m.from_offset))),
        }
    }

    fn append(&mut self, uid: u32, flags: MessageFlags, keywords: Vec<String>) -> IndexResult<u32> {
        let seq = self.messages.len() as u32 + 1;
        self.messages.push(IndexMessage {
            seq,
            uid,
            flags,
            keywords,
            from_offset: 0,
        });
        Ok(seq)
    }

    fn expunge(&mut self, seq: u32) -> IndexResult<()> {
        let before = self.messages.len();
        self.messages.retain(|m| m.seq != seq);
        if self.messages.len() == before {
            return Err(IndexError::NotFound(seq));
        }
        self.renumber();
        Ok(())
    }

    fn update_flags(&mut self, seq: u32, mode: UpdateMode, flags: MessageFlags) -> IndexResult<()> {
        let msg = self.find_mut(seq).ok_or(IndexError::NotFound(seq))?;
        match mode {
            UpdateMode::Add => msg.flags |= flags,
            UpdateMode::Remove => msg.flags.remove(flags),
            UpdateMode::Replace => msg.flags = flags,
        }
        Ok(())
    }

    fn update_keywords(&mut self, seq: u32, mode: UpdateMode, set: &[String]) -> IndexResult<()> {
        let msg = self.find_mut(seq).ok_or(IndexError::NotFound(seq))?;
        match mode {
            UpdateMode::Add => {
                for kw in set {
                    if !msg.keywords.contains(kw) {
                        msg.keywords.push(kw.clone());
                    }
                }
            }
            UpdateMode::Remove => msg.keywords.retain(|k| !set.contains(k)),
            UpdateMode::Replace => msg.keywords = set.to_vec(),
        }
        Ok(())
    }

    fn update_ext(&mut self, seq: u32, ext: ExtColumn, value: ExtValue) -> IndexResult<()> {
        match (ext, value) {
            (ExtColumn::Md5Hdr, ExtValue::Md5(bytes)) => {
                self.md5.insert(seq, bytes);
                Ok(())
            }
            (ExtColumn::FromOffset, ExtValue::FromOffset(off)) => {
                let msg = self.find_mut(seq).ok_or(IndexError::NotFound(seq))?;
                msg.from_offset = off;
                Ok(())
            }
            _ => Err(IndexError::Backend("ext column/value mismatch".into())),
        }
    }

    fn sync_next(&mut self) -> IndexResult<Option<SyncRecord>> {
        Ok(self.pending.pop_front())
    }

    fn sync_reset(&mut self) -> IndexResult<()> {
        self.pending.clear();
        Ok(())
    }

    fn transaction_begin(&mut self) -> IndexResult<()> {
        if self.in_transaction {
            return Err(IndexError::Backend("transaction already open".into()));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn transaction_commit(&mut self) -> IndexResult<()> {
        if !self.in_transaction {
            return Err(IndexError::NoTransaction);
        }
        self.in_transaction = false;
        Ok(())
    }

    fn transaction_rollback(&mut self) -> IndexResult<()> {
        self.in_transaction = false;
        Ok(())
    }

    fn mark_corrupted(&mut self) -> IndexResult<()> {
        self.corrupted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_lookup_round_trip() {
        let mut idx = InMemoryIndex::new();
        let seq = idx.append(1, MessageFlags::SEEN, vec![]).unwrap();
        let msg = idx.lookup(seq).unwrap().unwrap();
        assert_eq!(msg.uid, 1);
        assert!(msg.flags.contains(MessageFlags::SEEN));
    }

    #[test]
    fn expunge_renumbers_following_sequences() {
        let mut idx = InMemoryIndex::new();
        idx.append(1, MessageFlags::empty(), vec![]).unwrap();
        idx.append(2, MessageFlags::empty(), vec![]).unwrap();
        idx.expunge(1).unwrap();
        let remaining = idx.lookup(1).unwrap().unwrap();
        assert_eq!(remaining.uid, 2);
    }
}
