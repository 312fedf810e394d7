/// Counters accumulated by a write session.
///
/// For any writer/reader pair over one stream, the write-side counters must
/// equal the read-side [`ReadStats`] counters exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Messages of any kind, the schema message included.
    pub num_messages: usize,
    pub num_record_batches: usize,
    pub num_dictionary_batches: usize,
    /// Dictionary batches that replaced an already-written dictionary.
    pub num_replaced_dictionaries: usize,
    /// Dictionary batches that appended to an already-written dictionary.
    pub num_dictionary_deltas: usize,
}

/// Counters accumulated by a read session. See [`WriteStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub num_messages: usize,
    pub num_record_batches: usize,
    pub num_dictionary_batches: usize,
    pub num_replaced_dictionaries: usize,
    pub num_dictionary_deltas: usize,
}

impl ReadStats {
    /// Pairwise comparison against the writing side.
    pub fn matches(&self, write: &WriteStats) -> bool {
        self.num_messages == write.num_messages
            && self.num_record_batches == write.num_record_batches
            && self.num_dictionary_batches == write.num_dictionary_batches
            && self.num_replaced_dictionaries == write.num_replaced_dictionaries
            && self.num_dictionary_deltas == write.num_dictionary_deltas
    }
}
