use std::io;
use std::ops::Range;
use std::sync::Mutex;

use bytes::Bytes;

use crate::ReadAt;

/// A [`ReadAt`] wrapper that records every issued range.
///
/// Readers promise to minimize and coalesce physical reads (e.g. under
/// field projection); wrapping their source in this makes that promise
/// observable and testable.
#[derive(Debug)]
pub struct InstrumentedReadAt<R> {
    inner: R,
    reads: Mutex<Vec<Range<u64>>>,
}

impl<R> InstrumentedReadAt<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Every range read so far, in issue order.
    pub fn read_ranges(&self) -> Vec<Range<u64>> {
        self.reads.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn num_reads(&self) -> usize {
        self.reads.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ReadAt> ReadAt for InstrumentedReadAt<R> {
    fn read_at(&self, range: Range<u64>) -> io::Result<Bytes> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(range.clone());
        }
        self.inner.read_at(range)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_ranges_in_order() {
        let source = InstrumentedReadAt::new(Bytes::from_static(b"0123456789"));
        assert!(source.read_ranges().is_empty());
        source.read_at(1..3).unwrap();
        source.read_at(5..8).unwrap();
        assert_eq!(source.read_ranges(), vec![1..3, 5..8]);
        assert_eq!(source.num_reads(), 2);
    }
}
