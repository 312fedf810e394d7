use std::fs::File;
use std::future::Future;
use std::io;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

/// Positional reads over a random-access byte source.
///
/// Implementations take `&self`: a reader may serve many outstanding
/// requests, which is what makes the async file reader reentrant.
pub trait ReadAt {
    /// Read exactly `range.end - range.start` bytes, or fail with
    /// [`UnexpectedEof`][io::ErrorKind::UnexpectedEof].
    fn read_at(&self, range: Range<u64>) -> io::Result<Bytes>;

    /// The number of readable bytes.
    fn size(&self) -> io::Result<u64>;
}

/// The async face of [`ReadAt`]. Futures may be driven in any order;
/// results depend only on the requested range.
pub trait AsyncReadAt: Clone + 'static {
    fn read_at_async(&self, range: Range<u64>) -> impl Future<Output = io::Result<Bytes>>;

    fn size_async(&self) -> impl Future<Output = io::Result<u64>>;
}

impl ReadAt for Bytes {
    fn read_at(&self, range: Range<u64>) -> io::Result<Bytes> {
        let start = usize::try_from(range.start)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset beyond usize"))?;
        let end = usize::try_from(range.end)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset beyond usize"))?;
        if end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read [{start}, {end}) beyond buffer of {} bytes", self.len()),
            ));
        }
        Ok(self.slice(start..end))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl AsyncReadAt for Bytes {
    async fn read_at_async(&self, range: Range<u64>) -> io::Result<Bytes> {
        self.read_at(range)
    }

    async fn size_async(&self) -> io::Result<u64> {
        self.size()
    }
}

impl ReadAt for File {
    fn read_at(&self, range: Range<u64>) -> io::Result<Bytes> {
        let len = usize::try_from(range.end - range.start)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "read beyond usize"))?;
        let mut buf = vec![0u8; len];
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.read_exact_at(&mut buf, range.start)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self.try_clone()?;
            file.seek(SeekFrom::Start(range.start))?;
            file.read_exact(&mut buf)?;
        }
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl<R: ReadAt + ?Sized> ReadAt for &R {
    fn read_at(&self, range: Range<u64>) -> io::Result<Bytes> {
        R::read_at(self, range)
    }

    fn size(&self) -> io::Result<u64> {
        R::size(self)
    }
}

impl<R: ReadAt> ReadAt for Arc<R> {
    fn read_at(&self, range: Range<u64>) -> io::Result<Bytes> {
        R::read_at(self, range)
    }

    fn size(&self) -> io::Result<u64> {
        R::size(self)
    }
}

impl<R: ReadAt + Send + Sync + 'static> AsyncReadAt for Arc<R> {
    async fn read_at_async(&self, range: Range<u64>) -> io::Result<Bytes> {
        R::read_at(self, range)
    }

    async fn size_async(&self) -> io::Result<u64> {
        R::size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_read_at() {
        let bytes = Bytes::from_static(b"quiver-io");
        assert_eq!(bytes.read_at(0..6).unwrap().as_ref(), b"quiver");
        assert_eq!(bytes.size().unwrap(), 9);
        let err = bytes.read_at(5..20).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn file_read_at() {
        use std::io::Write;

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        assert_eq!(file.read_at(2..5).unwrap().as_ref(), b"234");
        assert_eq!(file.size().unwrap(), 10);
    }
}
