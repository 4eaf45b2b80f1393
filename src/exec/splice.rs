// In-place stream splicing.
//
// Insert and delete move the tail of the stream through a fixed buffer, so
// memory use is bounded regardless of file size.  Insert copies backward
// from the end (the destination lies above the source); delete copies
// forward (the destination lies below).

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// A seekable byte stream whose length can be changed in place.
pub trait SpliceStream: Read + Write + Seek {
    fn stream_len(&mut self) -> io::Result<u64>;

    /// Truncate or zero-extend to exactly `len` bytes.
    fn set_stream_len(&mut self, len: u64) -> io::Result<()>;
}

impl SpliceStream for File {
    fn stream_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_stream_len(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl SpliceStream for Cursor<Vec<u8>> {
    fn stream_len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn set_stream_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "buffer length exceeds address space"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl<S: SpliceStream + ?Sized> SpliceStream for Box<S> {
    fn stream_len(&mut self) -> io::Result<u64> {
        (**self).stream_len()
    }

    fn set_stream_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_stream_len(len)
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Insert `payload` at `offset`, shifting `[offset, len)` forward.
///
/// The caller guarantees `offset <= len`.
pub fn insert<S: SpliceStream + ?Sized>(s: &mut S, offset: u64, payload: &[u8]) -> io::Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    let len = s.stream_len()?;
    debug_assert!(offset <= len);
    let grow = payload.len() as u64;
    s.set_stream_len(len + grow)?;

    let mut buf = vec![0u8; BUF_SIZE.min((len - offset) as usize)];
    let mut end = len;
    while end > offset {
        let n = (end - offset).min(BUF_SIZE as u64) as usize;
        let src = end - n as u64;
        s.seek(SeekFrom::Start(src))?;
        s.read_exact(&mut buf[..n])?;
        s.seek(SeekFrom::Start(src + grow))?;
        s.write_all(&buf[..n])?;
        end = src;
    }

    s.seek(SeekFrom::Start(offset))?;
    s.write_all(payload)
}

/// Remove up to `count` bytes at `offset`. Returns the number removed,
/// which is clamped to what lies between `offset` and the end.
pub fn delete<S: SpliceStream + ?Sized>(s: &mut S, offset: u64, count: u64) -> io::Result<u64> {
    let len = s.stream_len()?;
    let count = count.min(len.saturating_sub(offset));
    if count == 0 {
        return Ok(0);
    }

    let mut src = offset + count;
    let mut dst = offset;
    if src < len {
        let mut buf = vec![0u8; BUF_SIZE.min((len - src) as usize)];
        while src < len {
            let n = (len - src).min(BUF_SIZE as u64) as usize;
            s.seek(SeekFrom::Start(src))?;
            s.read_exact(&mut buf[..n])?;
            s.seek(SeekFrom::Start(dst))?;
            s.write_all(&buf[..n])?;
            src += n as u64;
            dst += n as u64;
        }
    }

    s.set_stream_len(len - count)?;
    Ok(count)
}

/// Overwrite bytes at `offset`, zero-extending the stream if it ends
/// before `offset + payload.len()`.
pub fn update<S: SpliceStream + ?Sized>(s: &mut S, offset: u64, payload: &[u8]) -> io::Result<()> {
    let end = offset
        .checked_add(payload.len() as u64)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "update range overflows u64"))?;
    if end > s.stream_len()? {
        s.set_stream_len(end)?;
    }
    s.seek(SeekFrom::Start(offset))?;
    s.write_all(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(data: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(data.to_vec())
    }

    #[test]
    fn insert_middle_and_ends() {
        let mut c = cursor(b"hello world");
        insert(&mut c, 5, b",").unwrap();
        insert(&mut c, 0, b">> ").unwrap();
        let end = c.stream_len().unwrap();
        insert(&mut c, end, b"!").unwrap();
        assert_eq!(c.into_inner(), b">> hello, world!");
    }

    #[test]
    fn delete_middle_and_clamp() {
        let mut c = cursor(b"0123456789");
        assert_eq!(delete(&mut c, 2, 3).unwrap(), 3);
        assert_eq!(c.get_ref(), b"0156789");
        assert_eq!(delete(&mut c, 4, 100).unwrap(), 3);
        assert_eq!(c.get_ref(), b"0156");
        assert_eq!(delete(&mut c, 10, 5).unwrap(), 0);
        assert_eq!(c.get_ref(), b"0156");
    }

    #[test]
    fn update_overwrites_and_extends() {
        let mut c = cursor(b"abcdef");
        update(&mut c, 1, b"XY").unwrap();
        assert_eq!(c.get_ref(), b"aXYdef");
        update(&mut c, 4, b"1234").unwrap();
        assert_eq!(c.get_ref(), b"aXYd1234");
        update(&mut c, 10, b"z").unwrap();
        assert_eq!(c.get_ref(), b"aXYd1234\0\0z");
    }

    #[test]
    fn shifts_span_multiple_buffers() {
        let data: Vec<u8> = (0..(3 * BUF_SIZE + 123)).map(|i| (i % 251) as u8).collect();

        let mut c = cursor(&data);
        insert(&mut c, 17, &[0xEE; 1000]).unwrap();
        let mut expect = data.clone();
        expect.splice(17..17, [0xEE; 1000]);
        assert_eq!(c.get_ref(), &expect);

        delete(&mut c, 17, 1000).unwrap();
        assert_eq!(c.get_ref(), &data);

        delete(&mut c, 5, (BUF_SIZE + 7) as u64).unwrap();
        let mut expect = data.clone();
        expect.drain(5..5 + BUF_SIZE + 7);
        assert_eq!(c.get_ref(), &expect);
    }

    #[test]
    fn file_stream_splices() {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(b"the quick fox").unwrap();
        insert(&mut f, 10, b"brown ").unwrap();
        delete(&mut f, 0, 4).unwrap();
        update(&mut f, 0, b"Q").unwrap();
        assert_eq!(f.stream_len().unwrap(), 15);

        let mut out = Vec::new();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Quick brown fox");
    }
}
