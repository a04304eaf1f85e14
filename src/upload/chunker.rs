use std::fmt;

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SourceError;
use crate::models::Part;

/// Upper bound on the buffer reserved before reading a part; larger parts
/// grow the buffer as data arrives
const INITIAL_READ_CAPACITY: usize = 8 * 1024 * 1024;

/// Where the data to upload comes from. Read once, never rewound.
pub enum UploadSource {
    /// A byte stream, read `chunk_size` bytes at a time
    Reader(Box<dyn AsyncRead + Unpin + Send>),
    /// Already-buffered fragments of arbitrary size
    Fragments(Box<dyn Iterator<Item = Bytes> + Send>),
}

impl UploadSource {
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        UploadSource::Reader(Box::new(reader))
    }

    pub fn fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        UploadSource::Fragments(Box::new(fragments.into_iter()))
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Reader(_) => f.write_str("UploadSource::Reader"),
            UploadSource::Fragments(_) => f.write_str("UploadSource::Fragments"),
        }
    }
}

/// Lazily splits an [`UploadSource`] into numbered parts.
///
/// Every part except the last is exactly `chunk_size` bytes for fragment
/// sources; reader sources produce full chunks until the stream ends.
pub struct Chunker {
    source: UploadSource,
    chunk_size: usize,
    max_parts: u32,
    /// Fragment bytes not yet emitted
    pending: BytesMut,
    next_number: u32,
    lookahead: Option<Part>,
    exhausted: bool,
}

impl Chunker {
    pub fn new(source: UploadSource, chunk_size: usize, max_parts: u32) -> Self {
        Chunker {
            source,
            chunk_size: chunk_size.max(1),
            max_parts,
            pending: BytesMut::new(),
            next_number: 1,
            lookahead: None,
            exhausted: false,
        }
    }

    /// Look at the next part without consuming it
    pub async fn peek(&mut self) -> Result<Option<&Part>, SourceError> {
        if self.lookahead.is_none() {
            self.lookahead = self.produce().await?;
        }
        Ok(self.lookahead.as_ref())
    }

    /// Next part in source order, or `None` once the source is drained
    pub async fn next_part(&mut self) -> Result<Option<Part>, SourceError> {
        if let Some(part) = self.lookahead.take() {
            return Ok(Some(part));
        }
        self.produce().await
    }

    async fn produce(&mut self) -> Result<Option<Part>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let data = match &mut self.source {
            UploadSource::Reader(reader) => {
                let mut buffer = Vec::with_capacity(self.chunk_size.min(INITIAL_READ_CAPACITY));
                // take() keeps reading across short reads until chunk_size or EOF
                reader.take(self.chunk_size as u64).read_to_end(&mut buffer).await?;
                Bytes::from(buffer)
            }
            UploadSource::Fragments(fragments) => {
                while self.pending.len() < self.chunk_size {
                    match fragments.next() {
                        Some(fragment) => self.pending.extend_from_slice(&fragment),
                        None => break,
                    }
                }
                let take = self.pending.len().min(self.chunk_size);
                self.pending.split_to(take).freeze()
            }
        };

        if data.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        if self.next_number > self.max_parts {
            return Err(SourceError::TooManyParts { limit: self.max_parts });
        }

        let part = Part::new(self.next_number, data);
        self.next_number += 1;
        debug!("Chunked part {} ({} bytes)", part.number, part.len());
        Ok(Some(part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio_test::io::Builder;

    const MIB: usize = 1024 * 1024;

    async fn collect(mut chunker: Chunker) -> Vec<Part> {
        let mut parts = Vec::new();
        while let Some(part) = chunker.next_part().await.unwrap() {
            parts.push(part);
        }
        parts
    }

    #[tokio::test]
    async fn test_large_chunk_size_reserves_only_what_is_read() {
        let chunker = Chunker::new(
            UploadSource::reader(Cursor::new(vec![1u8; 10])),
            crate::constants::S3_MAX_PART_SIZE as usize,
            10,
        );

        let parts = collect(chunker).await;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 10);
    }

    #[tokio::test]
    async fn test_part_larger_than_initial_buffer() {
        let data = vec![4u8; 20 * MIB];
        let parts = collect(Chunker::new(UploadSource::reader(Cursor::new(data)), 12 * MIB, 10)).await;

        let sizes: Vec<usize> = parts.iter().map(Part::len).collect();
        assert_eq!(sizes, vec![12 * MIB, 8 * MIB]);
    }

    #[tokio::test]
    async fn test_reader_12mib_in_5mib_chunks() {
        let data = vec![0xABu8; 12 * MIB];
        let chunker = Chunker::new(UploadSource::reader(Cursor::new(data)), 5 * MIB, 10_000);

        let parts = collect(chunker).await;
        let sizes: Vec<usize> = parts.iter().map(Part::len).collect();
        let numbers: Vec<u32> = parts.iter().map(|p| p.number).collect();

        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reader_fills_chunks_across_short_reads() {
        let reader = Builder::new()
            .read(b"abc")
            .read(b"de")
            .read(b"fghij")
            .read(b"k")
            .build();
        let chunker = Chunker::new(UploadSource::reader(reader), 4, 100);

        let parts = collect(chunker).await;
        let chunks: Vec<&[u8]> = parts.iter().map(|p| &p.data[..]).collect();
        assert_eq!(chunks, vec![&b"abcd"[..], &b"efgh"[..], &b"ijk"[..]]);
    }

    #[tokio::test]
    async fn test_reader_exact_multiple_has_no_empty_tail() {
        let chunker = Chunker::new(UploadSource::reader(Cursor::new(vec![1u8; 8])), 4, 100);
        let parts = collect(chunker).await;
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 4));
    }

    #[tokio::test]
    async fn test_fragments_are_regrouped() {
        let fragments = vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"cdefghij"),
            Bytes::from_static(b""),
            Bytes::from_static(b"k"),
        ];
        let chunker = Chunker::new(UploadSource::fragments(fragments), 3, 100);

        let parts = collect(chunker).await;
        let chunks: Vec<&[u8]> = parts.iter().map(|p| &p.data[..]).collect();
        assert_eq!(chunks, vec![&b"abc"[..], &b"def"[..], &b"ghi"[..], &b"jk"[..]]);
    }

    #[tokio::test]
    async fn test_empty_sources_yield_nothing() {
        let chunker = Chunker::new(UploadSource::reader(Cursor::new(Vec::new())), 4, 100);
        assert!(collect(chunker).await.is_empty());

        let chunker = Chunker::new(UploadSource::fragments(Vec::<Bytes>::new()), 4, 100);
        assert!(collect(chunker).await.is_empty());
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let mut chunker = Chunker::new(UploadSource::fragments(vec![Bytes::from_static(b"abcdef")]), 4, 100);

        assert_eq!(chunker.peek().await.unwrap().map(|p| p.number), Some(1));
        assert_eq!(chunker.peek().await.unwrap().map(|p| p.number), Some(1));
        assert_eq!(chunker.next_part().await.unwrap().map(|p| p.number), Some(1));
        assert_eq!(chunker.next_part().await.unwrap().map(|p| p.number), Some(2));
        assert!(chunker.next_part().await.unwrap().is_none());
        assert!(chunker.peek().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_too_many_parts() {
        let mut chunker = Chunker::new(UploadSource::reader(Cursor::new(vec![0u8; 10])), 4, 2);

        assert!(chunker.next_part().await.unwrap().is_some());
        assert!(chunker.next_part().await.unwrap().is_some());
        let err = chunker.next_part().await.unwrap_err();
        assert!(matches!(err, SourceError::TooManyParts { limit: 2 }));
    }

    #[tokio::test]
    async fn test_read_error_is_surfaced() {
        let reader = Builder::new()
            .read(b"ab")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"))
            .build();
        let mut chunker = Chunker::new(UploadSource::reader(reader), 4, 100);

        let err = chunker.next_part().await.unwrap_err();
        assert!(matches!(err, SourceError::Read(_)));
    }
}
