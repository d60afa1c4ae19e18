//! Payload stream type and helpers.

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};

/// Type alias for data streams used in service APIs.
pub type PayloadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Creates a [`PayloadStream`] that yields the given bytes at once.
pub fn once(contents: impl Into<Bytes>) -> PayloadStream {
    tokio_stream::once(Ok(contents.into())).boxed()
}

/// Collects a [`PayloadStream`] into a contiguous buffer.
pub async fn collect(stream: PayloadStream) -> std::io::Result<Bytes> {
    let buffer: BytesMut = stream.try_collect().await?;
    Ok(buffer.freeze())
}

/// Limits a stream to at most `limit` bytes, truncating the last chunk.
pub(crate) fn take(stream: PayloadStream, limit: u64) -> PayloadStream {
    stream
        .scan(limit, |remaining, chunk| {
            if *remaining == 0 {
                return futures_util::future::ready(None);
            }
            let chunk = chunk.map(|mut bytes| {
                if bytes.len() as u64 > *remaining {
                    bytes.truncate(*remaining as usize);
                }
                *remaining -= bytes.len() as u64;
                bytes
            });
            futures_util::future::ready(Some(chunk))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_truncates() {
        let stream = futures_util::stream::iter([
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
            Ok(Bytes::from_static(b"!")),
        ])
        .boxed();

        let bytes = collect(take(stream, 8)).await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello wo");
    }
}
