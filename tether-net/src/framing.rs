//! Length-prefixed prost messages over transport stream halves

use crate::error::RpcError;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest frame either side accepts. Session payloads are small attribute batches.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_LEN).new_codec()
}

/// Write half: encodes each message into one frame.
pub struct MessageSink<W> {
    frames: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Unpin> MessageSink<W> {
    pub fn new(stream: W) -> Self {
        Self {
            frames: FramedWrite::new(stream, codec()),
        }
    }

    pub async fn send<M: Message>(&mut self, msg: &M) -> Result<(), RpcError> {
        self.frames.send(Bytes::from(msg.encode_to_vec())).await?;
        Ok(())
    }

    /// Flush and shut down the write half so the peer sees end of stream.
    pub async fn finish(mut self) -> Result<(), RpcError> {
        SinkExt::<Bytes>::close(&mut self.frames).await?;
        Ok(())
    }
}

/// Read half: decodes one message per frame.
pub struct MessageStream<R> {
    frames: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Unpin> MessageStream<R> {
    pub fn new(stream: R) -> Self {
        Self {
            frames: FramedRead::new(stream, codec()),
        }
    }

    /// Next message, or `None` once the peer finished its side.
    pub async fn recv<M: Message + Default>(&mut self) -> Result<Option<M>, RpcError> {
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(M::decode(frame.freeze())?)),
            Some(Err(e)) => Err(RpcError::Io(e)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::RpcRequest;

    #[tokio::test]
    async fn test_frames_survive_a_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let mut sink = MessageSink::new(a);
        let mut stream = MessageStream::new(b);

        let request = RpcRequest {
            id: 9,
            service: "session".into(),
            method: "fetch".into(),
            payload: vec![1, 2, 3],
        };
        sink.send(&request).await.unwrap();
        sink.send(&request).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(stream.recv::<RpcRequest>().await.unwrap(), Some(request.clone()));
        assert_eq!(stream.recv::<RpcRequest>().await.unwrap(), Some(request));
        assert_eq!(stream.recv::<RpcRequest>().await.unwrap(), None);
    }
}
