//! Server side of one connection, driven step by step from a test.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wsconn::protocol::{FrameValidator, HandshakeRequest};
use wsconn::{CloseCode, CloseFrame, Frame, Limits, OpCode, compute_accept_key};

pub struct Peer<S> {
    stream: S,
    buf: BytesMut,
    validator: FrameValidator,
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            validator: FrameValidator::new(Limits::default()).expect_masked(true),
        }
    }

    /// Read and parse the client's upgrade request.
    pub async fn read_request(&mut self) -> HandshakeRequest {
        loop {
            if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = self.buf.split_to(pos + 4);
                return HandshakeRequest::parse(&head).expect("valid upgrade request");
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client closed before sending its request");
        }
    }

    /// Answer `request` with a valid 101 response.
    pub async fn respond(&mut self, request: &HandshakeRequest, protocol: Option<&str>) {
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            compute_accept_key(&request.key)
        );
        if let Some(protocol) = protocol {
            response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        response.push_str("\r\n");
        self.write_raw(response.as_bytes()).await;
    }

    pub async fn accept(&mut self) -> HandshakeRequest {
        self.accept_with(None).await
    }

    pub async fn accept_with(&mut self, protocol: Option<&str>) -> HandshakeRequest {
        let request = self.read_request().await;
        self.respond(&request, protocol).await;
        request
    }

    pub async fn write_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Send `frame` unmasked, as a server does.
    pub async fn send(&mut self, frame: Frame) {
        self.write_raw(&frame.encode(None)).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send(Frame::text(text.to_string())).await;
    }

    pub async fn send_close(&mut self, code: CloseCode, reason: &str) {
        self.send(Frame::close(CloseFrame::new(code, reason).encode()))
            .await;
    }

    /// Next frame from the client, `None` once it closed the stream.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = Frame::decode_from(&mut self.buf, &self.validator).unwrap() {
                return Some(frame);
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Next frame that is not a pong.
    pub async fn recv_skipping_pongs(&mut self) -> Option<Frame> {
        loop {
            match self.recv().await {
                Some(frame) if frame.opcode == OpCode::Pong => continue,
                other => return other,
            }
        }
    }

    /// Next frame, which must be a close frame; returns its status.
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        let frame = self.recv_skipping_pongs().await.expect("close frame");
        assert_eq!(frame.opcode, OpCode::Close, "expected close, got {frame:?}");
        CloseFrame::parse(frame.payload()).unwrap()
    }

    /// Echo data frames, answer pings and echo the close frame.
    ///
    /// Returns once the closing handshake is done or the client is gone.
    pub async fn echo(mut self) {
        while let Some(frame) = self.recv().await {
            match frame.opcode {
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    let echoed = Frame::new(frame.fin, frame.opcode, frame.into_payload());
                    self.send(echoed).await;
                }
                OpCode::Ping => self.send(Frame::pong(frame.into_payload())).await,
                OpCode::Pong => {}
                OpCode::Close => {
                    self.send(Frame::close(frame.into_payload())).await;
                    return;
                }
            }
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
