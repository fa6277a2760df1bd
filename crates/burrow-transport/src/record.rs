//! Handshake wire exchange and the encrypted record layer.
//!
//! Handshake, in the clear:
//!
//! ```text
//! dialer   -> acceptor: "BRW" ver | client static pub | client ephemeral pub
//! acceptor -> dialer:   "BRW" ver | server ephemeral pub
//! ```
//!
//! The acceptor authorizes the client static key before replying; a
//! rejected peer sees only a closed connection. Every message after the
//! handshake is one record:
//!
//! ```text
//! u32 length | 12-byte nonce | ciphertext
//! ```

use burrow_crypto::{
    ClientHandshake, IdentityKeyPair, PublicKeyBytes, RecordCipher, ServerHandshake,
    TransportKeys, KEY_SIZE, NONCE_SIZE,
};
use burrow_proto::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

const MAGIC: [u8; 3] = *b"BRW";

/// AEAD tag plus slack over the largest plaintext message.
const MAX_RECORD_SIZE: usize = MAX_MESSAGE_SIZE as usize + 64;

fn hello_header() -> [u8; 4] {
    [MAGIC[0], MAGIC[1], MAGIC[2], PROTOCOL_VERSION]
}

fn check_header(header: &[u8; 4]) -> Result<(), TransportError> {
    if header[..3] != MAGIC {
        return Err(TransportError::HandshakeFailed(
            "bad protocol magic".into(),
        ));
    }
    if header[3] != PROTOCOL_VERSION {
        return Err(TransportError::HandshakeFailed(format!(
            "unsupported protocol version {}",
            header[3]
        )));
    }
    Ok(())
}

/// Dialer half of the handshake.
pub(crate) async fn client_handshake<S>(
    stream: &mut S,
    identity: &IdentityKeyPair,
    server_key: &PublicKeyBytes,
) -> Result<TransportKeys, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let state = ClientHandshake::new();

    let mut hello = Vec::with_capacity(4 + 2 * KEY_SIZE);
    hello.extend_from_slice(&hello_header());
    hello.extend_from_slice(&identity.public_bytes());
    hello.extend_from_slice(&state.ephemeral_public());
    stream.write_all(&hello).await?;
    stream.flush().await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(closed_on_eof)?;
    check_header(&header)?;

    let mut server_ephemeral = [0u8; KEY_SIZE];
    stream
        .read_exact(&mut server_ephemeral)
        .await
        .map_err(closed_on_eof)?;

    Ok(state.complete(identity, server_key, &server_ephemeral)?)
}

/// Acceptor half of the handshake.
///
/// `authorize` is consulted after the client's static key arrives and
/// before any reply; returning false drops the connection with nothing
/// written, so an unauthorized peer learns nothing but "closed".
pub(crate) async fn server_handshake<S, F>(
    stream: &mut S,
    identity: &IdentityKeyPair,
    authorize: F,
) -> Result<(TransportKeys, PublicKeyBytes), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(&PublicKeyBytes) -> bool,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(closed_on_eof)?;
    check_header(&header)?;

    let mut client_static = [0u8; KEY_SIZE];
    stream
        .read_exact(&mut client_static)
        .await
        .map_err(closed_on_eof)?;
    let mut client_ephemeral = [0u8; KEY_SIZE];
    stream
        .read_exact(&mut client_ephemeral)
        .await
        .map_err(closed_on_eof)?;

    if !authorize(&client_static) {
        return Err(TransportError::HandshakeFailed(
            "peer public key not authorized".into(),
        ));
    }

    let state = ServerHandshake::new();
    let mut reply = Vec::with_capacity(4 + KEY_SIZE);
    reply.extend_from_slice(&hello_header());
    reply.extend_from_slice(&state.ephemeral_public());
    stream.write_all(&reply).await?;
    stream.flush().await?;

    let keys = state.complete(identity, &client_static, &client_ephemeral)?;
    Ok((keys, client_static))
}

/// Seal and write one record.
pub(crate) async fn write_record<S>(
    stream: &mut S,
    cipher: &RecordCipher,
    plaintext: &[u8],
) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    let sealed = cipher.seal(plaintext)?;
    let len = NONCE_SIZE + sealed.ciphertext.len();
    if len > MAX_RECORD_SIZE {
        return Err(TransportError::OversizedRecord(len));
    }

    stream.write_u32(len as u32).await?;
    stream.write_all(&sealed.nonce).await?;
    stream.write_all(&sealed.ciphertext).await?;
    stream.flush().await?;
    Ok(())
}

/// Read and open one record. A clean EOF at the length prefix reads as
/// `ConnectionClosed`.
pub(crate) async fn read_record<S>(
    stream: &mut S,
    cipher: &RecordCipher,
) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + Unpin,
{
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };

    if len > MAX_RECORD_SIZE {
        return Err(TransportError::OversizedRecord(len));
    }
    if len < NONCE_SIZE + 16 {
        return Err(TransportError::MalformedRecord(format!(
            "record too short: {len} bytes"
        )));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.map_err(closed_on_eof)?;

    let (nonce, ciphertext) = buf.split_at(NONCE_SIZE);
    Ok(cipher.open(ciphertext, nonce)?)
}

fn closed_on_eof(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::ConnectionClosed
    } else {
        TransportError::Io(e)
    }
}
