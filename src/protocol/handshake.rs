//! Public key exchange run once per connection when encryption is enabled.
//!
//! One round trip, unencrypted:
//!
//! ```text
//! responder (server)                 initiator (client)
//!   generate key pair                  generate key pair
//!   send [own public key]  ───────▶    receive peer key
//!   receive peer key       ◀───────    send [own public key]
//! ```
//!
//! Each key travels as one ordinary frame. Afterwards each side holds an
//! encryptor bound to the peer's public key and a decryptor bound to its own
//! private key. Key state is created per call, so concurrent handshakes on
//! different connections never share anything.

use crate::config::TransportConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::cipher::{KeyPair, PeerPublicKey, Role, SessionKeys};
use crate::transport::{recv_framed, send_framed};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument};

/// Upper bound on an exported public key frame; 4096-bit PKCS#1 PEM is under 1 KB
pub const MAX_PUBLIC_KEY_LEN: usize = 8 * 1024;

/// Fold transport failures during the exchange into `HandshakeError`
fn handshake_failure(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::ConnectionClosed => {
            ProtocolError::HandshakeError(constants::ERR_PEER_CLOSED_DURING_HANDSHAKE.into())
        }
        ProtocolError::FrameError(reason) => {
            ProtocolError::HandshakeError(format!("Malformed key frame: {reason}"))
        }
        ProtocolError::OversizedPacket(len) => {
            ProtocolError::HandshakeError(format!("Key frame too large: {len} bytes"))
        }
        other => other,
    }
}

async fn send_key<W>(writer: &mut W, key: &[u8], transport: &TransportConfig) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    send_framed(writer, key, transport.header_width)
        .await
        .map_err(handshake_failure)
}

async fn recv_key<R>(reader: &mut R, transport: &TransportConfig) -> Result<PeerPublicKey>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let bytes = recv_framed(
        reader,
        transport.header_width,
        transport.buffer_size,
        MAX_PUBLIC_KEY_LEN.min(transport.effective_max_payload()),
    )
    .await
    .map_err(handshake_failure)?;
    PeerPublicKey::import(transport.cipher_suite, &bytes)
}

/// Accepting side: send our key first, then read the peer's.
///
/// # Errors
/// Returns `ProtocolError::HandshakeError` if the peer closes or sends key
/// material that cannot be decoded.
#[instrument(skip_all, fields(suite = %transport.cipher_suite))]
pub async fn respond<R, W>(
    reader: &mut R,
    writer: &mut W,
    transport: &TransportConfig,
) -> Result<SessionKeys>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let keypair = KeyPair::generate_async(transport.cipher_suite, transport.buffer_size).await?;
    send_key(writer, &keypair.export_public()?, transport).await?;
    debug!("Sent public key, awaiting peer key");

    let peer = recv_key(reader, transport).await?;
    let keys = keypair.into_session(peer, Role::Responder)?;
    debug!("Key exchange complete");
    Ok(keys)
}

/// Connecting side: read the peer's key first, then send ours.
///
/// # Errors
/// Returns `ProtocolError::HandshakeError` if the peer closes or sends key
/// material that cannot be decoded.
#[instrument(skip_all, fields(suite = %transport.cipher_suite))]
pub async fn initiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    transport: &TransportConfig,
) -> Result<SessionKeys>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let keypair = KeyPair::generate_async(transport.cipher_suite, transport.buffer_size).await?;

    let peer = recv_key(reader, transport).await?;
    debug!("Received peer key");
    send_key(writer, &keypair.export_public()?, transport).await?;

    let keys = keypair.into_session(peer, Role::Initiator)?;
    debug!("Key exchange complete");
    Ok(keys)
}
