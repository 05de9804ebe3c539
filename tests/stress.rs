use bytes::BytesMut;
use chatwire::core::codec::FrameCodec;
use chatwire::protocol::cipher::{CipherSuite, KeyPair, PeerPublicKey, Role};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_frame_encode_decode_large_series() {
    // heavy burst of frames through one buffer, no panics and nothing left over
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();

    for size in [0usize, 1, 64, 512, 4096, 65536, 1_048_576] {
        let payload = vec![0u8; size];
        let rounds = if size >= 65536 { 200 } else { 5_000 };
        for _ in 0..rounds {
            codec.encode(&payload, &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap();
            assert_eq!(decoded.map(|frame| frame.len()), Some(size));
            assert!(buf.is_empty());
        }
    }
}

#[test]
fn stress_sealed_sessions_many_messages() {
    let initiator = KeyPair::generate(CipherSuite::X25519, 0).unwrap();
    let responder = KeyPair::generate(CipherSuite::X25519, 0).unwrap();
    let to_responder = PeerPublicKey::import(CipherSuite::X25519, &responder.export_public().unwrap()).unwrap();
    let to_initiator = PeerPublicKey::import(CipherSuite::X25519, &initiator.export_public().unwrap()).unwrap();
    let client = initiator.into_session(to_responder, Role::Initiator).unwrap();
    let server = responder.into_session(to_initiator, Role::Responder).unwrap();

    for i in 0..10_000usize {
        let message = format!("message number {i}");
        let sealed = client.encryptor.encrypt(message.as_bytes()).unwrap();
        assert_eq!(server.decryptor.decrypt(&sealed).unwrap(), message.as_bytes());
    }
}
