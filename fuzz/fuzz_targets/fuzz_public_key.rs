#![no_main]

use chatwire::protocol::cipher::{CipherSuite, PeerPublicKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // key import must reject, never panic, on hostile handshake frames
    let _ = PeerPublicKey::import(CipherSuite::Rsa, data);
    let _ = PeerPublicKey::import(CipherSuite::X25519, data);
});
