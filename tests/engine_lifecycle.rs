//! Crypto engine lifecycle
//!
//! The engine is process-wide state, so the whole lifecycle runs as one
//! sequential test in its own binary.

use std::panic;
use tls_transport::tls::{CryptoEngine, TlsContext};

#[test]
fn test_engine_lifecycle() {
    // Building a context before initialize is a lifecycle violation
    assert!(panic::catch_unwind(|| TlsContext::client().build()).is_err());
    assert!(!CryptoEngine::is_initialized());

    CryptoEngine::initialize();
    CryptoEngine::initialize();
    assert!(CryptoEngine::is_initialized());

    let ctx = TlsContext::client().build().unwrap();
    assert_eq!(CryptoEngine::live_references(), 1);

    // Contexts must be released before finalize
    assert!(panic::catch_unwind(CryptoEngine::finalize).is_err());
    assert!(CryptoEngine::is_initialized());

    drop(ctx);
    assert_eq!(CryptoEngine::live_references(), 0);

    CryptoEngine::finalize();
    CryptoEngine::finalize();
    assert!(!CryptoEngine::is_initialized());

    assert!(panic::catch_unwind(|| TlsContext::client().build()).is_err());
    assert!(panic::catch_unwind(CryptoEngine::initialize).is_err());
}
