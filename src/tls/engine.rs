//! Process-wide crypto engine lifecycle
//!
//! OpenSSL global state is set up once per process by
//! [`CryptoEngine::initialize`] and torn down by [`CryptoEngine::finalize`].
//! Every `TlsContext` holds a counted reference to the engine, so finalizing
//! while contexts are still alive is caught instead of leaving sockets
//! running on released state.
//!
//! Misusing the lifecycle is a programming error and panics; it is never
//! reported as a `TlsError`.

use log::{debug, info};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Once;

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const FINALIZED: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);
static LIVE_REFS: AtomicUsize = AtomicUsize::new(0);
static OPENSSL_INIT: Once = Once::new();

/// Crypto library lifecycle
///
/// The caller guarantees that `initialize` happens-before any context is
/// built and that `finalize` happens-after every socket is closed.
pub struct CryptoEngine;

impl CryptoEngine {
    /// Initialize the crypto library; further calls are no-ops
    ///
    /// # Panics
    ///
    /// Panics if the engine was already finalized.
    pub fn initialize() {
        OPENSSL_INIT.call_once(|| {
            openssl::init();
            debug!("openssl initialized: {}", openssl::version::version());
        });

        match STATE.compare_exchange(UNINITIALIZED, READY, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => info!("crypto engine ready ({})", openssl::version::version()),
            Err(READY) => {}
            Err(_) => panic!("crypto engine initialized after finalize"),
        }
    }

    /// Release the crypto library; must be the last crypto-related call
    ///
    /// A second call is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if TLS contexts are still alive.
    pub fn finalize() {
        let live = LIVE_REFS.load(Ordering::Acquire);
        assert!(
            live == 0,
            "crypto engine finalized while {live} TLS context(s) are still alive"
        );

        if STATE.swap(FINALIZED, Ordering::AcqRel) == READY {
            // Drop whatever this thread left in the error queue
            let _ = openssl::error::ErrorStack::get();
            info!("crypto engine finalized");
        }
    }

    /// Whether the engine is ready for use
    pub fn is_initialized() -> bool {
        STATE.load(Ordering::Acquire) == READY
    }

    /// Number of live engine references
    pub fn live_references() -> usize {
        LIVE_REFS.load(Ordering::Acquire)
    }

    /// Panic unless the engine is ready
    pub(crate) fn assert_ready(operation: &str) {
        match STATE.load(Ordering::Acquire) {
            READY => {}
            FINALIZED => panic!("{operation} attempted after the crypto engine was finalized"),
            _ => panic!("{operation} attempted before CryptoEngine::initialize"),
        }
    }

    /// Take a counted reference to the engine
    pub(crate) fn acquire(operation: &str) -> EngineRef {
        Self::assert_ready(operation);
        LIVE_REFS.fetch_add(1, Ordering::AcqRel);
        EngineRef { _private: () }
    }
}

/// Counted engine reference held by contexts
#[derive(Debug)]
pub(crate) struct EngineRef {
    _private: (),
}

impl Drop for EngineRef {
    fn drop(&mut self) {
        LIVE_REFS.fetch_sub(1, Ordering::AcqRel);
    }
}
