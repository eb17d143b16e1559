//! Panic wipe integration tests.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::SeededEnv;
use hushwire_core::{
    PanicWipe, SessionCrypto, SessionError, SessionStore, StorageError, TrackedConnection,
    WipeError, WipePlatform, WipeRegistry, WipeStep, wipe::WIPE_CLOSE_CODE,
};

#[derive(Default)]
struct CountingConnection {
    closes: AtomicUsize,
}

impl TrackedConnection for CountingConnection {
    fn force_close(&self, code: u16, _reason: &str) {
        assert_eq!(code, WIPE_CLOSE_CODE);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Platform where every step fails.
#[derive(Default)]
struct BrokenPlatform {
    calls: Vec<&'static str>,
}

impl WipePlatform for BrokenPlatform {
    fn clear_key_value(&mut self) -> Result<(), StorageError> {
        self.calls.push("clear");
        Err(StorageError::Io("read-only filesystem".into()))
    }

    fn cache_names(&self) -> Result<Vec<String>, WipeError> {
        Ok(vec!["a".into(), "b".into()])
    }

    fn delete_cache(&mut self, name: &str) -> Result<(), WipeError> {
        self.calls.push("cache");
        Err(WipeError::Cache { name: name.into(), reason: "locked".into() })
    }

    fn database_names(&self) -> Result<Vec<String>, WipeError> {
        Err(WipeError::Database { name: "*".into(), reason: "enumeration unsupported".into() })
    }

    fn delete_database(&mut self, _name: &str) -> Result<(), WipeError> {
        self.calls.push("database");
        Ok(())
    }

    fn revoke_handle(&mut self, handle: &str) -> Result<(), WipeError> {
        self.calls.push("handle");
        Err(WipeError::Handle { handle: handle.into(), reason: "gone".into() })
    }

    fn navigate_wiped(&mut self) -> Result<(), WipeError> {
        self.calls.push("navigate");
        Err(WipeError::Navigation("no window".into()))
    }

    fn reload(&mut self) -> Result<(), WipeError> {
        self.calls.push("reload");
        Ok(())
    }
}

#[test]
fn registries_empty_after_failing_wipe() {
    let env = SeededEnv::at(1_000);
    let registry = WipeRegistry::new();
    let crypto = SessionCrypto::new(env.clone(), registry.clone());
    let mut sessions = SessionStore::new(crypto, Duration::from_secs(60));

    let key = sessions.get_or_derive(3).unwrap().message_key.clone();
    let wire = sessions.crypto().encrypt_wire(&key, "secret").unwrap();
    assert!(!wire.is_empty());

    let conn = Arc::new(CountingConnection::default());
    registry.register_connection(1, conn.clone());
    registry.register_handle("blob:attachment-1");
    registry.register_handle("blob:attachment-2");
    assert!(registry.buffer_count() > 0);

    let mut platform = BrokenPlatform::default();
    let report = PanicWipe::new(registry.clone(), env).wipe(&mut platform);

    assert!(registry.is_empty());
    assert!(key.is_wiped());
    assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
    assert!(report.reloaded);
    assert_eq!(report.connections_closed, 1);
    assert_eq!(report.handles_revoked, 0);

    let steps: Vec<WipeStep> = report.failures.iter().map(|(step, _)| *step).collect();
    assert_eq!(steps, vec![
        WipeStep::KeyValue,
        WipeStep::LocalStores,
        WipeStep::LocalStores,
        WipeStep::LocalStores,
        WipeStep::Handles,
        WipeStep::Handles,
    ]);
    assert_eq!(platform.calls, vec![
        "clear", "cache", "cache", "handle", "handle", "navigate", "reload"
    ]);
}

#[test]
fn session_store_rederives_after_wipe() {
    let env = SeededEnv::at(1_000);
    let registry = WipeRegistry::new();
    let crypto = SessionCrypto::new(env.clone(), registry.clone());
    let mut sessions = SessionStore::new(crypto, Duration::from_secs(60));

    let before = sessions.get_or_derive(9).unwrap().message_key.clone();
    PanicWipe::new(registry, env).wipe(&mut BrokenPlatform::default());
    assert!(before.is_wiped());

    let after = sessions.get_or_derive(9).unwrap();
    assert!(!after.is_wiped());
    assert_ne!(after.message_key.id(), before.id());
}

#[test]
fn wiped_exchange_session_stays_locked() {
    let env = SeededEnv::at(1_000);
    let registry = WipeRegistry::new();
    let crypto = SessionCrypto::new(env.clone(), registry.clone());
    let mut sessions = SessionStore::new(crypto, Duration::from_secs(60));

    let secret = sessions.crypto().chat_key(100);
    sessions.establish(9, &secret).unwrap();
    PanicWipe::new(registry, env).wipe(&mut BrokenPlatform::default());

    assert_eq!(
        sessions.get_or_derive(9).unwrap_err(),
        SessionError::ExchangeRequired { chat_id: 9 }
    );
}
