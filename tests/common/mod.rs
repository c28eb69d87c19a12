use std::sync::{Mutex, MutexGuard, Once};

static INIT: Once = Once::new();
static SESSION_SLOT: Mutex<()> = Mutex::new(());

/// Serializes tests that construct sessions. The engine slot is
/// process-global, so two live sessions in one test binary would trip the
/// busy guard instead of testing what they mean to.
pub fn session_slot() -> MutexGuard<'static, ()> {
    INIT.call_once(|| {
        let _ = pretty_env_logger::formatted_builder()
            .parse_default_env()
            .is_test(true)
            .try_init();
    });
    SESSION_SLOT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
