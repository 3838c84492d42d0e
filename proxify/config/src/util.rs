pub mod testing {
    use std::{
        env,
        env::VarError,
        panic,
        panic::{RefUnwindSafe, UnwindSafe},
        sync::{LazyLock, Mutex},
    };

    static SERIAL_TEST: LazyLock<Mutex<()>> = LazyLock::new(Default::default);

    /// Sets environment variables to the given value for the duration of the closure.
    /// Restores the previous values when the closure completes or panics, before unwinding the
    /// panic.
    pub fn with_env_vars<F>(kvs: Vec<(&str, Option<&str>)>, closure: F)
    where
        F: Fn() + UnwindSafe + RefUnwindSafe,
    {
        let guard = SERIAL_TEST.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut old_kvs: Vec<(&str, Result<String, VarError>)> = Vec::new();
        for (k, v) in kvs {
            let old_v = env::var(k);
            old_kvs.push((k, old_v));
            match v {
                None => unsafe { env::remove_var(k) },
                Some(v) => unsafe { env::set_var(k, v) },
            }
        }

        let result = panic::catch_unwind(closure);
        for (k, v) in old_kvs {
            reset_env(k, v);
        }

        if let Err(err) = result {
            drop(guard);
            panic::resume_unwind(err);
        }
    }

    fn reset_env(k: &str, old: Result<String, VarError>) {
        if let Ok(v) = old {
            unsafe { env::set_var(k, v) };
        } else {
            unsafe { env::remove_var(k) };
        }
    }
}
