/// In debug builds, panics like `assert!` on an internal invariant break.
///
/// In release builds, an internal invariant break is not recoverable per the
/// broker's error taxonomy (it is outside the codec/transport/dispatch kinds
/// that map to a reply or a disconnect), so this logs via `tracing::error!`
/// and aborts the process rather than limping on with corrupted state.
#[macro_export]
macro_rules! invariant {
    ($cond:expr $(,)?) => {
        if !$cond {
            if cfg!(debug_assertions) {
                panic!("invariant violated: {}", stringify!($cond));
            } else {
                tracing::error!("invariant violated: {}", stringify!($cond));
                std::process::abort();
            }
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            if cfg!(debug_assertions) {
                panic!($($arg)+);
            } else {
                tracing::error!($($arg)+);
                std::process::abort();
            }
        }
    };
}

/// Same as [`invariant!`] but for unreachable-in-practice branches.
#[macro_export]
macro_rules! invariant_unreachable {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            unreachable!($($arg)*);
        } else {
            tracing::error!($($arg)*);
            std::process::abort();
        }
    };
}
