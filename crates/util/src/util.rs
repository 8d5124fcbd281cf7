use std::{fmt::Debug, ops::AddAssign, panic::Location};

/// Returns the current value and increments it in place.
pub fn post_inc<T: From<u8> + AddAssign<T> + Copy>(value: &mut T) -> T {
    let prev = *value;
    *value += T::from(1);
    prev
}

pub trait ResultExt<E> {
    type Ok;

    fn log_err(self) -> Option<Self::Ok>;
    fn warn_on_err(self) -> Option<Self::Ok>;
    fn log_with_level(self, level: log::Level) -> Option<Self::Ok>;
    /// Asserts in debug builds that this is `Ok`; in release builds the error
    /// is passed through untouched.
    fn debug_assert_ok(self, reason: &str) -> Self;
}

impl<T, E> ResultExt<E> for Result<T, E>
where
    E: Debug,
{
    type Ok = T;

    #[track_caller]
    fn log_err(self) -> Option<T> {
        self.log_with_level(log::Level::Error)
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        self.log_with_level(log::Level::Warn)
    }

    #[track_caller]
    fn log_with_level(self, level: log::Level) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                log_error_with_caller(*Location::caller(), error, level);
                None
            }
        }
    }

    #[track_caller]
    fn debug_assert_ok(self, reason: &str) -> Self {
        if let Err(error) = &self {
            crate::debug_panic!("{reason} - {error:?}");
        }
        self
    }
}

fn log_error_with_caller<E>(caller: Location<'_>, error: E, level: log::Level)
where
    E: Debug,
{
    let file = caller.file();
    log::logger().log(
        &log::Record::builder()
            .target(file)
            .module_path(Some(file))
            .args(format_args!("{:?}", error))
            .file(Some(file))
            .line(Some(caller.line()))
            .level(level)
            .build(),
    );
}

/// Panics in debug builds and logs an error in release builds.
#[macro_export]
macro_rules! debug_panic {
    ( $($fmt_arg:tt)* ) => {
        if cfg!(debug_assertions) {
            panic!( $($fmt_arg)* );
        } else {
            let backtrace = std::backtrace::Backtrace::capture();
            log::error!("{}\n{:?}", format_args!($($fmt_arg)*), backtrace);
        }
    };
}
