#[macro_export]
macro_rules! err_custom_create {
    ($($t:tt)*) => {
        $crate::error::AllowanceError::OtherError(format!($($t)*))
    };
}

#[macro_export]
macro_rules! err_config {
    ($($t:tt)*) => {
        $crate::error::AllowanceError::ConfigError(format!($($t)*))
    };
}

#[macro_export]
macro_rules! err_from {
    () => {
        |err| {
            let err = $crate::error::AllowanceError::from(err);
            log::debug!("{}:{} {}", file!(), line!(), err);
            err
        }
    };
}
