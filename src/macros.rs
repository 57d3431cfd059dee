macro_rules! format_error {
    ($($arg:tt)+) => {
        return Err($crate::error::Error::Format(format!($($arg)+)))
    };
}

macro_rules! corrupt_data {
    ($($arg:tt)+) => {
        return Err($crate::error::Error::CorruptData(format!($($arg)+)))
    };
}

macro_rules! unsupported {
    ($($arg:tt)+) => {
        return Err($crate::error::Error::UnsupportedFeature(format!($($arg)+)))
    };
}

macro_rules! invalid_input {
    ($($arg:tt)+) => {
        return Err(::std::io::Error::new(
            ::std::io::ErrorKind::InvalidInput,
            format!($($arg)+),
        )
        .into())
    };
}

macro_rules! not_found {
    ($($arg:tt)+) => {
        return Err($crate::error::Error::NotFound(format!($($arg)+)))
    };
}
