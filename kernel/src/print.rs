// Print macros for kernel output

#[cfg(target_arch = "x86")]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[cfg(target_arch = "x86")]
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

// Stub implementations for foreign architectures (host-side unit tests)
#[cfg(not(target_arch = "x86"))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

#[cfg(not(target_arch = "x86"))]
#[macro_export]
macro_rules! println {
    () => {};
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
