// Print macros for kernel output

/// Print to the kernel console (serial on bare metal, stdout on the host).
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

/// Print a line to the kernel console.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn _print(args: core::fmt::Arguments) {
    crate::arch::x86::serial::_print(args);
}

#[doc(hidden)]
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn _print(args: core::fmt::Arguments) {
    #[cfg(not(target_os = "none"))]
    {
        use std::io::Write;
        let _ = std::io::stdout().write_fmt(args);
    }
    #[cfg(target_os = "none")]
    let _ = args;
}
