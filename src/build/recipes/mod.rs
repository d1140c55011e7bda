pub mod busybox;
pub mod cross_llvm;
pub mod libfuse;
pub mod linux_headers;
pub mod musl;
pub mod pcre2;
pub mod xz;
pub mod zlib_ng;
pub mod zstd;

pub use busybox::BusyBox;
pub use cross_llvm::CrossLlvm;
pub use libfuse::LibFuse;
pub use linux_headers::LinuxHeaders;
pub use musl::Musl;
pub use pcre2::Pcre2;
pub use xz::Xz;
pub use zlib_ng::ZlibNg;
pub use zstd::Zstd;
