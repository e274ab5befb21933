//! The framed wire protocol (§6, §4.10): frame header/CRC handling in
//! [`codec`], TLV value encoding in [`value`].
pub mod codec;
pub mod value;
