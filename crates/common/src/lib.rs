// duet-common: wire protocol and text utilities shared by duet crates

pub mod filter;
pub mod protocol;
