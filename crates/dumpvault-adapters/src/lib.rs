// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concrete collaborators for the dumpvault pipeline.
//!
//! - [`DirTransport`] stores archives in a mounted directory.
//! - [`FtpTransport`] ships them to an FTP server.
//! - [`CommandDumper`] and [`CommandArchiver`] run external programs described by a
//!   [`CommandSpec`](dumpvault_core::CommandSpec).
#![forbid(unsafe_code)]

pub mod command;
pub mod dir;
pub mod ftp;

pub use command::{CommandArchiver, CommandDumper};
pub use dir::{DirTransport, PARTIAL_SUFFIX};
pub use ftp::FtpTransport;
