// SPDX-License-Identifier: Apache-2.0

//! File discovery, identity and line splitting.

mod file_id;
mod finder;
mod fingerprint;
mod reader;
mod stdin;

pub use file_id::{FileId, get_path_from_file};
pub use finder::{FileFinder, FoundFile};
pub use fingerprint::Fingerprint;
pub use reader::{Line, LineReader};
pub use stdin::stdin_reader;
