//! Readers for the physical metadata streams.
//!
//! A metadata container carries up to five streams: the `#~` tables stream
//! plus the `#Strings`, `#US`, `#Blob` and `#GUID` heaps. Each reader here is
//! a zero-copy view over one stream's byte range.

mod blob;
mod guid;
mod strings;
mod tablesheader;
mod userstrings;

pub use blob::Blob;
pub use guid::Guid;
pub use strings::Strings;
pub use tablesheader::TablesHeader;
pub use userstrings::UserStrings;
