// Copyright 2026 cilforge contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # cilforge
//!
//! A reader and writer for the CIL metadata container format used by .NET PE
//! executables. Built in pure Rust, `cilforge` parses and emits the ECMA-335
//! physical layout: metadata tables with adaptive index widths, the four
//! content-addressed heaps, method bodies with tiny/fat headers and exception
//! sections, and the CIL instruction stream itself.
//!
//! ## Features
//!
//! - **Container reading** - PE envelope, CLR header, metadata root, and the
//!   `#~` tables stream, decoded with row counts resolved before any row
//! - **Container writing** - deduplicating heap builders, token assignment,
//!   and a collect/materialize emission pipeline that freezes index widths
//!   before serializing a single row
//! - **Instruction codec** - table-driven decode of one- and two-byte
//!   opcodes, and an insertable [`crate::assembly::InstructionBuffer`] with
//!   label resolution and short/long branch form selection
//! - **Stack verification** - a basic-block stack-depth verifier that
//!   computes `maxStack` and rejects inconsistent control-flow merges
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilforge::prelude::*;
//!
//! let container = CilContainer::from_file("library.dll".as_ref())?;
//! let tables = container.tables()?;
//! println!("method rows: {}", tables.row_count(TableId::MethodDef));
//! # Ok::<(), cilforge::Error>(())
//! ```
//!
//! Authoring a method body:
//!
//! ```rust,no_run
//! use cilforge::assembly::InstructionBuffer;
//!
//! let mut buf = InstructionBuffer::new();
//! buf.emit_i4("ldc.i4", 2)?;
//! buf.emit_i4("ldc.i4", 3)?;
//! buf.emit("add")?;
//! buf.emit("pop")?;
//! buf.emit("ret")?;
//! let layout = buf.layout()?;
//! let bytes = buf.encode(&layout)?;
//! # Ok::<(), cilforge::Error>(())
//! ```

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use cilforge::prelude::*;
///
/// let container = CilContainer::from_file("library.dll".as_ref())?;
/// # Ok::<(), cilforge::Error>(())
/// ```
pub mod prelude;

/// CIL instruction codec: opcode tables, decoder, instruction buffer,
/// stack-depth verifier and method-body encoding.
pub mod assembly;

/// Container building: heap builders, table store and final byte emission.
pub mod builder;

/// Metadata structures: tokens, streams, tables and method bodies.
pub mod metadata;

/// Universal `Result` type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
pub use file::{parser::Parser, File};
pub use metadata::container::CilContainer;
pub use metadata::token::Token;
