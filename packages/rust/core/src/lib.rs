//! Core pipeline orchestration and domain logic for Photoblog.
//!
//! This crate ties together media selection, image resizing, AI generation,
//! post assembly and git publishing into one end-to-end run (see [`pipeline::Pipeline`]).

pub mod assembler;
pub mod manifest;
pub mod pipeline;
pub mod publish;
pub mod resize;
pub mod selection;
pub mod slug;
